//! Colaboradores externos de la pipeline: motor de audio, transporte de voz,
//! permisos, configuración por servidor y avisos al usuario.
//!
//! La cola solo conoce estos traits; el binario que la integre decide las
//! implementaciones reales (Lavalink, songbird, etc.).

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::time::Duration;
use thiserror::Error;

use crate::audio::track_context::TrackContext;

/// Track ya resuelto por el motor de audio, listo para reproducirse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub identifier: String,
    pub title: String,
    pub duration: Duration,
    /// Los streams en vivo no tienen duración conocida
    pub is_stream: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedPlaylist {
    pub name: String,
    pub tracks: Vec<ResolvedTrack>,
}

/// Resultado de resolver un identificador
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Track(ResolvedTrack),
    Playlist(ResolvedPlaylist),
    NoMatch,
}

/// Fuentes de playlists que cargamos manualmente y son lentas de reunir
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    PasteService,
    Spotify,
}

/// Datos mínimos de una playlist, usados para dimensionar la admisión
/// antes de gastar trabajo de red en cargarla.
#[derive(Debug, Clone)]
pub struct PlaylistInfo {
    pub total_tracks: usize,
    pub name: String,
    pub source_kind: SourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Esperable (geo-block, video no disponible): se muestra tal cual
    Common,
    /// Todo lo demás: se loguea con detalle y el usuario ve un genérico
    Unexpected,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub severity: Severity,
    pub message: String,
}

impl EngineError {
    pub fn common(message: impl Into<String>) -> Self {
        Self { severity: Severity::Common, message: message.into() }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self { severity: Severity::Unexpected, message: message.into() }
    }
}

/// Motor de audio: resuelve identificadores opacos (URLs, búsquedas) en
/// tracks reproducibles. Única operación de la pipeline que toca la red.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AudioEngine: Send + Sync {
    async fn resolve(&self, identifier: &str) -> Result<ResolveOutcome, EngineError>;

    /// Pre-flight para fuentes bulk conocidas (paste services, Spotify).
    /// `None` si el identificador no es una de esas playlists.
    async fn playlist_info(&self, identifier: &str) -> Option<PlaylistInfo>;

    /// Descripción textual del track, de donde se extraen los timestamps
    /// para las cargas divididas.
    async fn track_description(&self, track: &ResolvedTrack) -> Result<String, EngineError>;
}

/// Transporte de voz (conexión y envío de frames quedan del otro lado).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn play(&self, guild_id: GuildId, ctx: &TrackContext) -> anyhow::Result<()>;
    async fn stop(&self, guild_id: GuildId);
    async fn pause(&self, guild_id: GuildId);
    async fn resume(&self, guild_id: GuildId);
    /// Posición de reproducción en vivo reportada por el motor
    async fn position(&self, guild_id: GuildId) -> Option<Duration>;
    async fn leave(&self, guild_id: GuildId);
}

/// Autorización de skips masivos
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SkipPermissions: Send + Sync {
    async fn may_skip(&self, requester: UserId, owners: &[UserId]) -> bool;
}

/// Política por defecto: cada uno puede saltar solo sus propios tracks.
/// Los roles elevados (DJ) se resuelven en otra implementación.
pub struct OwnTracksOnly;

#[async_trait]
impl SkipPermissions for OwnTracksOnly {
    async fn may_skip(&self, requester: UserId, owners: &[UserId]) -> bool {
        owners.iter().all(|owner| *owner == requester)
    }
}

/// Configuración persistida por servidor que la cola consulta
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GuildSettings: Send + Sync {
    async fn is_auto_announce_enabled(&self, guild_id: GuildId) -> bool;
}

/// Aviso dirigido al usuario. El formato final (texto, embeds, i18n) es
/// responsabilidad de la capa de comandos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadNotice {
    RateLimited,
    Blacklisted { duration: Duration },
    GatheringPlaylist { name: String, total_tracks: usize },
    TrackAdded { title: String, will_play: bool },
    PlaylistAdded { name: String, count: usize },
    SplitTracksAdded { parts: Vec<(String, Duration)> },
    SplitParseFailed,
    SplitOnPlaylist,
    NoMatches { identifier: String },
    LoadFailed { identifier: String, message: String, unexpected: bool },
    QueueCapacityReached { limit: usize },
    SkipDenied,
    TrackAnnounce { title: String },
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NoticeSink: Send + Sync {
    async fn notify(&self, channel_id: ChannelId, notice: LoadNotice);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_own_tracks_only_policy() {
        let perms = OwnTracksOnly;
        let me = UserId::new(7);
        let other = UserId::new(8);

        assert!(perms.may_skip(me, &[me, me]).await);
        assert!(perms.may_skip(me, &[]).await);
        assert!(!perms.may_skip(me, &[me, other]).await);
    }
}
