use parking_lot::Mutex;
use regex::Regex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{error, info, warn};

use super::player::PlaybackController;
use super::track_context::TrackContext;
use crate::engine::{AudioEngine, LoadNotice, NoticeSink, ResolveOutcome, ResolvedTrack, Severity};
use crate::error::LoadError;
use crate::ratelimit::{Identity, Ratelimiter, RuleClass};
use crate::util::parse_timestamp;

/// Patrón de "timestamp más título" en la descripción de un track, para las
/// cargas divididas. Una línea por sub-track.
fn split_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^(.*?)[(\[ ]*((?:\d?\d:)?\d?\d:\d\d)[)\] ]*(.*)$")
            .expect("patrón de split inválido")
    })
}

/// Quién pidió la carga y dónde responderle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

impl Requester {
    fn identity(&self) -> Identity {
        Identity { user_id: self.user_id, guild_id: self.guild_id }
    }
}

/// Petición de carga; vive desde `queue()` hasta que su resolución se aplica
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub identifier: String,
    pub requester: Requester,
    pub split: bool,
    pub quiet: bool,
    pub start_position: Option<Duration>,
}

impl LoadRequest {
    pub fn new(identifier: impl Into<String>, requester: Requester) -> Self {
        Self {
            identifier: identifier.into(),
            requester,
            split: false,
            quiet: false,
            start_position: None,
        }
    }

    /// Reinterpreta un track largo como N sub-tracks según su descripción
    pub fn split(mut self) -> Self {
        self.split = true;
        self
    }

    /// Carga sin aviso al usuario
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn starting_at(mut self, position: Duration) -> Self {
        self.start_position = Some(position);
        self
    }
}

/// Resolutor asíncrono de un guild: convierte identificadores en
/// `TrackContext` sin bloquear el manejo de comandos.
///
/// Garantía de serialización: como mucho una resolución en vuelo por guild.
/// La siguiente petición no sale del backlog hasta que el resultado de la
/// anterior (éxito o fallo) terminó de aplicarse al provider.
pub struct TrackLoader {
    guild_id: GuildId,
    engine: Arc<dyn AudioEngine>,
    gate: Arc<Ratelimiter>,
    notices: Arc<dyn NoticeSink>,
    /// El dueño real es el controller; si ya no existe, los resultados
    /// tardíos se descartan
    controller: Weak<PlaybackController>,
    backlog: Mutex<VecDeque<LoadRequest>>,
    in_flight: AtomicBool,
    track_limit: usize,
}

impl TrackLoader {
    pub(crate) fn new(
        guild_id: GuildId,
        engine: Arc<dyn AudioEngine>,
        gate: Arc<Ratelimiter>,
        notices: Arc<dyn NoticeSink>,
        controller: Weak<PlaybackController>,
        track_limit: usize,
    ) -> Self {
        Self {
            guild_id,
            engine,
            gate,
            notices,
            controller,
            backlog: Mutex::new(VecDeque::new()),
            in_flight: AtomicBool::new(false),
            track_limit,
        }
    }

    /// Encola una petición. La resolución en sí corre en la tarea de
    /// drenado; aquí solo se hace el pre-flight de admisión.
    pub async fn load_async(self: &Arc<Self>, request: LoadRequest) {
        if !self.admit(&request).await {
            return;
        }

        self.backlog.lock().push_back(request);
        self.spawn_drain_if_idle();
    }

    /// ¿Hay trabajo pendiente o en vuelo?
    pub fn is_idle(&self) -> bool {
        !self.in_flight.load(Ordering::SeqCst) && self.backlog.lock().is_empty()
    }

    /// Control de admisión para playlists lentas conocidas; el resto de
    /// identificadores pasa directo. Una denegación descarta la petición
    /// sin encolarla.
    async fn admit(&self, request: &LoadRequest) -> bool {
        let Some(info) = self.engine.playlist_info(&request.identifier).await else {
            return true;
        };

        let identity = request.requester.identity();

        if self.gate.is_blacklisted(identity.user_id) {
            warn!(
                user = identity.user_id.get(),
                error = %LoadError::AdmissionDenied,
                "usuario blacklisteado pidiendo una playlist"
            );
            self.notify(request, LoadNotice::RateLimited).await;
            return false;
        }

        let verdict =
            self.gate
                .is_allowed(&identity, RuleClass::BulkPlaylist, info.total_tracks as u64);
        if !verdict.allowed {
            let notice = match verdict.blacklisted_for {
                Some(duration) => LoadNotice::Blacklisted { duration },
                None => LoadNotice::RateLimited,
            };
            self.notify(request, notice).await;
            return false;
        }

        // avisamos de que vamos a hacer trabajo largo de red
        if info.total_tracks > 50 {
            self.notify(
                request,
                LoadNotice::GatheringPlaylist {
                    name: info.name.clone(),
                    total_tracks: info.total_tracks,
                },
            )
            .await;
        }

        true
    }

    fn spawn_drain_if_idle(self: &Arc<Self>) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let loader = Arc::clone(self);
            tokio::spawn(async move { loader.drain().await });
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.backlog.lock().pop_front();
            match next {
                Some(request) => self.process(request).await,
                None => {
                    self.in_flight.store(false, Ordering::SeqCst);
                    // una petición pudo colarse entre el pop y el store;
                    // si es así intentamos retomar el drenado
                    if self.backlog.lock().is_empty() {
                        break;
                    }
                    if self
                        .in_flight
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    }

    async fn process(&self, request: LoadRequest) {
        let Some(controller) = self.controller.upgrade() else {
            error!(
                guild = self.guild_id.get(),
                identifier = %request.identifier,
                "resolución completada sobre un controlador destruido; resultado descartado"
            );
            return;
        };

        if !controller.is_active() {
            error!(
                guild = self.guild_id.get(),
                identifier = %request.identifier,
                "el controlador ya no es el activo de este guild; resultado descartado"
            );
            return;
        }

        if let Err(err) = self.resolve_and_apply(&controller, &request).await {
            self.report(&request, err).await;
        }
    }

    async fn resolve_and_apply(
        &self,
        controller: &Arc<PlaybackController>,
        request: &LoadRequest,
    ) -> Result<(), LoadError> {
        // guard de capacidad: rechaza pero sigue drenando el backlog
        if controller.queued_count() >= self.track_limit {
            return Err(LoadError::QueueCapacityExceeded(self.track_limit));
        }

        let outcome = self
            .engine
            .resolve(&request.identifier)
            .await
            .map_err(|e| self.classify(request, e))?;

        match outcome {
            ResolveOutcome::Track(track) => {
                if request.split {
                    self.apply_split(controller, request, track).await
                } else {
                    self.apply_single(controller, request, track).await;
                    Ok(())
                }
            }
            ResolveOutcome::Playlist(playlist) => {
                if request.split {
                    self.notify(request, LoadNotice::SplitOnPlaylist).await;
                    return Ok(());
                }

                // bloque atómico: los tracks entran juntos y en orden de
                // origen, sin intercalarse con otra petición del guild
                let contexts: Vec<TrackContext> = playlist
                    .tracks
                    .into_iter()
                    .map(|track| TrackContext::new(track, request.requester.user_id, self.guild_id))
                    .collect();

                info!(
                    guild = self.guild_id.get(),
                    count = contexts.len(),
                    playlist = %playlist.name,
                    "playlist cargada"
                );
                self.notify(
                    request,
                    LoadNotice::PlaylistAdded { name: playlist.name, count: contexts.len() },
                )
                .await;
                controller.enqueue_resolved(contexts).await;
                Ok(())
            }
            ResolveOutcome::NoMatch => Err(LoadError::ResolutionNoMatch(request.identifier.clone())),
        }
    }

    async fn apply_single(
        &self,
        controller: &Arc<PlaybackController>,
        request: &LoadRequest,
        track: ResolvedTrack,
    ) {
        let mut ctx = TrackContext::new(track, request.requester.user_id, self.guild_id);
        if let Some(position) = request.start_position {
            ctx = ctx.with_start_position(position);
        }

        if request.quiet {
            info!("🔇 Cargado en silencio: {}", ctx.track().identifier);
        } else {
            let will_play = !controller.is_playing() && !controller.is_paused();
            self.notify(
                request,
                LoadNotice::TrackAdded { title: ctx.effective_title().to_string(), will_play },
            )
            .await;
        }

        controller.enqueue_resolved(vec![ctx]).await;
    }

    async fn apply_split(
        &self,
        controller: &Arc<PlaybackController>,
        request: &LoadRequest,
        track: ResolvedTrack,
    ) -> Result<(), LoadError> {
        let description = self
            .engine
            .track_description(&track)
            .await
            .map_err(|e| self.classify(request, e))?;

        let pairs = parse_split_description(&description);
        if pairs.len() < 2 {
            // fallo blando: cero contextos creados
            return Err(LoadError::SplitParseFailed);
        }

        let mut contexts = Vec::with_capacity(pairs.len());
        for (i, (start, title)) in pairs.iter().enumerate() {
            let end = match pairs.get(i + 1) {
                Some((next_start, _)) => Duration::from_millis(*next_start),
                None => track.duration, // el último llega al final del track
            };
            contexts.push(TrackContext::new_split(
                track.clone(),
                request.requester.user_id,
                self.guild_id,
                Duration::from_millis(*start),
                end,
                title.clone(),
            ));
        }

        let parts = contexts
            .iter()
            .map(|ctx| (ctx.effective_title().to_string(), ctx.effective_duration()))
            .collect();
        self.notify(request, LoadNotice::SplitTracksAdded { parts }).await;
        controller.enqueue_resolved(contexts).await;
        Ok(())
    }

    fn classify(&self, request: &LoadRequest, e: crate::engine::EngineError) -> LoadError {
        match e.severity {
            Severity::Common => LoadError::ResolutionFailedCommon(e.message.clone()),
            Severity::Unexpected => LoadError::ResolutionFailedUnexpected {
                identifier: request.identifier.clone(),
                source: e,
            },
        }
    }

    /// Todos los errores de carga terminan en un único aviso; ninguno
    /// detiene el drenado.
    async fn report(&self, request: &LoadRequest, err: LoadError) {
        let notice = match &err {
            LoadError::AdmissionDenied => LoadNotice::RateLimited,
            LoadError::QueueCapacityExceeded(limit) => {
                warn!(guild = self.guild_id.get(), limit, "cola llena, carga rechazada");
                LoadNotice::QueueCapacityReached { limit: *limit }
            }
            LoadError::ResolutionNoMatch(identifier) => {
                LoadNotice::NoMatches { identifier: identifier.clone() }
            }
            LoadError::ResolutionFailedCommon(message) => LoadNotice::LoadFailed {
                identifier: request.identifier.clone(),
                message: message.clone(),
                unexpected: false,
            },
            LoadError::ResolutionFailedUnexpected { identifier, source } => {
                error!(
                    identifier = %identifier,
                    error = %source,
                    "fallo inesperado al resolver"
                );
                LoadNotice::LoadFailed {
                    identifier: identifier.clone(),
                    message: String::new(),
                    unexpected: true,
                }
            }
            LoadError::SplitParseFailed => LoadNotice::SplitParseFailed,
        };

        self.notify(request, notice).await;
    }

    async fn notify(&self, request: &LoadRequest, notice: LoadNotice) {
        self.notices.notify(request.requester.channel_id, notice).await;
    }
}

/// Extrae pares `(timestamp en ms, título)` de la descripción de un track.
/// Cuando hay texto a ambos lados del timestamp gana el lado más largo.
fn parse_split_description(description: &str) -> Vec<(u64, String)> {
    let mut pairs = Vec::new();

    for caps in split_pattern().captures_iter(description) {
        let Some(timestamp) = parse_timestamp(&caps[2]) else {
            continue;
        };

        let before = caps[1].trim();
        let after = caps[3].trim();
        let title = if before.len() > after.len() { before } else { after };

        pairs.push((timestamp, title.to_string()));
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_description_basic() {
        let description = "0:00 Intro\n1:30 Verse\n1:02:03 Outro\n";
        let pairs = parse_split_description(description);

        assert_eq!(
            pairs,
            vec![
                (0, "Intro".to_string()),
                (90_000, "Verse".to_string()),
                (3_723_000, "Outro".to_string()),
            ]
        );
    }

    #[test]
    fn test_split_description_title_before_timestamp() {
        let pairs = parse_split_description("Primera parte (0:00)\nSegunda parte [12:34]");

        assert_eq!(
            pairs,
            vec![
                (0, "Primera parte".to_string()),
                (754_000, "Segunda parte".to_string()),
            ]
        );
    }

    #[test]
    fn test_split_description_ignores_lines_without_timestamps() {
        let description = "Tracklist:\n0:00 A\nuploaded by someone\n2:00 B";
        let pairs = parse_split_description(description);

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], (120_000, "B".to_string()));
    }

    #[test]
    fn test_split_description_single_match() {
        // con un solo par el loader falla blando y no crea contextos
        let pairs = parse_split_description("0:00 única pista");
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_load_request_builder() {
        let requester = Requester {
            user_id: UserId::new(1),
            guild_id: GuildId::new(2),
            channel_id: ChannelId::new(3),
        };
        let request = LoadRequest::new("url", requester)
            .split()
            .quiet()
            .starting_at(Duration::from_secs(30));

        assert!(request.split);
        assert!(request.quiet);
        assert_eq!(request.start_position, Some(Duration::from_secs(30)));
    }
}
