use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::loader::{LoadRequest, Requester, TrackLoader};
use super::queue::{RepeatMode, TrackProvider};
use super::track_context::TrackContext;
use crate::engine::{
    AudioEngine, GuildSettings, LoadNotice, NoticeSink, SkipPermissions, VoiceTransport,
};
use crate::ratelimit::Ratelimiter;

/// Estado de reproducción de un guild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Dependencias compartidas entre todos los controllers; el registry las
/// clona al crear cada uno.
#[derive(Clone)]
pub struct PlayerDeps {
    pub engine: Arc<dyn AudioEngine>,
    pub transport: Arc<dyn VoiceTransport>,
    pub permissions: Arc<dyn SkipPermissions>,
    pub settings: Arc<dyn GuildSettings>,
    pub notices: Arc<dyn NoticeSink>,
    pub gate: Arc<Ratelimiter>,
    pub track_limit: usize,
}

struct PlayerInner {
    state: PlaybackState,
    current: Option<TrackContext>,
    /// Último canal desde el que se pidió música; ahí van los anuncios
    channel: Option<ChannelId>,
}

/// Controlador de reproducción de un guild: máquina de estados
/// Idle/Playing/Paused más la transición de avance al acabar cada track.
///
/// El provider y el estado interno van bajo mutex propios y nunca se toman
/// anidados; las llamadas al transporte ocurren siempre sin locks tomados.
pub struct PlaybackController {
    guild_id: GuildId,
    provider: Mutex<TrackProvider>,
    loader: Arc<TrackLoader>,
    transport: Arc<dyn VoiceTransport>,
    permissions: Arc<dyn SkipPermissions>,
    settings: Arc<dyn GuildSettings>,
    notices: Arc<dyn NoticeSink>,
    inner: Mutex<PlayerInner>,
    /// Baja a false en `destroy()`; los resultados de carga tardíos miran
    /// este flag y se descartan
    active: AtomicBool,
}

impl PlaybackController {
    /// El loader necesita una referencia de vuelta al controller, así que
    /// la construcción es cíclica. El ciclo se rompe con `Weak`.
    pub fn new(guild_id: GuildId, deps: &PlayerDeps) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let loader = Arc::new(TrackLoader::new(
                guild_id,
                Arc::clone(&deps.engine),
                Arc::clone(&deps.gate),
                Arc::clone(&deps.notices),
                weak.clone(),
                deps.track_limit,
            ));

            Self {
                guild_id,
                provider: Mutex::new(TrackProvider::new()),
                loader,
                transport: Arc::clone(&deps.transport),
                permissions: Arc::clone(&deps.permissions),
                settings: Arc::clone(&deps.settings),
                notices: Arc::clone(&deps.notices),
                inner: Mutex::new(PlayerInner {
                    state: PlaybackState::Idle,
                    current: None,
                    channel: None,
                }),
                active: AtomicBool::new(true),
            }
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Pide cargar un identificador y encolar el resultado
    pub async fn queue(
        self: &Arc<Self>,
        identifier: impl Into<String>,
        channel_id: ChannelId,
        user_id: UserId,
    ) {
        let requester = Requester { user_id, guild_id: self.guild_id, channel_id };
        self.queue_request(LoadRequest::new(identifier, requester)).await;
    }

    pub async fn queue_request(self: &Arc<Self>, request: LoadRequest) {
        self.bind_channel(request.requester.channel_id);
        self.loader.load_async(request).await;
    }

    /// Encola un contexto ya resuelto, saltándose el loader
    pub async fn queue_context(self: &Arc<Self>, ctx: TrackContext) {
        self.enqueue_resolved(vec![ctx]).await;
    }

    /// Fija el canal al que irán los anuncios de este guild
    pub fn bind_channel(&self, channel_id: ChannelId) {
        self.inner.lock().channel = Some(channel_id);
    }

    /// Entrada de tracks resueltos: todos bajo un mismo lock del provider,
    /// para que una playlist no se intercale con otra carga del guild.
    /// Arranca la reproducción salvo que el player esté en pausa.
    pub(crate) async fn enqueue_resolved(self: &Arc<Self>, contexts: Vec<TrackContext>) {
        {
            let mut provider = self.provider.lock();
            for ctx in contexts {
                provider.add(ctx);
            }
        }

        if self.state() != PlaybackState::Paused {
            self.play().await;
        }
    }

    /// Reanuda si está en pausa, arranca el siguiente si está parado y no
    /// hace nada si ya suena algo.
    pub async fn play(self: &Arc<Self>) {
        match self.state() {
            PlaybackState::Paused => self.unpause().await,
            PlaybackState::Idle => {
                self.start_next().await;
            }
            PlaybackState::Playing => {}
        }
    }

    pub async fn pause(&self) {
        let paused = {
            let mut inner = self.inner.lock();
            if inner.state == PlaybackState::Playing {
                inner.state = PlaybackState::Paused;
                true
            } else {
                false
            }
        };

        if paused {
            debug!(guild = self.guild_id.get(), "⏸️ Pausado");
            self.transport.pause(self.guild_id).await;
        }
    }

    pub async fn unpause(&self) {
        let resumed = {
            let mut inner = self.inner.lock();
            if inner.state == PlaybackState::Paused {
                inner.state = PlaybackState::Playing;
                true
            } else {
                false
            }
        };

        if resumed {
            debug!(guild = self.guild_id.get(), "▶️ Reanudado");
            self.transport.resume(self.guild_id).await;
        }
    }

    /// Parada explícita: vuelve a Idle sin tocar los pendientes. Olvida el
    /// último servido para que los modos de repetición no lo resuciten.
    pub async fn stop(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = PlaybackState::Idle;
            inner.current = None;
        }
        self.provider.lock().skipped();
        self.transport.stop(self.guild_id).await;
    }

    /// Avance por fin natural del track. Los saltos y paradas explícitas
    /// gestionan su propia transición, así que aquí un estado distinto de
    /// Playing significa que ya se aplicó y no hay nada que avanzar.
    pub async fn on_track_end(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }

        {
            let mut inner = self.inner.lock();
            if inner.state != PlaybackState::Playing {
                return;
            }
            inner.state = PlaybackState::Idle;
            inner.current = None;
        }

        let repeat = self.provider.lock().repeat_mode();
        let started = self.start_next().await;

        // en bucle de un solo track el anuncio sería puro spam
        if let Some(ctx) = started {
            if repeat != RepeatMode::Single
                && self.settings.is_auto_announce_enabled(self.guild_id).await
            {
                let channel = self.inner.lock().channel;
                if let Some(channel) = channel {
                    self.notices
                        .notify(
                            channel,
                            LoadNotice::TrackAnnounce {
                                title: ctx.effective_title().to_string(),
                            },
                        )
                        .await;
                }
            }
        }
    }

    /// Salta los contextos indicados (el actual incluido si su id aparece).
    /// Permisos todo-o-nada: o se saltan todos o ninguno.
    pub async fn skip(self: &Arc<Self>, requester: UserId, stable_ids: &[u64]) {
        let current = self.current();
        let current_targeted = current
            .as_ref()
            .map_or(false, |ctx| stable_ids.contains(&ctx.stable_id()));

        let mut owners: Vec<UserId> = self
            .provider
            .lock()
            .contexts_by_id(stable_ids)
            .iter()
            .map(|ctx| ctx.owner_id())
            .collect();
        if current_targeted {
            if let Some(ctx) = &current {
                owners.push(ctx.owner_id());
            }
        }

        if !self.permissions.may_skip(requester, &owners).await {
            let channel = self.inner.lock().channel;
            if let Some(channel) = channel {
                self.notices.notify(channel, LoadNotice::SkipDenied).await;
            }
            return;
        }

        self.provider.lock().remove_all(stable_ids);

        // el actual se salta el último, con la cola ya limpia
        if current_targeted {
            self.skip_current().await;
        }
    }

    async fn skip_current(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            inner.state = PlaybackState::Idle;
            inner.current = None;
        }
        self.provider.lock().skipped();
        self.transport.stop(self.guild_id).await;
        self.start_next().await;
    }

    /// Toma el siguiente del provider y lo manda al transporte. Devuelve el
    /// contexto arrancado, o `None` si la cola quedó vacía.
    async fn start_next(self: &Arc<Self>) -> Option<TrackContext> {
        let next = self.provider.lock().poll_next();

        match next {
            Some(ctx) => {
                {
                    let mut inner = self.inner.lock();
                    inner.state = PlaybackState::Playing;
                    inner.current = Some(ctx.clone());
                }
                info!(
                    guild = self.guild_id.get(),
                    "▶️ Reproduciendo: {}",
                    ctx.effective_title()
                );

                if let Err(e) = self.transport.play(self.guild_id, &ctx).await {
                    error!(
                        guild = self.guild_id.get(),
                        error = %e,
                        "el transporte no pudo arrancar el track"
                    );
                    let mut inner = self.inner.lock();
                    inner.state = PlaybackState::Idle;
                    inner.current = None;
                    return None;
                }

                Some(ctx)
            }
            None => {
                let mut inner = self.inner.lock();
                inner.state = PlaybackState::Idle;
                inner.current = None;
                None
            }
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn current(&self) -> Option<TrackContext> {
        self.inner.lock().current.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Paused
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// ¿Hay cargas pendientes o en vuelo para este guild?
    pub fn is_loading(&self) -> bool {
        !self.loader.is_idle()
    }

    pub fn queued_count(&self) -> usize {
        self.provider.lock().len()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.provider.lock().is_empty() && self.inner.lock().current.is_none()
    }

    /// Página de la cola en el orden en que se servirá
    pub fn list(&self, offset: usize, count: usize) -> Vec<TrackContext> {
        self.provider.lock().ordered_view(offset, count)
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        self.provider.lock().set_repeat_mode(mode);
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.provider.lock().repeat_mode()
    }

    pub fn set_shuffle(&self, shuffle: bool) {
        self.provider.lock().set_shuffle(shuffle);
    }

    pub fn is_shuffle(&self) -> bool {
        self.provider.lock().is_shuffle()
    }

    pub fn reshuffle(&self) {
        self.provider.lock().reshuffle();
    }

    /// Milisegundos de música por delante: lo que queda del track actual
    /// según la posición en vivo del transporte, más los pendientes. Los
    /// streams cuentan 0.
    pub async fn remaining_millis(&self) -> u64 {
        let queued = self.provider.lock().remaining_duration_millis();

        let current = match self.current() {
            Some(ctx) if !ctx.is_stream() => {
                let position = self
                    .transport
                    .position(self.guild_id)
                    .await
                    .unwrap_or(ctx.start_position());
                let end = ctx.start_position() + ctx.effective_duration();
                end.saturating_sub(position).as_millis() as u64
            }
            _ => 0,
        };

        queued + current
    }

    /// Desmantela el controller: los resultados de carga que lleguen tarde
    /// verán `active == false` y se descartarán.
    pub async fn destroy(&self) {
        self.active.store(false, Ordering::SeqCst);
        {
            let mut inner = self.inner.lock();
            inner.state = PlaybackState::Idle;
            inner.current = None;
        }
        self.transport.leave(self.guild_id).await;
        info!(guild = self.guild_id.get(), "🗑️ Player destruido");
    }
}

/// Registro de controllers, uno por guild. Crear y destruir pasa siempre
/// por aquí; nadie más guarda `Arc`s fuertes de larga vida.
pub struct PlayerRegistry {
    deps: PlayerDeps,
    players: DashMap<GuildId, Arc<PlaybackController>>,
}

impl PlayerRegistry {
    pub fn new(deps: PlayerDeps) -> Self {
        Self { deps, players: DashMap::new() }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<PlaybackController> {
        self.players
            .entry(guild_id)
            .or_insert_with(|| PlaybackController::new(guild_id, &self.deps))
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackController>> {
        self.players.get(&guild_id).map(|entry| entry.clone())
    }

    /// Saca el controller del registro y lo desactiva
    pub async fn destroy(&self, guild_id: GuildId) {
        if let Some((_, player)) = self.players.remove(&guild_id) {
            player.destroy().await;
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testutil::{context, context_for};
    use crate::config::Config;
    use crate::engine::{
        MockAudioEngine, MockGuildSettings, MockNoticeSink, MockSkipPermissions,
        MockVoiceTransport,
    };
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(2);

    fn permissive_transport() -> MockVoiceTransport {
        let mut transport = MockVoiceTransport::new();
        transport.expect_play().returning(|_, _| Ok(()));
        transport.expect_stop().returning(|_| ());
        transport.expect_pause().returning(|_| ());
        transport.expect_resume().returning(|_| ());
        transport.expect_position().returning(|_| None);
        transport.expect_leave().returning(|_| ());
        transport
    }

    fn deps_with(
        transport: MockVoiceTransport,
        permissions: MockSkipPermissions,
        notices: MockNoticeSink,
    ) -> PlayerDeps {
        let mut settings = MockGuildSettings::new();
        settings.expect_is_auto_announce_enabled().returning(|_| false);

        PlayerDeps {
            engine: Arc::new(MockAudioEngine::new()),
            transport: Arc::new(transport),
            permissions: Arc::new(permissions),
            settings: Arc::new(settings),
            notices: Arc::new(notices),
            gate: Arc::new(Ratelimiter::new(&Config::default())),
            track_limit: 100,
        }
    }

    fn deps() -> PlayerDeps {
        deps_with(permissive_transport(), MockSkipPermissions::new(), MockNoticeSink::new())
    }

    #[tokio::test]
    async fn test_enqueue_starts_playback() {
        let player = PlaybackController::new(GUILD, &deps());

        player.queue_context(context("a")).await;

        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(player.current().unwrap().track().identifier, "a");
        assert_eq!(player.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_natural_end_advances_then_goes_idle() {
        let player = PlaybackController::new(GUILD, &deps());
        player.queue_context(context("a")).await;
        player.queue_context(context("b")).await;

        player.on_track_end().await;
        assert_eq!(player.current().unwrap().track().identifier, "b");

        player.on_track_end().await;
        assert_eq!(player.state(), PlaybackState::Idle);
        assert!(player.is_queue_empty());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let player = PlaybackController::new(GUILD, &deps());
        player.queue_context(context("a")).await;

        player.pause().await;
        assert_eq!(player.state(), PlaybackState::Paused);

        // encolar en pausa no debe reanudar
        player.queue_context(context("b")).await;
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.queued_count(), 1);

        player.play().await;
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(player.current().unwrap().track().identifier, "a");
    }

    #[tokio::test]
    async fn test_stop_keeps_pending_tracks() {
        let player = PlaybackController::new(GUILD, &deps());
        player.queue_context(context("a")).await;
        player.queue_context(context("b")).await;

        player.stop().await;

        assert_eq!(player.state(), PlaybackState::Idle);
        assert!(player.current().is_none());
        assert_eq!(player.queued_count(), 1);

        player.play().await;
        assert_eq!(player.current().unwrap().track().identifier, "b");
    }

    #[tokio::test]
    async fn test_skip_current_advances() {
        let mut permissions = MockSkipPermissions::new();
        permissions.expect_may_skip().returning(|_, _| true);
        let player = PlaybackController::new(
            GUILD,
            &deps_with(permissive_transport(), permissions, MockNoticeSink::new()),
        );
        player.queue_context(context("a")).await;
        player.queue_context(context("b")).await;

        let current_id = player.current().unwrap().stable_id();
        player.skip(UserId::new(1), &[current_id]).await;

        assert_eq!(player.current().unwrap().track().identifier, "b");
        assert_eq!(player.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_skip_denied_leaves_queue_untouched() {
        let mut permissions = MockSkipPermissions::new();
        permissions.expect_may_skip().returning(|_, _| false);
        let mut notices = MockNoticeSink::new();
        notices
            .expect_notify()
            .withf(|_, notice| *notice == LoadNotice::SkipDenied)
            .times(1)
            .returning(|_, _| ());

        let player = PlaybackController::new(
            GUILD,
            &deps_with(permissive_transport(), permissions, notices),
        );
        player.bind_channel(ChannelId::new(3));
        player.queue_context(context_for("a", 1)).await;
        player.queue_context(context_for("b", 9)).await;

        let queued_id = player.list(0, 1)[0].stable_id();
        player.skip(UserId::new(1), &[queued_id]).await;

        assert_eq!(player.queued_count(), 1);
        assert_eq!(player.current().unwrap().track().identifier, "a");
    }

    #[tokio::test]
    async fn test_skip_all_or_nothing_includes_current_owner() {
        // dueños mezclados con la política real "solo los míos": el dueño
        // del actual pide saltar también un track ajeno y no salta nada
        let mut deps = deps();
        deps.permissions = Arc::new(crate::engine::OwnTracksOnly);
        let player = PlaybackController::new(GUILD, &deps);

        player.queue_context(context_for("a", 1)).await;
        player.queue_context(context_for("b", 9)).await;

        let current_id = player.current().unwrap().stable_id();
        let queued_id = player.list(0, 1)[0].stable_id();
        player.skip(UserId::new(1), &[current_id, queued_id]).await;

        assert_eq!(player.current().unwrap().track().identifier, "a");
        assert_eq!(player.queued_count(), 1);
    }

    #[tokio::test]
    async fn test_destroy_deactivates() {
        let registry = PlayerRegistry::new(deps());
        let player = registry.get_or_create(GUILD);
        assert!(player.is_active());
        assert_eq!(registry.len(), 1);

        registry.destroy(GUILD).await;
        assert!(!player.is_active());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remaining_includes_live_position() {
        let mut transport = MockVoiceTransport::new();
        transport.expect_play().returning(|_, _| Ok(()));
        transport
            .expect_position()
            .returning(|_| Some(std::time::Duration::from_secs(60)));

        let player = PlaybackController::new(
            GUILD,
            &deps_with(transport, MockSkipPermissions::new(), MockNoticeSink::new()),
        );
        // los contextos de testutil duran 180s
        player.queue_context(context("a")).await;
        player.queue_context(context("b")).await;

        // 120s restantes del actual + 180s encolados
        assert_eq!(player.remaining_millis().await, 300_000);
    }
}
