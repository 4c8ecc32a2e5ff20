//! One entry point per user command.
//!
//! Mutating commands authorize first, then take the guild's session lock for
//! their whole duration, voice join and leave included. Read-only commands
//! (`queue`, `history`, `now_playing`, reading the volume) work on lock-free
//! snapshots.

use serenity::model::id::{ChannelId, GuildId, RoleId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::dispatcher::{AdvanceOutcome, TrackEndDispatcher};
use super::node::{NodeApi, SearchResult, TrackEndReason};
use super::registry::{SessionGuard, SessionRegistry};
use super::session::{PlaybackState, SessionSnapshot};
use super::track::Track;
use super::voice::{JoinOutcome, VoiceConnectionManager};
use crate::auth::{Actor, AuthorizationGate};
use crate::error::{AudioError, AudioResult};
use crate::storage::SettingsStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    Started(Track),
    Queued {
        track: Track,
        position: usize,
    },
    PlaylistQueued {
        name: String,
        count: usize,
        started: Option<Track>,
    },
    NoResults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipOutcome {
    pub skipped: Track,
    pub next: AdvanceOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub track: Track,
    pub position: Duration,
    pub state: PlaybackState,
    pub loop_mode: bool,
    pub autoplay: bool,
}

pub struct MusicController {
    registry: Arc<SessionRegistry>,
    node: Arc<dyn NodeApi>,
    voice: Arc<VoiceConnectionManager>,
    settings: Arc<SettingsStore>,
    gate: AuthorizationGate,
    dispatcher: Arc<TrackEndDispatcher>,
    search_prefix: String,
}

impl MusicController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        node: Arc<dyn NodeApi>,
        voice: Arc<VoiceConnectionManager>,
        settings: Arc<SettingsStore>,
        dispatcher: Arc<TrackEndDispatcher>,
        search_prefix: String,
    ) -> Self {
        Self {
            gate: AuthorizationGate::new(settings.clone()),
            registry,
            node,
            voice,
            settings,
            dispatcher,
            search_prefix,
        }
    }

    pub async fn join(
        &self,
        actor: &Actor,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> AudioResult<JoinOutcome> {
        self.gate.require_dj(actor, guild_id)?;
        let session = self.registry.lock_or_create(guild_id).await?;

        let outcome = self.voice.join(guild_id, channel_id).await;
        if outcome.is_err() {
            self.discard_if_unused(&session);
        }
        outcome
    }

    /// Busca, encola y arranca la reproducción si la sesión estaba parada
    pub async fn play(
        &self,
        actor: &Actor,
        guild_id: GuildId,
        channel_id: ChannelId,
        query: &str,
    ) -> AudioResult<PlayOutcome> {
        self.gate.require_dj(actor, guild_id)?;

        let query = query.trim();
        if query.is_empty() {
            return Err(AudioError::validation("la búsqueda no puede estar vacía"));
        }

        // Con el lock tomado dos /play simultáneos no pueden unirse dos veces
        let mut session = self.registry.lock_or_create(guild_id).await?;

        if !self.voice.is_connected(guild_id) {
            if let Err(e) = self.voice.join(guild_id, channel_id).await {
                self.discard_if_unused(&session);
                return Err(e);
            }
        }

        let identifier = if is_url(query) {
            query.to_string()
        } else {
            format!("{}:{}", self.search_prefix, query)
        };

        let (playlist, tracks) = match self.node.search(&identifier).await? {
            SearchResult::Empty => return Ok(PlayOutcome::NoResults),
            SearchResult::Tracks(tracks) => (None, tracks.into_iter().take(1).collect::<Vec<_>>()),
            SearchResult::Playlist { name, tracks } => (Some(name), tracks),
        };
        let mut tracks: Vec<Track> = tracks
            .into_iter()
            .map(|track| track.with_requester(actor.user_id))
            .collect();
        if tracks.is_empty() {
            return Ok(PlayOutcome::NoResults);
        }

        // La conexión pudo cerrarse mientras se buscaba
        session.ensure_live()?;
        if !self.voice.is_connected(guild_id) {
            self.registry.teardown(guild_id);
            return Err(AudioError::SessionGone);
        }

        let queued_before = session.queue().len();

        match playlist {
            Some(name) => {
                let count = session.queue_mut().enqueue_all(tracks);
                if count == 0 {
                    return Err(AudioError::validation("la cola está llena"));
                }
                let started = self.start_if_idle(&mut session, queued_before).await?;
                info!("📃 Playlist '{}' ({} canciones) en guild {}", name, count, guild_id);
                Ok(PlayOutcome::PlaylistQueued {
                    name,
                    count,
                    started,
                })
            }
            None => {
                let track = tracks.remove(0);
                let position = session.queue_mut().enqueue(track.clone())?;
                match self.start_if_idle(&mut session, queued_before).await? {
                    Some(started) => Ok(PlayOutcome::Started(started)),
                    None => Ok(PlayOutcome::Queued { track, position }),
                }
            }
        }
    }

    pub async fn skip(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<SkipOutcome> {
        self.gate.require_dj(actor, guild_id)?;
        let mut session = self.registry.lock(guild_id).await?;

        let skipped = session
            .current()
            .cloned()
            .ok_or_else(|| AudioError::validation("no hay nada reproduciéndose"))?;

        info!("⏭️ Saltando '{}' en guild {}", skipped.title(), guild_id);
        let next = self
            .dispatcher
            .advance(&mut session, skipped.clone(), TrackEndReason::Stopped)
            .await?;

        Ok(SkipOutcome { skipped, next })
    }

    /// Detiene la reproducción y vacía la cola. La conexión de voz se mantiene.
    pub async fn stop(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<usize> {
        self.gate.require_dj(actor, guild_id)?;
        let mut session = self.registry.lock(guild_id).await?;

        let current = session.current().cloned();
        if current.is_none() && session.queue().is_empty() {
            return Err(AudioError::validation("no hay nada reproduciéndose"));
        }

        if current.is_some() {
            self.node.stop(guild_id).await?;
            session.ensure_live()?;
        }

        let cleared = session.queue_mut().clear();
        if let Some(current) = current {
            session.retire(current);
        }

        info!("⏹️ Reproducción detenida en guild {}", guild_id);
        Ok(cleared)
    }

    pub async fn pause(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<()> {
        self.gate.require_dj(actor, guild_id)?;
        let mut session = self.registry.lock(guild_id).await?;

        session.ensure_can_pause()?;
        self.node.set_paused(guild_id, true).await?;
        session.ensure_live()?;
        session.pause()
    }

    pub async fn resume(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<()> {
        self.gate.require_dj(actor, guild_id)?;
        let mut session = self.registry.lock(guild_id).await?;

        session.ensure_can_resume()?;
        self.node.set_paused(guild_id, false).await?;
        session.ensure_live()?;
        session.resume()
    }

    /// Sin `level` devuelve el volumen guardado; con `level` lo valida, guarda y aplica
    pub async fn volume(
        &self,
        actor: &Actor,
        guild_id: GuildId,
        level: Option<i64>,
    ) -> AudioResult<u16> {
        let Some(level) = level else {
            return Ok(self.settings.volume(guild_id));
        };

        self.gate.require_dj(actor, guild_id)?;
        let volume = self.settings.set_volume(guild_id, level).await?;

        let playing = self
            .registry
            .snapshot(guild_id)
            .is_some_and(|snapshot| snapshot.current.is_some());
        if playing {
            if let Err(e) = self.node.set_volume(guild_id, volume).await {
                warn!("Volumen guardado pero no aplicado en guild {}: {}", guild_id, e);
            }
        }

        Ok(volume)
    }

    pub async fn toggle_loop(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<bool> {
        self.gate.require_dj(actor, guild_id)?;
        let mut session = self.registry.lock(guild_id).await?;
        Ok(session.toggle_loop())
    }

    pub async fn toggle_autoplay(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<bool> {
        self.gate.require_dj(actor, guild_id)?;
        let mut session = self.registry.lock(guild_id).await?;
        Ok(session.toggle_autoplay())
    }

    pub async fn shuffle(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<usize> {
        self.gate.require_dj(actor, guild_id)?;
        let mut session = self.registry.lock(guild_id).await?;
        session.queue_mut().shuffle()?;
        Ok(session.queue().len())
    }

    pub async fn clear(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<usize> {
        self.gate.require_dj(actor, guild_id)?;
        let mut session = self.registry.lock(guild_id).await?;
        Ok(session.queue_mut().clear())
    }

    pub async fn move_track(
        &self,
        actor: &Actor,
        guild_id: GuildId,
        from: i64,
        to: i64,
    ) -> AudioResult<Track> {
        self.gate.require_dj(actor, guild_id)?;
        let (from, to) = (position(from)?, position(to)?);
        let mut session = self.registry.lock(guild_id).await?;
        session.queue_mut().move_track(from, to)
    }

    pub async fn remove_track(
        &self,
        actor: &Actor,
        guild_id: GuildId,
        at: i64,
    ) -> AudioResult<Track> {
        self.gate.require_dj(actor, guild_id)?;
        let at = position(at)?;
        let mut session = self.registry.lock(guild_id).await?;
        session.queue_mut().remove_track(at)
    }

    /// Salta a `seconds` dentro del track actual
    pub async fn seek(&self, actor: &Actor, guild_id: GuildId, seconds: i64) -> AudioResult<Duration> {
        self.gate.require_dj(actor, guild_id)?;
        let session = self.registry.lock(guild_id).await?;

        let current = session
            .current()
            .ok_or_else(|| AudioError::validation("no hay nada reproduciéndose"))?;
        if current.is_stream() {
            return Err(AudioError::validation(
                "no se puede cambiar la posición de un stream en vivo",
            ));
        }

        let target = u64::try_from(seconds)
            .ok()
            .map(Duration::from_secs)
            .filter(|target| *target <= current.duration())
            .ok_or_else(|| {
                AudioError::validation(format!(
                    "la posición debe estar entre 0 y {} segundos",
                    current.duration().as_secs()
                ))
            })?;

        self.node.seek(guild_id, target).await?;
        session.ensure_live()?;
        Ok(target)
    }

    pub async fn replay(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<()> {
        self.seek(actor, guild_id, 0).await.map(|_| ())
    }

    pub async fn set_dj(&self, actor: &Actor, guild_id: GuildId, role_id: RoleId) -> AudioResult<()> {
        self.gate.require_admin(actor)?;
        self.settings.set_dj_role(guild_id, Some(role_id)).await
    }

    pub async fn clear_dj(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<()> {
        self.gate.require_admin(actor)?;
        self.settings.set_dj_role(guild_id, None).await
    }

    pub async fn leave(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<bool> {
        self.gate.require_dj(actor, guild_id)?;
        let _session = self.registry.lock(guild_id).await.ok();
        self.voice.leave(guild_id).await
    }

    /// Cierra todas las sesiones, sale de todos los canales y reinicia la
    /// conexión con el nodo. Devuelve cuántas sesiones se cerraron.
    pub async fn reset_node(&self, actor: &Actor) -> AudioResult<usize> {
        self.gate.require_admin(actor)?;
        warn!("🔁 Reinicio del sistema de música solicitado por {}", actor.user_id);

        let mut guilds = self.voice.guilds();
        for guild_id in self.registry.guilds() {
            if !guilds.contains(&guild_id) {
                guilds.push(guild_id);
            }
        }

        let mut closed = 0;
        for guild_id in guilds {
            let _session = self.registry.lock(guild_id).await.ok();
            match self.voice.leave(guild_id).await {
                Ok(true) => closed += 1,
                Ok(false) => {
                    if self.registry.teardown(guild_id) {
                        closed += 1;
                    }
                }
                // La sesión ya se destruyó antes de fallar la salida del canal
                Err(e) => {
                    warn!("Error al salir de guild {} durante el reinicio: {}", guild_id, e);
                    closed += 1;
                }
            }
        }

        self.node.reset();
        info!("🔁 Sistema de música reiniciado, {} sesiones cerradas", closed);
        Ok(closed)
    }

    /// El bot fue expulsado o su canal desapareció
    pub async fn handle_voice_lost(&self, guild_id: GuildId) -> bool {
        self.voice.handle_voice_lost(guild_id).await
    }

    // Solo lectura

    pub fn queue(&self, guild_id: GuildId) -> Arc<SessionSnapshot> {
        self.registry
            .snapshot(guild_id)
            .unwrap_or_else(|| Arc::new(SessionSnapshot::empty(guild_id)))
    }

    pub fn history(&self, guild_id: GuildId) -> Arc<SessionSnapshot> {
        self.queue(guild_id)
    }

    pub fn now_playing(&self, guild_id: GuildId) -> Option<NowPlaying> {
        let snapshot = self.registry.snapshot(guild_id)?;
        let track = snapshot.current.clone()?;

        // El nodo puede reportar algo más que la duración justo al terminar
        let reported = self.node.position(guild_id).unwrap_or_default();
        let position = if track.is_stream() {
            reported
        } else {
            reported.min(track.duration())
        };

        Some(NowPlaying {
            track,
            position,
            state: snapshot.state,
            loop_mode: snapshot.loop_mode,
            autoplay: snapshot.autoplay,
        })
    }

    // Métodos privados

    /// Arranca el primero de la cola si no suena nada. Si el nodo falla, la
    /// cola vuelve a tener sus primeros `queued_before` tracks.
    async fn start_if_idle(
        &self,
        session: &mut SessionGuard,
        queued_before: usize,
    ) -> AudioResult<Option<Track>> {
        if session.current().is_some() {
            return Ok(None);
        }
        let Some(next) = session.queue_mut().dequeue_next() else {
            return Ok(None);
        };

        match self.dispatcher.start_track(session, &next).await {
            Ok(()) => {
                session.start_track(next.clone(), None);
                Ok(Some(next))
            }
            Err(e) => {
                session.queue_mut().enqueue_front(next);
                let dropped = session.queue_mut().truncate(queued_before);
                warn!(
                    "No se pudo iniciar la reproducción en guild {}, se descartan {} tracks: {}",
                    session.guild_id(),
                    dropped,
                    e
                );
                Err(e)
            }
        }
    }

    /// Una sesión recién creada que no llegó a conectarse no debe quedar registrada
    fn discard_if_unused(&self, session: &SessionGuard) {
        let guild_id = session.guild_id();
        if session.current().is_none()
            && session.queue().is_empty()
            && !self.voice.is_connected(guild_id)
        {
            self.registry.teardown(guild_id);
        }
    }
}

fn is_url(query: &str) -> bool {
    url::Url::parse(query)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn position(value: i64) -> AudioResult<usize> {
    usize::try_from(value)
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| AudioError::validation(format!("posición inválida: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::node::MockNodeApi;
    use crate::audio::voice::{MockVoiceGateway, VoiceGateway, VoiceServer};
    use crate::storage::DEFAULT_VOLUME;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guild() -> GuildId {
        GuildId::new(3)
    }

    fn channel() -> ChannelId {
        ChannelId::new(30)
    }

    fn admin() -> Actor {
        Actor::new(UserId::new(1), true, vec![])
    }

    fn listener() -> Actor {
        Actor::new(UserId::new(2), false, vec![])
    }

    fn track(name: &str) -> Track {
        Track::new(name, name, name, "artist", Duration::from_secs(120))
    }

    struct Harness {
        controller: MusicController,
        registry: Arc<SessionRegistry>,
        _dir: tempfile::TempDir,
    }

    fn voice_server() -> VoiceServer {
        VoiceServer {
            endpoint: "e".into(),
            session_id: "s".into(),
            token: "t".into(),
        }
    }

    /// Gateway lento que cuenta cuántas veces se une a un canal
    #[derive(Default)]
    struct SlowGateway {
        joins: AtomicUsize,
    }

    #[async_trait]
    impl VoiceGateway for SlowGateway {
        async fn join(&self, _guild_id: GuildId, _channel_id: ChannelId) -> AudioResult<VoiceServer> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(voice_server())
        }

        async fn leave(&self, _guild_id: GuildId) -> AudioResult<()> {
            Ok(())
        }
    }

    fn gateway() -> MockVoiceGateway {
        let mut gateway = MockVoiceGateway::new();
        gateway.expect_join().returning(|_, _| Ok(voice_server()));
        gateway.expect_leave().returning(|_| Ok(()));
        gateway
    }

    fn node() -> MockNodeApi {
        let mut node = MockNodeApi::new();
        node.expect_bind_voice().return_const(());
        node.expect_release_voice().return_const(());
        node.expect_destroy().returning(|_| Ok(()));
        node.expect_set_volume().returning(|_, _| Ok(()));
        node
    }

    async fn harness(node: MockNodeApi) -> Harness {
        harness_with(node, Arc::new(gateway())).await
    }

    async fn harness_with(node: MockNodeApi, gateway: Arc<dyn VoiceGateway>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(
            SettingsStore::new(dir.path().to_path_buf(), DEFAULT_VOLUME)
                .await
                .unwrap(),
        );
        let registry = Arc::new(SessionRegistry::new(100, 100));
        let node: Arc<dyn NodeApi> = Arc::new(node);
        let voice = Arc::new(VoiceConnectionManager::new(
            gateway,
            node.clone(),
            registry.clone(),
        ));
        let dispatcher = Arc::new(TrackEndDispatcher::new(
            registry.clone(),
            node.clone(),
            voice.clone(),
            settings.clone(),
            "ytsearch".into(),
        ));

        Harness {
            controller: MusicController::new(
                registry.clone(),
                node,
                voice,
                settings,
                dispatcher,
                "ytsearch".into(),
            ),
            registry,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn first_play_starts_and_second_queues() {
        let mut node = node();
        let mut results = vec![track("second"), track("first")];
        node.expect_search()
            .times(2)
            .returning(move |_| Ok(SearchResult::Tracks(vec![results.pop().unwrap()])));
        node.expect_play().times(1).returning(|_, _| Ok(()));

        let h = harness(node).await;

        let first = h.controller.play(&admin(), guild(), channel(), "first").await.unwrap();
        assert!(matches!(first, PlayOutcome::Started(ref t) if t.title() == "first"));

        let second = h.controller.play(&admin(), guild(), channel(), "second").await.unwrap();
        assert!(matches!(second, PlayOutcome::Queued { position: 1, .. }));

        let snapshot = h.controller.queue(guild());
        assert_eq!(snapshot.current.as_ref().map(Track::title), Some("first"));
        assert_eq!(snapshot.current.as_ref().and_then(Track::requester), Some(UserId::new(1)));
        assert_eq!(snapshot.queue.len(), 1);
    }

    #[tokio::test]
    async fn empty_search_is_not_an_error() {
        let mut node = node();
        node.expect_search().returning(|_| Ok(SearchResult::Empty));
        node.expect_play().never();

        let h = harness(node).await;
        assert_eq!(
            h.controller.play(&admin(), guild(), channel(), "nada").await,
            Ok(PlayOutcome::NoResults)
        );
    }

    #[tokio::test]
    async fn unauthorized_actor_changes_nothing() {
        let mut node = node();
        node.expect_search().never();

        let h = harness(node).await;
        h.controller.set_dj(&admin(), guild(), RoleId::new(9)).await.unwrap();

        assert!(matches!(
            h.controller.play(&listener(), guild(), channel(), "x").await,
            Err(AudioError::Unauthorized(_))
        ));
        assert!(matches!(
            h.controller.set_dj(&listener(), guild(), RoleId::new(10)).await,
            Err(AudioError::Unauthorized(_))
        ));
        assert!(h.registry.get(guild()).is_none());
    }

    #[tokio::test]
    async fn failed_start_leaves_queue_as_it_was() {
        let mut node = node();
        node.expect_search()
            .returning(|_| Ok(SearchResult::Tracks(vec![track("a")])));
        node.expect_play()
            .times(2)
            .returning(|_, _| Err(AudioError::NodeTimeout));

        let h = harness(node).await;

        assert_eq!(
            h.controller.play(&admin(), guild(), channel(), "a").await,
            Err(AudioError::NodeTimeout)
        );
        let snapshot = h.controller.queue(guild());
        assert!(snapshot.current.is_none());
        assert!(snapshot.queue.is_empty());
    }

    #[tokio::test]
    async fn failed_playlist_start_drops_only_the_new_tracks() {
        let mut node = node();
        node.expect_search().returning(|_| {
            Ok(SearchResult::Playlist {
                name: "mix".into(),
                tracks: vec![track("p1"), track("p2")],
            })
        });
        node.expect_play()
            .times(2)
            .returning(|_, _| Err(AudioError::Node("HTTP 400".into())));

        let h = harness(node).await;
        h.controller.join(&admin(), guild(), channel()).await.unwrap();
        {
            let mut session = h.registry.lock(guild()).await.unwrap();
            session.queue_mut().enqueue(track("old")).unwrap();
        }

        assert!(h.controller.play(&admin(), guild(), channel(), "mix").await.is_err());

        let snapshot = h.controller.queue(guild());
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.queue, vec![track("old")]);
    }

    #[tokio::test]
    async fn concurrent_plays_join_voice_once() {
        let mut node = node();
        node.expect_search()
            .returning(|_| Ok(SearchResult::Tracks(vec![track("a")])));
        node.expect_play().times(1).returning(|_, _| Ok(()));

        let gateway = Arc::new(SlowGateway::default());
        let h = harness_with(node, gateway.clone()).await;

        let (admin_a, admin_b) = (admin(), admin());
        let (first, second) = tokio::join!(
            h.controller.play(&admin_a, guild(), channel(), "a"),
            h.controller.play(&admin_b, guild(), channel(), "a")
        );

        assert_eq!(gateway.joins.load(Ordering::SeqCst), 1);
        assert!(matches!(first, Ok(PlayOutcome::Started(_))));
        assert!(matches!(second, Ok(PlayOutcome::Queued { position: 1, .. })));
    }

    #[tokio::test]
    async fn failed_join_leaves_no_session() {
        let mut node = node();
        node.expect_search().never();

        let mut gateway = MockVoiceGateway::new();
        gateway
            .expect_join()
            .returning(|_, _| Err(AudioError::Voice("sin permisos".into())));

        let h = harness_with(node, Arc::new(gateway)).await;

        assert!(matches!(
            h.controller.play(&admin(), guild(), channel(), "a").await,
            Err(AudioError::Voice(_))
        ));
        assert!(h.registry.get(guild()).is_none());
    }

    #[tokio::test]
    async fn reset_node_is_admin_only() {
        let mut node = node();
        node.expect_reset().never();

        let h = harness(node).await;

        assert!(matches!(
            h.controller.reset_node(&listener()).await,
            Err(AudioError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn reset_node_closes_sessions_and_reconnects() {
        let mut node = node();
        node.expect_search()
            .returning(|_| Ok(SearchResult::Tracks(vec![track("a")])));
        node.expect_play().returning(|_, _| Ok(()));
        node.expect_reset().times(1).return_const(());

        let h = harness(node).await;
        h.controller.play(&admin(), guild(), channel(), "a").await.unwrap();
        let handle = h.registry.get(guild()).unwrap();

        assert_eq!(h.controller.reset_node(&admin()).await, Ok(1));

        assert!(handle.is_closed());
        assert!(h.registry.is_empty());
        assert!(h.controller.now_playing(guild()).is_none());
    }

    #[tokio::test]
    async fn volume_out_of_range_keeps_previous_value() {
        let h = harness(node()).await;

        assert_eq!(h.controller.volume(&admin(), guild(), Some(80)).await, Ok(80));
        assert!(matches!(
            h.controller.volume(&admin(), guild(), Some(250)).await,
            Err(AudioError::Validation(_))
        ));
        assert_eq!(h.controller.volume(&listener(), guild(), None).await, Ok(80));
    }

    #[tokio::test]
    async fn seek_is_bounded_by_track_length() {
        let mut node = node();
        node.expect_search()
            .returning(|_| Ok(SearchResult::Tracks(vec![track("a")])));
        node.expect_play().returning(|_, _| Ok(()));
        node.expect_seek().times(2).returning(|_, _| Ok(()));

        let h = harness(node).await;
        h.controller.play(&admin(), guild(), channel(), "a").await.unwrap();

        assert_eq!(
            h.controller.seek(&admin(), guild(), 60).await,
            Ok(Duration::from_secs(60))
        );
        assert!(h.controller.seek(&admin(), guild(), 121).await.is_err());
        assert!(h.controller.seek(&admin(), guild(), -1).await.is_err());
        assert!(h.controller.replay(&admin(), guild()).await.is_ok());
    }

    #[tokio::test]
    async fn stop_clears_queue_but_stays_connected() {
        let mut node = node();
        let mut results = vec![track("b"), track("a")];
        node.expect_search()
            .returning(move |_| Ok(SearchResult::Tracks(vec![results.pop().unwrap_or_else(|| track("z"))])));
        node.expect_play().returning(|_, _| Ok(()));
        node.expect_stop().times(1).returning(|_| Ok(()));

        let h = harness(node).await;
        h.controller.play(&admin(), guild(), channel(), "a").await.unwrap();
        h.controller.play(&admin(), guild(), channel(), "b").await.unwrap();

        assert_eq!(h.controller.stop(&admin(), guild()).await, Ok(1));

        let snapshot = h.controller.queue(guild());
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.queue.is_empty());
        assert_eq!(snapshot.history[0].track.title(), "a");
        assert!(h.controller.stop(&admin(), guild()).await.is_err());
    }

    #[tokio::test]
    async fn pause_resume_round() {
        let mut node = node();
        node.expect_search()
            .returning(|_| Ok(SearchResult::Tracks(vec![track("a")])));
        node.expect_play().returning(|_, _| Ok(()));
        node.expect_set_paused().times(2).returning(|_, _| Ok(()));

        let h = harness(node).await;
        assert_eq!(
            h.controller.pause(&admin(), guild()).await,
            Err(AudioError::SessionGone)
        );

        h.controller.play(&admin(), guild(), channel(), "a").await.unwrap();
        h.controller.pause(&admin(), guild()).await.unwrap();
        assert!(h.controller.pause(&admin(), guild()).await.is_err());
        h.controller.resume(&admin(), guild()).await.unwrap();
        assert_eq!(h.controller.queue(guild()).state, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn leave_twice_is_harmless() {
        let mut node = node();
        node.expect_search()
            .returning(|_| Ok(SearchResult::Tracks(vec![track("a")])));
        node.expect_play().returning(|_, _| Ok(()));

        let h = harness(node).await;
        h.controller.play(&admin(), guild(), channel(), "a").await.unwrap();

        assert_eq!(h.controller.leave(&admin(), guild()).await, Ok(true));
        assert_eq!(h.controller.leave(&admin(), guild()).await, Ok(false));
        assert!(h.controller.now_playing(guild()).is_none());
    }

    #[test]
    fn urls_pass_through_untouched() {
        assert!(is_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_url("never gonna give you up"));
        assert!(!is_url("ytsearch:song"));
    }
}
