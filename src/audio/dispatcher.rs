//! Drives the playback state machine when the node reports a finished track.
//!
//! Policy, in order: loop re-enqueue, next queued track, autoplay search,
//! disconnect. The whole policy runs under the guild's session lock, so it
//! never interleaves with a command for the same guild.

use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::node::{NodeApi, NodeEvent, TrackEndEvent, TrackEndReason};
use super::registry::{SessionGuard, SessionRegistry};
use super::session::PlaybackState;
use super::track::Track;
use super::voice::VoiceConnectionManager;
use crate::error::{AudioError, AudioResult};
use crate::storage::SettingsStore;

/// Códigos de cierre de Discord que significan "ya no estás en el canal"
const VOICE_DISCONNECTED_CODES: [u16; 2] = [4006, 4014];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Playing(Track),
    Autoplay(Track),
    Idle,
}

pub struct TrackEndDispatcher {
    registry: Arc<SessionRegistry>,
    node: Arc<dyn NodeApi>,
    voice: Arc<VoiceConnectionManager>,
    settings: Arc<SettingsStore>,
    search_prefix: String,
}

impl TrackEndDispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        node: Arc<dyn NodeApi>,
        voice: Arc<VoiceConnectionManager>,
        settings: Arc<SettingsStore>,
        search_prefix: String,
    ) -> Self {
        Self {
            registry,
            node,
            voice,
            settings,
            search_prefix,
        }
    }

    /// Consume eventos del nodo; cada uno se procesa en su propia tarea
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<NodeEvent>) {
        info!("🎛️ Dispatcher de fin de track iniciado");

        while let Some(event) = events.recv().await {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.handle_event(event).await;
            });
        }

        info!("🎛️ Dispatcher de fin de track detenido");
    }

    pub async fn handle_event(&self, event: NodeEvent) {
        let result = match event {
            NodeEvent::TrackEnd(event) => self.on_track_end(event).await,
            NodeEvent::VoiceClosed { guild_id, code } => {
                if VOICE_DISCONNECTED_CODES.contains(&code) {
                    self.voice.handle_voice_lost(guild_id).await;
                }
                Ok(())
            }
            NodeEvent::SessionLost => {
                for guild_id in self.registry.guilds() {
                    if let Err(e) = self.recover(guild_id).await {
                        warn!("No se pudo recuperar la reproducción en guild {}: {}", guild_id, e);
                    }
                }
                Ok(())
            }
        };

        match result {
            Ok(()) | Err(AudioError::SessionGone) => {}
            Err(e) => warn!("⚠️ Error procesando evento del nodo: {}", e),
        }
    }

    pub async fn on_track_end(&self, event: TrackEndEvent) -> AudioResult<()> {
        let mut session = match self.registry.lock(event.guild_id).await {
            Ok(session) => session,
            Err(AudioError::SessionGone) => {
                debug!("Fin de track en guild {} sin sesión, se ignora", event.guild_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // El track fue reemplazado por otro que ya inició esta misma política
        if event.reason == TrackEndReason::Replaced {
            debug!("'{}' reemplazado en guild {}", event.track.title(), event.guild_id);
            return Ok(());
        }

        match session.current() {
            Some(current) if current.same_source(&event.track) => {}
            _ => {
                debug!(
                    "Evento obsoleto para '{}' en guild {}, se ignora",
                    event.track.title(),
                    event.guild_id
                );
                return Ok(());
            }
        }

        // El evento trae el track del nodo; el de la sesión conserva el solicitante
        let finished = session.current().cloned().unwrap_or(event.track);
        let outcome = self.advance(&mut session, finished, event.reason).await?;
        debug!("Guild {}: {:?}", event.guild_id, outcome);
        Ok(())
    }

    /// Aplica la política de avance sobre una sesión ya bloqueada.
    ///
    /// `finished` es el track que acaba de terminar (o que se está saltando).
    pub async fn advance(
        &self,
        session: &mut SessionGuard,
        finished: Track,
        reason: TrackEndReason,
    ) -> AudioResult<AdvanceOutcome> {
        let guild_id = session.guild_id();

        // 1. Loop
        if session.loop_mode() && reason == TrackEndReason::Finished {
            session.queue_mut().enqueue_front(finished.clone());
        }

        // 2. Siguiente en cola; un track que no arranca se descarta y se prueba el siguiente
        while let Some(next) = session.queue_mut().dequeue_next() {
            match self.start_track(session, &next).await {
                Ok(()) => {
                    session.start_track(next.clone(), Some(finished));
                    return Ok(AdvanceOutcome::Playing(next));
                }
                Err(AudioError::SessionGone) => return Err(AudioError::SessionGone),
                Err(e) => warn!(
                    "⏭️ Descartando '{}' en guild {}: {}",
                    next.title(),
                    guild_id,
                    e
                ),
            }
        }

        // 3. Autoplay
        if session.autoplay() && finished.has_known_length() {
            if let Some(candidate) = self.autoplay_candidate(&finished).await {
                session.ensure_live()?;
                match self.start_track(session, &candidate).await {
                    Ok(()) => {
                        info!("📻 Autoplay en guild {}: {}", guild_id, candidate.title());
                        session.start_track(candidate.clone(), Some(finished));
                        return Ok(AdvanceOutcome::Autoplay(candidate));
                    }
                    Err(AudioError::SessionGone) => return Err(AudioError::SessionGone),
                    Err(e) => warn!("📻 Autoplay falló en guild {}: {}", guild_id, e),
                }
            }
        }

        // 4. Nada más que reproducir
        session.retire(finished);
        info!("📭 Nada más que reproducir en guild {}, desconectando", guild_id);

        match self.voice.leave(guild_id).await {
            Ok(true) => {}
            Ok(false) => {
                self.registry.teardown(guild_id);
            }
            Err(e) => warn!("Error al desconectar de guild {}: {}", guild_id, e),
        }

        Ok(AdvanceOutcome::Idle)
    }

    /// Pide al nodo que reproduzca `track`, con un reintento ante errores de red,
    /// y aplica el volumen persistido
    pub async fn start_track(&self, session: &SessionGuard, track: &Track) -> AudioResult<()> {
        let guild_id = session.guild_id();

        let mut attempt = 1;
        loop {
            let result = self.node.play(guild_id, track).await;
            session.ensure_live()?;

            match result {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt < 2 => {
                    warn!(
                        "🔄 Error iniciando '{}' en guild {} ({}), reintentando",
                        track.title(),
                        guild_id,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let volume = self.settings.volume(guild_id);
        if let Err(e) = self.node.set_volume(guild_id, volume).await {
            warn!("No se pudo aplicar el volumen {}% en guild {}: {}", volume, guild_id, e);
        }
        session.ensure_live()
    }

    /// Vuelve a crear el player de una sesión tras perder la sesión del nodo
    pub async fn recover(&self, guild_id: GuildId) -> AudioResult<()> {
        let mut session = self.registry.lock(guild_id).await?;
        let Some(current) = session.current().cloned() else {
            return Ok(());
        };
        let position = self.node.position(guild_id);

        match self.start_track(&session, &current).await {
            Ok(()) => {
                info!("♻️ Reproducción restaurada en guild {}: {}", guild_id, current.title());
                if let Some(position) = position.filter(|p| !p.is_zero()) {
                    if let Err(e) = self.node.seek(guild_id, position).await {
                        debug!("No se pudo restaurar la posición en guild {}: {}", guild_id, e);
                    }
                }
                if session.state() == PlaybackState::Paused {
                    self.node.set_paused(guild_id, true).await?;
                }
                Ok(())
            }
            Err(AudioError::SessionGone) => Err(AudioError::SessionGone),
            Err(e) => {
                warn!("No se pudo restaurar '{}' en guild {}: {}", current.title(), guild_id, e);
                self.advance(&mut session, current, TrackEndReason::Error)
                    .await
                    .map(|_| ())
            }
        }
    }

    async fn autoplay_candidate(&self, finished: &Track) -> Option<Track> {
        let query = format!(
            "{}:{} {}",
            self.search_prefix,
            finished.title(),
            finished.author()
        );

        match self.node.search(&query).await {
            Ok(result) => {
                let candidate = result
                    .into_tracks()
                    .into_iter()
                    .find(|candidate| !candidate.same_source(finished));
                if candidate.is_none() {
                    debug!("📻 Autoplay sin candidatos para '{}'", query);
                }
                candidate
            }
            Err(e) => {
                warn!("📻 Búsqueda de autoplay falló: {}", e);
                None
            }
        }
    }
}
