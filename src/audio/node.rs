//! Client for the external audio node (Lavalink v4).
//!
//! The node does the actual decoding and streaming; this module only speaks
//! its protocol. A background task keeps the WebSocket session alive
//! (`Disconnected -> Connecting -> Ready`), reconnecting with exponential
//! backoff, and forwards playback events as [`NodeEvent`]s. Once the retry
//! budget is spent the task parks until [`NodeApi::reset`]. REST calls fail
//! fast with [`AudioError::NodeUnavailable`] unless the node is `Ready`, and
//! every call is bounded by the configured request timeout.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, UserId};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use super::protocol::{
    self, EventPayload, Incoming, LoadResult, ReadyPayload, UpdatePlayer, UpdateSession,
    UpdateTrack, VoiceStateBody, WireEndReason,
};
use super::track::Track;
use super::voice::VoiceServer;
use crate::config::Config;
use crate::error::{AudioError, AudioResult};
use crate::storage::write_durable;

/// Sin mensajes del nodo durante este tiempo se da la sesión por perdida.
/// Lavalink envía `stats` cada minuto.
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Segundos que el nodo conserva los players si se cae el WebSocket
const RESUME_TIMEOUT_SECS: u64 = 60;
const IDENTITY_FILE: &str = "node_identity.json";

type NodeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Disconnected,
    Connecting,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    Finished,
    Stopped,
    Replaced,
    Error,
}

impl From<WireEndReason> for TrackEndReason {
    fn from(reason: WireEndReason) -> Self {
        match reason {
            WireEndReason::Finished => TrackEndReason::Finished,
            WireEndReason::LoadFailed => TrackEndReason::Error,
            WireEndReason::Stopped | WireEndReason::Cleanup => TrackEndReason::Stopped,
            WireEndReason::Replaced => TrackEndReason::Replaced,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackEndEvent {
    pub guild_id: GuildId,
    pub track: Track,
    pub reason: TrackEndReason,
}

#[derive(Debug, Clone)]
pub enum NodeEvent {
    TrackEnd(TrackEndEvent),
    /// Discord cerró la conexión de voz del player en el nodo
    VoiceClosed { guild_id: GuildId, code: u16 },
    /// El nodo abrió una sesión nueva: los players anteriores ya no existen
    SessionLost,
}

/// Resultado de una búsqueda en el nodo
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    Empty,
    Tracks(Vec<Track>),
    Playlist { name: String, tracks: Vec<Track> },
}

impl SearchResult {
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            SearchResult::Empty => Vec::new(),
            SearchResult::Tracks(tracks) => tracks,
            SearchResult::Playlist { tracks, .. } => tracks,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SearchResult::Empty => 0,
            SearchResult::Tracks(tracks) => tracks.len(),
            SearchResult::Playlist { tracks, .. } => tracks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TryFrom<LoadResult> for SearchResult {
    type Error = AudioError;

    fn try_from(result: LoadResult) -> AudioResult<Self> {
        Ok(match result {
            LoadResult::Track(track) => SearchResult::Tracks(vec![track.into()]),
            LoadResult::Search(tracks) => {
                SearchResult::Tracks(tracks.into_iter().map(Track::from).collect())
            }
            LoadResult::Playlist(playlist) => SearchResult::Playlist {
                name: playlist.info.name,
                tracks: playlist.tracks.into_iter().map(Track::from).collect(),
            },
            LoadResult::Empty(_) => SearchResult::Empty,
            LoadResult::Error(exception) => {
                return Err(AudioError::Node(exception.message.unwrap_or_else(|| {
                    format!("error de carga ({})", exception.severity)
                })))
            }
        })
    }
}

/// Operaciones de reproducción que el resto del bot necesita del nodo
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeApi: Send + Sync {
    fn state(&self) -> NodeState;

    /// Registra los datos de voz con los que se crean los players del servidor
    fn bind_voice(&self, guild_id: GuildId, voice: VoiceServer);

    fn release_voice(&self, guild_id: GuildId);

    /// Última posición reportada por el nodo
    fn position(&self, guild_id: GuildId) -> Option<Duration>;

    async fn search(&self, query: &str) -> AudioResult<SearchResult>;

    async fn play(&self, guild_id: GuildId, track: &Track) -> AudioResult<()>;

    async fn stop(&self, guild_id: GuildId) -> AudioResult<()>;

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> AudioResult<()>;

    async fn set_volume(&self, guild_id: GuildId, percent: u16) -> AudioResult<()>;

    async fn seek(&self, guild_id: GuildId, position: Duration) -> AudioResult<()>;

    /// Reenvía al player los datos de voz registrados (tras moverse de canal)
    async fn refresh_voice(&self, guild_id: GuildId) -> AudioResult<()>;

    async fn destroy(&self, guild_id: GuildId) -> AudioResult<()>;

    /// Descarta la sesión del nodo y fuerza una conexión nueva,
    /// aunque se hayan agotado los reintentos
    fn reset(&self);
}

#[derive(Debug, Clone)]
pub struct NodeEndpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
}

impl NodeEndpoint {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.lavalink_host.clone(),
            port: config.lavalink_port,
            password: config.lavalink_password.clone(),
            secure: config.lavalink_secure,
        }
    }

    fn rest_url(&self, path: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, path)
    }

    fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/v4/websocket", scheme, self.host, self.port)
    }
}

/// Identidad estable del cliente frente al nodo, persistida entre reinicios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub identifier: Uuid,
    pub last_session_id: Option<String>,
}

impl NodeIdentity {
    pub async fn load_or_create(data_dir: &Path) -> AudioResult<Self> {
        let path = data_dir.join(IDENTITY_FILE);

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<NodeIdentity>(&content) {
                Ok(identity) => {
                    debug!("🪪 Identidad del nodo cargada: {}", identity.identifier);
                    return Ok(identity);
                }
                Err(e) => warn!("Identidad del nodo corrupta ({}), se genera otra", e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let identity = NodeIdentity {
            identifier: Uuid::new_v4(),
            last_session_id: None,
        };
        identity.save(data_dir).await?;
        info!("🪪 Nueva identidad del nodo: {}", identity.identifier);
        Ok(identity)
    }

    pub async fn save(&self, data_dir: &Path) -> AudioResult<()> {
        let content =
            serde_json::to_vec_pretty(self).map_err(|e| AudioError::Storage(e.to_string()))?;
        write_durable(&data_dir.join(IDENTITY_FILE), &content).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.node_reconnect_max_attempts,
            base_delay: config.node_reconnect_base_delay(),
            max_delay: MAX_RECONNECT_DELAY,
        }
    }

    /// Espera antes del intento `attempt` (1-based). El primero es inmediato.
    /// `None` cuando se agotaron los intentos.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        if attempt == 1 {
            return Some(Duration::ZERO);
        }
        let exponent = (attempt - 2).min(16);
        Some(
            self.base_delay
                .saturating_mul(1u32 << exponent)
                .min(self.max_delay),
        )
    }
}

pub struct AudioNodeClient {
    endpoint: NodeEndpoint,
    user_id: UserId,
    data_dir: PathBuf,
    identity: RwLock<NodeIdentity>,
    http: reqwest::Client,
    request_timeout: Duration,
    reconnect: ReconnectPolicy,
    state: watch::Sender<NodeState>,
    session_id: RwLock<Option<String>>,
    voice: DashMap<GuildId, VoiceServer>,
    positions: DashMap<GuildId, Duration>,
    events: mpsc::UnboundedSender<NodeEvent>,
    running: AtomicBool,
    reset: Notify,
    shutdown: CancellationToken,
}

impl AudioNodeClient {
    pub fn new(
        config: &Config,
        user_id: UserId,
        identity: NodeIdentity,
        shutdown: CancellationToken,
    ) -> AudioResult<(Arc<Self>, mpsc::UnboundedReceiver<NodeEvent>)> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("quasar-music/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AudioError::Node(format!("no se pudo crear el cliente HTTP: {}", e)))?;

        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(NodeState::Disconnected);

        let client = Self {
            endpoint: NodeEndpoint::from_config(config),
            user_id,
            data_dir: config.data_dir.clone(),
            identity: RwLock::new(identity),
            http,
            request_timeout: config.node_request_timeout(),
            reconnect: ReconnectPolicy::from_config(config),
            state,
            session_id: RwLock::new(None),
            voice: DashMap::new(),
            positions: DashMap::new(),
            events,
            running: AtomicBool::new(false),
            reset: Notify::new(),
            shutdown,
        };

        Ok((Arc::new(client), receiver))
    }

    pub fn identifier(&self) -> Uuid {
        self.identity.read().identifier
    }

    pub fn subscribe_state(&self) -> watch::Receiver<NodeState> {
        self.state.subscribe()
    }

    /// Arranca la tarea de conexión. No hace nada si ya está corriendo.
    pub fn connect(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("La conexión con el nodo ya está en marcha");
            return None;
        }

        let node = self.clone();
        Some(tokio::spawn(async move {
            node.connection_loop().await;
            node.running.store(false, Ordering::Release);
        }))
    }

    // Conexión

    async fn connection_loop(&self) {
        info!(
            "🔗 Conectando al nodo de audio en {}",
            self.endpoint.websocket_url()
        );

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                match self.reconnect.delay_for(attempt) {
                    Some(delay) => {
                        if !delay.is_zero() {
                            info!(
                                "🔄 Reintento {} de conexión al nodo en {}",
                                attempt,
                                humantime::format_duration(delay)
                            );
                        }

                        tokio::select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = self.reset.notified() => {
                                info!("🔁 Reinicio del nodo solicitado, reconectando ya");
                                attempt = 1;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        error!(
                            "❌ Nodo de audio inalcanzable tras {} intentos, esperando un reinicio manual",
                            attempt - 1
                        );

                        // Queda en Disconnected hasta un reset o el apagado
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = self.reset.notified() => {
                                info!("🔁 Reinicio del nodo solicitado, se reanudan los intentos");
                                attempt = 1;
                            }
                        }
                    }
                }
            }

            self.set_state(NodeState::Connecting);

            let reached_ready = match self.open_socket().await {
                Ok(socket) => self.drive_socket(socket).await,
                Err(e) => {
                    warn!("⚠️ No se pudo abrir el WebSocket del nodo: {}", e);
                    false
                }
            };

            self.set_state(NodeState::Disconnected);

            if self.shutdown.is_cancelled() {
                break;
            }

            // Tras perder una sesión Ready se reintenta de inmediato
            attempt = if reached_ready { 1 } else { attempt + 1 };
        }

        self.set_state(NodeState::Disconnected);
        info!("🔌 Tarea de conexión al nodo terminada");
    }

    async fn open_socket(&self) -> AudioResult<NodeSocket> {
        let mut request = self
            .endpoint
            .websocket_url()
            .into_client_request()
            .map_err(|e| AudioError::Node(e.to_string()))?;

        let client_name = format!(
            "quasar-music/{} ({})",
            env!("CARGO_PKG_VERSION"),
            self.identifier()
        );
        let resume_session = self.session_id.read().clone();

        let headers = request.headers_mut();
        headers.insert("Authorization", header_value(&self.endpoint.password)?);
        headers.insert("User-Id", header_value(&self.user_id.to_string())?);
        headers.insert("Client-Name", header_value(&client_name)?);
        if let Some(session_id) = resume_session {
            debug!("Intentando reanudar la sesión {}", session_id);
            headers.insert("Session-Id", header_value(&session_id)?);
        }

        let (socket, _) = tokio::time::timeout(
            self.request_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| AudioError::NodeTimeout)?
        .map_err(|e| {
            debug!("Error de WebSocket: {}", e);
            AudioError::NodeUnavailable
        })?;

        Ok(socket)
    }

    /// Procesa mensajes hasta que la conexión se pierde.
    /// Devuelve si la sesión llegó a estar Ready.
    async fn drive_socket(&self, mut socket: NodeSocket) -> bool {
        let mut reached_ready = false;

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = socket.close(None).await;
                    return reached_ready;
                }
                _ = self.reset.notified() => {
                    info!("🔁 Cerrando la sesión actual del nodo por reinicio");
                    let _ = socket.close(None).await;
                    return true;
                }
                next = tokio::time::timeout(LIVENESS_TIMEOUT, socket.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    warn!(
                        "💔 Sin noticias del nodo en {}, se da la conexión por perdida",
                        humantime::format_duration(LIVENESS_TIMEOUT)
                    );
                    return reached_ready;
                }
                Ok(None) => {
                    warn!("🔌 WebSocket del nodo cerrado");
                    return reached_ready;
                }
                Ok(Some(Err(e))) => {
                    warn!("🔌 Error en el WebSocket del nodo: {}", e);
                    return reached_ready;
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => match protocol::parse_incoming(&text) {
                    Ok(Incoming::Ready(ready)) => {
                        self.on_ready(ready).await;
                        reached_ready = true;
                    }
                    Ok(incoming) => self.on_incoming(incoming),
                    Err(e) => debug!("Mensaje del nodo ignorado: {}", e),
                },
                Message::Close(frame) => {
                    warn!("🔌 El nodo cerró la conexión: {:?}", frame);
                    return reached_ready;
                }
                _ => {}
            }
        }
    }

    async fn on_ready(&self, ready: ReadyPayload) {
        let previous = self
            .session_id
            .write()
            .replace(ready.session_id.clone());
        self.set_state(NodeState::Ready);

        if ready.resumed {
            info!("✅ Sesión del nodo reanudada: {}", ready.session_id);
        } else {
            info!("✅ Nodo de audio listo, sesión {}", ready.session_id);
        }

        if let Err(e) = self.enable_resuming(&ready.session_id).await {
            warn!("No se pudo activar la reanudación de sesión: {}", e);
        }

        let identity = {
            let mut identity = self.identity.write();
            identity.last_session_id = Some(ready.session_id.clone());
            identity.clone()
        };
        if let Err(e) = identity.save(&self.data_dir).await {
            warn!("No se pudo guardar la identidad del nodo: {}", e);
        }

        if !ready.resumed && previous.is_some() {
            warn!("♻️ Sesión nueva en el nodo, los players anteriores se perdieron");
            self.positions.clear();
            self.emit(NodeEvent::SessionLost);
        }
    }

    fn on_incoming(&self, incoming: Incoming) {
        match incoming {
            Incoming::PlayerUpdate(update) => {
                if let Some(guild_id) = protocol::parse_guild_id(&update.guild_id) {
                    self.positions
                        .insert(guild_id, Duration::from_millis(update.state.position));
                    if !update.state.connected {
                        trace!("Player de guild {} sin voz en el nodo", guild_id);
                    }
                }
            }
            Incoming::Event(event) => self.on_event(event),
            Incoming::Stats => trace!("📊 Stats del nodo"),
            Incoming::Unknown(op) => debug!("Operación desconocida del nodo: {}", op),
            Incoming::Ready(_) => {}
        }
    }

    fn on_event(&self, event: EventPayload) {
        match event {
            EventPayload::TrackStartEvent { guild_id, track } => {
                debug!("▶️ Nodo inició '{}' en guild {}", track.info.title, guild_id);
            }
            EventPayload::TrackEndEvent {
                guild_id,
                track,
                reason,
            } => {
                let Some(guild_id) = protocol::parse_guild_id(&guild_id) else {
                    warn!("TrackEndEvent con guild inválido: {}", guild_id);
                    return;
                };
                debug!(
                    "⏹️ Nodo terminó '{}' en guild {} ({:?})",
                    track.info.title, guild_id, reason
                );
                self.positions.remove(&guild_id);
                self.emit(NodeEvent::TrackEnd(TrackEndEvent {
                    guild_id,
                    track: track.into(),
                    reason: reason.into(),
                }));
            }
            EventPayload::TrackExceptionEvent {
                guild_id,
                track,
                exception,
            } => {
                warn!(
                    "⚠️ Excepción reproduciendo '{}' en guild {}: {}",
                    track.info.title,
                    guild_id,
                    exception.message.as_deref().unwrap_or("sin mensaje")
                );
            }
            EventPayload::TrackStuckEvent {
                guild_id,
                track,
                threshold_ms,
            } => {
                warn!(
                    "⚠️ '{}' atascado en guild {} ({} ms)",
                    track.info.title, guild_id, threshold_ms
                );
                // El nodo no cierra un track atascado por sí solo
                if let Some(guild_id) = protocol::parse_guild_id(&guild_id) {
                    self.emit(NodeEvent::TrackEnd(TrackEndEvent {
                        guild_id,
                        track: track.into(),
                        reason: TrackEndReason::Error,
                    }));
                }
            }
            EventPayload::WebSocketClosedEvent {
                guild_id,
                code,
                reason,
                by_remote,
            } => {
                warn!(
                    "🔇 Voz cerrada en guild {}: {} {} (remoto: {})",
                    guild_id, code, reason, by_remote
                );
                if let Some(guild_id) = protocol::parse_guild_id(&guild_id) {
                    self.emit(NodeEvent::VoiceClosed { guild_id, code });
                }
            }
            EventPayload::Unknown => debug!("Evento desconocido del nodo"),
        }
    }

    fn emit(&self, event: NodeEvent) {
        if self.events.send(event).is_err() {
            debug!("Nadie escucha los eventos del nodo");
        }
    }

    fn set_state(&self, state: NodeState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Nodo: {:?} -> {:?}", previous, state);
        }
    }

    // REST

    fn ready_session(&self) -> AudioResult<String> {
        if self.state() != NodeState::Ready {
            return Err(AudioError::NodeUnavailable);
        }
        self.session_id
            .read()
            .clone()
            .ok_or(AudioError::NodeUnavailable)
    }

    async fn with_timeout<T>(&self, operation: impl Future<Output = AudioResult<T>>) -> AudioResult<T> {
        tokio::time::timeout(self.request_timeout, operation)
            .await
            .map_err(|_| AudioError::NodeTimeout)?
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> AudioResult<reqwest::Response> {
        let response = request
            .header(reqwest::header::AUTHORIZATION, &self.endpoint.password)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(AudioError::Node(format!("HTTP {}: {}", status, body)))
    }

    async fn enable_resuming(&self, session_id: &str) -> AudioResult<()> {
        let url = self
            .endpoint
            .rest_url(&format!("/v4/sessions/{}", session_id));
        let body = UpdateSession {
            resuming: true,
            timeout: RESUME_TIMEOUT_SECS,
        };
        self.with_timeout(async {
            self.execute(self.http.patch(url).json(&body)).await?;
            Ok(())
        })
        .await
    }

    fn voice_body(&self, guild_id: GuildId) -> AudioResult<VoiceStateBody> {
        let voice = self
            .voice
            .get(&guild_id)
            .map(|v| v.clone())
            .ok_or_else(|| AudioError::Voice(format!("guild {} sin conexión de voz", guild_id)))?;

        Ok(VoiceStateBody {
            token: voice.token,
            endpoint: voice.endpoint,
            session_id: voice.session_id,
        })
    }

    async fn update_player(&self, guild_id: GuildId, body: UpdatePlayer) -> AudioResult<()> {
        let session_id = self.ready_session()?;
        let url = self.endpoint.rest_url(&format!(
            "/v4/sessions/{}/players/{}?noReplace=false",
            session_id, guild_id
        ));

        self.with_timeout(async {
            self.execute(self.http.patch(url).json(&body)).await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl NodeApi for AudioNodeClient {
    fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    fn bind_voice(&self, guild_id: GuildId, voice: VoiceServer) {
        debug!("🎙️ Datos de voz registrados para guild {}", guild_id);
        self.voice.insert(guild_id, voice);
    }

    fn release_voice(&self, guild_id: GuildId) {
        self.voice.remove(&guild_id);
        self.positions.remove(&guild_id);
    }

    fn position(&self, guild_id: GuildId) -> Option<Duration> {
        self.positions.get(&guild_id).map(|p| *p)
    }

    fn reset(&self) {
        warn!("🔁 Reiniciando la conexión con el nodo de audio");
        // Sin Session-Id la próxima conexión abre una sesión limpia
        self.session_id.write().take();
        self.positions.clear();
        self.reset.notify_one();
    }

    async fn search(&self, query: &str) -> AudioResult<SearchResult> {
        self.ready_session()?;
        let url = Url::parse_with_params(
            &self.endpoint.rest_url("/v4/loadtracks"),
            &[("identifier", query)],
        )
        .map_err(|e| AudioError::Node(e.to_string()))?;

        let result = self
            .with_timeout(async {
                let response = self.execute(self.http.get(url)).await?;
                response
                    .json::<LoadResult>()
                    .await
                    .map_err(|e| AudioError::Node(format!("respuesta inválida del nodo: {}", e)))
            })
            .await?;

        let result = SearchResult::try_from(result)?;
        debug!("🔍 Búsqueda '{}': {} resultados", query, result.len());
        Ok(result)
    }

    async fn play(&self, guild_id: GuildId, track: &Track) -> AudioResult<()> {
        let voice = self.voice_body(guild_id)?;

        self.update_player(
            guild_id,
            UpdatePlayer {
                track: Some(UpdateTrack {
                    encoded: Some(track.encoded().to_string()),
                }),
                position: Some(0),
                paused: Some(false),
                voice: Some(voice),
                ..Default::default()
            },
        )
        .await?;

        self.positions.insert(guild_id, Duration::ZERO);
        info!("🎵 Reproduciendo '{}' en guild {}", track.title(), guild_id);
        Ok(())
    }

    async fn stop(&self, guild_id: GuildId) -> AudioResult<()> {
        self.update_player(
            guild_id,
            UpdatePlayer {
                track: Some(UpdateTrack { encoded: None }),
                ..Default::default()
            },
        )
        .await
    }

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> AudioResult<()> {
        self.update_player(
            guild_id,
            UpdatePlayer {
                paused: Some(paused),
                ..Default::default()
            },
        )
        .await
    }

    async fn set_volume(&self, guild_id: GuildId, percent: u16) -> AudioResult<()> {
        self.update_player(
            guild_id,
            UpdatePlayer {
                volume: Some(percent),
                ..Default::default()
            },
        )
        .await
    }

    async fn seek(&self, guild_id: GuildId, position: Duration) -> AudioResult<()> {
        let millis = u64::try_from(position.as_millis()).unwrap_or(u64::MAX);
        self.update_player(
            guild_id,
            UpdatePlayer {
                position: Some(millis),
                ..Default::default()
            },
        )
        .await?;
        self.positions.insert(guild_id, position);
        Ok(())
    }

    async fn refresh_voice(&self, guild_id: GuildId) -> AudioResult<()> {
        let voice = self.voice_body(guild_id)?;
        self.update_player(
            guild_id,
            UpdatePlayer {
                voice: Some(voice),
                ..Default::default()
            },
        )
        .await
    }

    async fn destroy(&self, guild_id: GuildId) -> AudioResult<()> {
        let session_id = self.ready_session()?;
        let url = self
            .endpoint
            .rest_url(&format!("/v4/sessions/{}/players/{}", session_id, guild_id));

        self.with_timeout(async {
            let response = self
                .http
                .delete(url)
                .header(reqwest::header::AUTHORIZATION, &self.endpoint.password)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
                debug!("🗑️ Player de guild {} destruido", guild_id);
                Ok(())
            } else {
                Err(AudioError::Node(format!("HTTP {} al destruir el player", status)))
            }
        })
        .await
    }
}

fn header_value(value: &str) -> AudioResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AudioError::Node(format!("cabecera inválida: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn first_reconnect_is_immediate_then_backs_off() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Some(Duration::ZERO));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for(6), None);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 50,
            ..policy()
        };
        assert_eq!(policy.delay_for(40), Some(Duration::from_secs(10)));
    }

    #[test]
    fn end_reasons_map_to_policy_reasons() {
        assert_eq!(TrackEndReason::from(WireEndReason::Finished), TrackEndReason::Finished);
        assert_eq!(TrackEndReason::from(WireEndReason::LoadFailed), TrackEndReason::Error);
        assert_eq!(TrackEndReason::from(WireEndReason::Cleanup), TrackEndReason::Stopped);
        assert_eq!(TrackEndReason::from(WireEndReason::Replaced), TrackEndReason::Replaced);
    }

    #[test]
    fn load_errors_become_node_errors() {
        let result = SearchResult::try_from(LoadResult::Error(protocol::LoadException {
            message: Some("video no disponible".into()),
            severity: "common".into(),
        }));
        assert_eq!(result, Err(AudioError::Node("video no disponible".into())));
    }

    #[tokio::test]
    async fn identity_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let first = NodeIdentity::load_or_create(dir.path()).await.unwrap();
        let second = NodeIdentity::load_or_create(dir.path()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn rest_calls_fail_fast_when_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let identity = NodeIdentity::load_or_create(dir.path()).await.unwrap();
        let (node, _events) =
            AudioNodeClient::new(&config, UserId::new(1), identity, CancellationToken::new())
                .unwrap();

        assert_eq!(node.state(), NodeState::Disconnected);
        assert_eq!(
            node.search("ytsearch:anything").await,
            Err(AudioError::NodeUnavailable)
        );
        assert_eq!(
            node.set_paused(GuildId::new(1), true).await,
            Err(AudioError::NodeUnavailable)
        );
    }

    #[tokio::test]
    async fn reset_revives_exhausted_connection_task() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            lavalink_host: "127.0.0.1".to_string(),
            lavalink_port: 1,
            node_reconnect_max_attempts: 1,
            node_reconnect_base_delay_ms: 1,
            ..Config::default()
        };
        let identity = NodeIdentity::load_or_create(dir.path()).await.unwrap();
        let shutdown = CancellationToken::new();
        let (node, _events) =
            AudioNodeClient::new(&config, UserId::new(1), identity, shutdown.clone()).unwrap();
        let mut state = node.subscribe_state();

        let task = node.connect().unwrap();
        assert!(node.connect().is_none());

        // Nadie escucha en el puerto 1: se agotan los intentos y la tarea queda esperando
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = state.borrow_and_update();
        assert!(tokio::time::timeout(Duration::from_millis(200), state.changed())
            .await
            .is_err());
        assert!(!task.is_finished());

        node.reset();
        let reconnecting = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                state.changed().await.unwrap();
                if *state.borrow_and_update() == NodeState::Connecting {
                    break;
                }
            }
        })
        .await;
        assert!(reconnecting.is_ok());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.state(), NodeState::Disconnected);
    }

    #[tokio::test]
    async fn play_without_voice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let identity = NodeIdentity::load_or_create(dir.path()).await.unwrap();
        let (node, _events) =
            AudioNodeClient::new(&config, UserId::new(1), identity, CancellationToken::new())
                .unwrap();
        let track = Track::new("enc", "id", "t", "a", Duration::from_secs(1));

        assert!(matches!(
            node.play(GuildId::new(1), &track).await,
            Err(AudioError::Voice(_))
        ));
    }
}
