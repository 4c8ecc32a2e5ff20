//! Discord voice connections.
//!
//! Songbird only negotiates the gateway side of the connection; the
//! resulting server credentials are handed to the audio node, which does the
//! actual streaming. At most one connection exists per guild, and leaving
//! (voluntarily or because Discord kicked us) always tears the guild's
//! playback session down exactly once.

use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::error::JoinError;
use songbird::Songbird;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use super::node::NodeApi;
use super::registry::SessionRegistry;
use crate::error::{AudioError, AudioResult};

/// Credenciales del servidor de voz que necesita el nodo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceServer {
    pub endpoint: String,
    pub session_id: String,
    pub token: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Entra (o se mueve) al canal y devuelve las credenciales de voz
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> AudioResult<VoiceServer>;

    async fn leave(&self, guild_id: GuildId) -> AudioResult<()>;
}

pub struct SongbirdGateway {
    songbird: Arc<Songbird>,
}

impl SongbirdGateway {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        Self { songbird }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> AudioResult<VoiceServer> {
        let (info, _call) = self
            .songbird
            .join_gateway(guild_id, channel_id)
            .await
            .map_err(|e| AudioError::Voice(format!("no se pudo unir al canal: {}", e)))?;

        Ok(VoiceServer {
            endpoint: info.endpoint,
            session_id: info.session_id,
            token: info.token,
        })
    }

    async fn leave(&self, guild_id: GuildId) -> AudioResult<()> {
        match self.songbird.remove(guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => Ok(()),
            Err(e) => Err(AudioError::Voice(format!("error al salir del canal: {}", e))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Connected,
    Moved { from: ChannelId },
    AlreadyConnected,
}

pub struct VoiceConnectionManager {
    gateway: Arc<dyn VoiceGateway>,
    node: Arc<dyn NodeApi>,
    registry: Arc<SessionRegistry>,
    connections: DashMap<GuildId, ChannelId>,
}

impl VoiceConnectionManager {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        node: Arc<dyn NodeApi>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            gateway,
            node,
            registry,
            connections: DashMap::new(),
        }
    }

    pub fn channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.connections.get(&guild_id).map(|c| *c)
    }

    pub fn is_connected(&self, guild_id: GuildId) -> bool {
        self.connections.contains_key(&guild_id)
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Conecta al canal. Si ya está en otro canal del servidor, se mueve.
    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> AudioResult<JoinOutcome> {
        let previous = self.channel(guild_id);
        if previous == Some(channel_id) {
            debug!("Ya conectado a {} en guild {}", channel_id, guild_id);
            return Ok(JoinOutcome::AlreadyConnected);
        }

        let voice = self.gateway.join(guild_id, channel_id).await?;
        self.node.bind_voice(guild_id, voice);
        self.connections.insert(guild_id, channel_id);

        match previous {
            Some(from) => {
                info!("🔀 Movido de {} a {} en guild {}", from, channel_id, guild_id);
                if let Err(e) = self.node.refresh_voice(guild_id).await {
                    debug!("Sin player que actualizar en guild {}: {}", guild_id, e);
                }
                Ok(JoinOutcome::Moved { from })
            }
            None => {
                info!("🔊 Conectado a {} en guild {}", channel_id, guild_id);
                Ok(JoinOutcome::Connected)
            }
        }
    }

    /// Sale del canal y destruye la sesión. `false` si no estaba conectado.
    pub async fn leave(&self, guild_id: GuildId) -> AudioResult<bool> {
        let Some((_, channel_id)) = self.connections.remove(&guild_id) else {
            debug!("Sin conexión de voz que cerrar en guild {}", guild_id);
            return Ok(false);
        };

        self.teardown(guild_id).await;
        self.gateway.leave(guild_id).await?;

        info!("👋 Desconectado de {} en guild {}", channel_id, guild_id);
        Ok(true)
    }

    /// Discord cerró la conexión por su cuenta (kick, canal borrado...)
    pub async fn handle_voice_lost(&self, guild_id: GuildId) -> bool {
        let Some((_, channel_id)) = self.connections.remove(&guild_id) else {
            return false;
        };

        warn!("🔇 Conexión de voz perdida en {} (guild {})", channel_id, guild_id);
        self.teardown(guild_id).await;

        // Songbird puede conservar la llamada aunque Discord la haya cerrado
        if let Err(e) = self.gateway.leave(guild_id).await {
            debug!("Limpieza de la llamada en guild {}: {}", guild_id, e);
        }
        true
    }

    async fn teardown(&self, guild_id: GuildId) {
        self.registry.teardown(guild_id);
        self.node.release_voice(guild_id);

        if let Err(e) = self.node.destroy(guild_id).await {
            warn!("No se pudo destruir el player de guild {}: {}", guild_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::node::MockNodeApi;
    use pretty_assertions::assert_eq;

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn server() -> VoiceServer {
        VoiceServer {
            endpoint: "eu.discord.media".into(),
            session_id: "s".into(),
            token: "t".into(),
        }
    }

    fn manager(
        gateway: MockVoiceGateway,
        node: MockNodeApi,
    ) -> (VoiceConnectionManager, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new(10, 10));
        let manager = VoiceConnectionManager::new(Arc::new(gateway), Arc::new(node), registry.clone());
        (manager, registry)
    }

    #[tokio::test]
    async fn join_same_channel_is_noop_and_other_channel_moves() {
        let mut gateway = MockVoiceGateway::new();
        gateway.expect_join().times(2).returning(|_, _| Ok(server()));
        let mut node = MockNodeApi::new();
        node.expect_bind_voice().times(2).return_const(());
        node.expect_refresh_voice().times(1).returning(|_| Ok(()));

        let (manager, _) = manager(gateway, node);

        assert_eq!(
            manager.join(guild(), ChannelId::new(10)).await.unwrap(),
            JoinOutcome::Connected
        );
        assert_eq!(
            manager.join(guild(), ChannelId::new(10)).await.unwrap(),
            JoinOutcome::AlreadyConnected
        );
        assert_eq!(
            manager.join(guild(), ChannelId::new(11)).await.unwrap(),
            JoinOutcome::Moved {
                from: ChannelId::new(10)
            }
        );
        assert_eq!(manager.channel(guild()), Some(ChannelId::new(11)));
        assert_eq!(manager.guilds(), vec![guild()]);
    }

    #[tokio::test]
    async fn failed_join_leaves_no_connection() {
        let mut gateway = MockVoiceGateway::new();
        gateway
            .expect_join()
            .returning(|_, _| Err(AudioError::Voice("timeout".into())));
        let node = MockNodeApi::new();

        let (manager, _) = manager(gateway, node);

        assert!(manager.join(guild(), ChannelId::new(10)).await.is_err());
        assert!(!manager.is_connected(guild()));
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_tears_down_once() {
        let mut gateway = MockVoiceGateway::new();
        gateway.expect_join().returning(|_, _| Ok(server()));
        gateway.expect_leave().times(1).returning(|_| Ok(()));
        let mut node = MockNodeApi::new();
        node.expect_bind_voice().return_const(());
        node.expect_release_voice().times(1).return_const(());
        node.expect_destroy().times(1).returning(|_| Ok(()));

        let (manager, registry) = manager(gateway, node);
        manager.join(guild(), ChannelId::new(10)).await.unwrap();
        registry.get_or_create(guild());

        assert!(manager.leave(guild()).await.unwrap());
        assert!(!manager.leave(guild()).await.unwrap());
        assert!(registry.get(guild()).is_none());
    }

    #[tokio::test]
    async fn voice_lost_tears_down_session() {
        let mut gateway = MockVoiceGateway::new();
        gateway.expect_join().returning(|_, _| Ok(server()));
        gateway.expect_leave().returning(|_| Ok(()));
        let mut node = MockNodeApi::new();
        node.expect_bind_voice().return_const(());
        node.expect_release_voice().times(1).return_const(());
        node.expect_destroy()
            .times(1)
            .returning(|_| Err(AudioError::NodeUnavailable));

        let (manager, registry) = manager(gateway, node);
        manager.join(guild(), ChannelId::new(10)).await.unwrap();
        let handle = registry.get_or_create(guild());

        assert!(manager.handle_voice_lost(guild()).await);
        assert!(!manager.handle_voice_lost(guild()).await);
        assert!(handle.is_closed());
    }
}
