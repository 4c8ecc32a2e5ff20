//! DJ / administrator permission checks for playback control commands.

use serenity::model::id::{GuildId, RoleId, UserId};
use std::sync::Arc;

use crate::error::{AudioError, AudioResult};
use crate::storage::SettingsStore;

/// Who is issuing a command, as seen by the permission check.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
    pub roles: Vec<RoleId>,
}

impl Actor {
    pub fn new(user_id: UserId, is_admin: bool, roles: Vec<RoleId>) -> Self {
        Self {
            user_id,
            is_admin,
            roles,
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    settings: Arc<SettingsStore>,
}

impl AuthorizationGate {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    /// Administrador, servidor sin rol DJ configurado, o miembro con el rol DJ.
    pub fn is_authorized(&self, actor: &Actor, guild_id: GuildId) -> bool {
        if actor.is_admin {
            return true;
        }

        match self.settings.dj_role(guild_id) {
            None => true,
            Some(dj_role) => actor.roles.contains(&dj_role),
        }
    }

    pub fn require_dj(&self, actor: &Actor, guild_id: GuildId) -> AudioResult<()> {
        if self.is_authorized(actor, guild_id) {
            Ok(())
        } else {
            Err(AudioError::Unauthorized(
                "necesitas el rol de DJ para usar este comando".to_string(),
            ))
        }
    }

    pub fn require_admin(&self, actor: &Actor) -> AudioResult<()> {
        if actor.is_admin {
            Ok(())
        } else {
            Err(AudioError::Unauthorized(
                "solo los administradores pueden usar este comando".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DEFAULT_VOLUME;

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn dj_role() -> RoleId {
        RoleId::new(500)
    }

    async fn gate_with_dj(dj: Option<RoleId>) -> (AuthorizationGate, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().to_path_buf(), DEFAULT_VOLUME)
            .await
            .unwrap();
        store.set_dj_role(guild(), dj).await.unwrap();
        (AuthorizationGate::new(Arc::new(store)), dir)
    }

    #[tokio::test]
    async fn admin_always_authorized() {
        let (gate, _dir) = gate_with_dj(Some(dj_role())).await;
        let admin = Actor::new(UserId::new(10), true, vec![]);
        assert!(gate.is_authorized(&admin, guild()));
    }

    #[tokio::test]
    async fn open_door_without_dj_role() {
        let (gate, _dir) = gate_with_dj(None).await;
        let anyone = Actor::new(UserId::new(11), false, vec![]);
        assert!(gate.is_authorized(&anyone, guild()));
    }

    #[tokio::test]
    async fn dj_role_required_when_configured() {
        let (gate, _dir) = gate_with_dj(Some(dj_role())).await;
        let listener = Actor::new(UserId::new(12), false, vec![RoleId::new(3)]);
        let dj = Actor::new(UserId::new(13), false, vec![RoleId::new(3), dj_role()]);

        assert!(!gate.is_authorized(&listener, guild()));
        assert!(gate.is_authorized(&dj, guild()));
        assert!(matches!(
            gate.require_dj(&listener, guild()),
            Err(AudioError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn only_admins_manage_dj_role() {
        let (gate, _dir) = gate_with_dj(None).await;
        assert!(gate.require_admin(&Actor::new(UserId::new(1), false, vec![])).is_err());
        assert!(gate.require_admin(&Actor::new(UserId::new(1), true, vec![])).is_ok());
    }
}
