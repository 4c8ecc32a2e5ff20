//! Per-guild session registry.
//!
//! Each guild gets one [`SessionHandle`]: a tokio mutex serializing every
//! mutation of its [`PlaybackSession`], plus a snapshot that read-only
//! commands can copy without waiting on that mutex. Teardown flips a
//! `closed` flag, so any task still holding (or waiting for) the old handle
//! observes [`AudioError::SessionGone`] instead of mutating a dead session.

use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::GuildId;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::session::{PlaybackSession, SessionSnapshot};
use crate::error::{AudioError, AudioResult};

pub struct SessionHandle {
    guild_id: GuildId,
    session: Arc<Mutex<PlaybackSession>>,
    snapshot: RwLock<Arc<SessionSnapshot>>,
    closed: AtomicBool,
}

impl SessionHandle {
    fn new(session: PlaybackSession) -> Self {
        let guild_id = session.guild_id();
        let snapshot = Arc::new(session.snapshot());
        Self {
            guild_id,
            session: Arc::new(Mutex::new(session)),
            snapshot: RwLock::new(snapshot),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.read().clone()
    }

    async fn lock(self: &Arc<Self>) -> AudioResult<SessionGuard> {
        let session = self.session.clone().lock_owned().await;
        let guard = SessionGuard {
            handle: self.clone(),
            session,
        };
        guard.ensure_live()?;
        Ok(guard)
    }
}

/// Acceso exclusivo a la sesión de un servidor.
///
/// Al soltarse publica un snapshot nuevo (si la sesión sigue viva).
pub struct SessionGuard {
    handle: Arc<SessionHandle>,
    session: OwnedMutexGuard<PlaybackSession>,
}

impl SessionGuard {
    /// Falla con `SessionGone` si la sesión fue destruida mientras se esperaba algo
    pub fn ensure_live(&self) -> AudioResult<()> {
        if self.handle.is_closed() {
            Err(AudioError::SessionGone)
        } else {
            Ok(())
        }
    }

    /// Publica el estado actual sin soltar el lock
    pub fn publish(&self) {
        if !self.handle.is_closed() {
            *self.handle.snapshot.write() = Arc::new(self.session.snapshot());
        }
    }
}

impl Deref for SessionGuard {
    type Target = PlaybackSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.publish();
    }
}

pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<SessionHandle>>,
    max_queue_size: usize,
    history_capacity: usize,
}

impl SessionRegistry {
    pub fn new(max_queue_size: usize, history_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_queue_size,
            history_capacity,
        }
    }

    /// Sesión existente o una nueva. Dos llamadas concurrentes obtienen la misma.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<SessionHandle> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🆕 Sesión de reproducción creada para guild {}", guild_id);
                Arc::new(SessionHandle::new(PlaybackSession::new(
                    guild_id,
                    self.max_queue_size,
                    self.history_capacity,
                )))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&guild_id).map(|entry| entry.clone())
    }

    /// Bloquea una sesión existente
    pub async fn lock(&self, guild_id: GuildId) -> AudioResult<SessionGuard> {
        let handle = self.get(guild_id).ok_or(AudioError::SessionGone)?;
        handle.lock().await
    }

    /// Bloquea la sesión, creándola si no existe
    pub async fn lock_or_create(&self, guild_id: GuildId) -> AudioResult<SessionGuard> {
        // Si la sesión se destruye mientras esperamos el lock, se crea otra
        for _ in 0..2 {
            match self.get_or_create(guild_id).lock().await {
                Err(AudioError::SessionGone) => continue,
                result => return result,
            }
        }
        Err(AudioError::SessionGone)
    }

    /// Snapshot sin bloqueo, `None` si el servidor no tiene sesión
    pub fn snapshot(&self, guild_id: GuildId) -> Option<Arc<SessionSnapshot>> {
        self.get(guild_id).map(|handle| handle.snapshot())
    }

    /// Destruye la sesión. Devuelve `false` si no había ninguna.
    pub fn teardown(&self, guild_id: GuildId) -> bool {
        match self.sessions.remove(&guild_id) {
            Some((_, handle)) => {
                handle.closed.store(true, Ordering::Release);
                *handle.snapshot.write() = Arc::new(SessionSnapshot::empty(guild_id));
                info!("🧹 Sesión de guild {} destruida", guild_id);
                true
            }
            None => {
                debug!("Sin sesión que destruir en guild {}", guild_id);
                false
            }
        }
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::Track;
    use std::time::Duration;

    fn guild() -> GuildId {
        GuildId::new(7)
    }

    #[tokio::test]
    async fn concurrent_creation_yields_one_session() {
        let registry = Arc::new(SessionRegistry::new(10, 10));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.get_or_create(guild()) }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_published_when_guard_drops() {
        let registry = SessionRegistry::new(10, 10);
        {
            let mut session = registry.lock_or_create(guild()).await.unwrap();
            session
                .queue_mut()
                .enqueue(Track::new("a", "a", "a", "x", Duration::from_secs(1)))
                .unwrap();
        }

        let snapshot = registry.snapshot(guild()).unwrap();
        assert_eq!(snapshot.queue.len(), 1);
    }

    #[tokio::test]
    async fn teardown_invalidates_held_guards() {
        let registry = SessionRegistry::new(10, 10);
        let session = registry.lock_or_create(guild()).await.unwrap();

        assert!(registry.teardown(guild()));
        assert!(!registry.teardown(guild()));
        assert_eq!(session.ensure_live(), Err(AudioError::SessionGone));
        drop(session);

        assert!(registry.snapshot(guild()).is_none());
        assert!(matches!(
            registry.lock(guild()).await,
            Err(AudioError::SessionGone)
        ));
    }

    #[tokio::test]
    async fn waiter_sees_teardown_that_happened_while_queued() {
        let registry = Arc::new(SessionRegistry::new(10, 10));
        let holder = registry.lock_or_create(guild()).await.unwrap();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lock(guild()).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        registry.teardown(guild());
        drop(holder);

        assert_eq!(waiter.await.unwrap(), Err(AudioError::SessionGone));
    }
}
