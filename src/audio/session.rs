use chrono::{DateTime, Utc};
use serenity::model::id::GuildId;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

use super::queue::MusicQueue;
use super::track::Track;
use crate::error::{AudioError, AudioResult};

pub const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub track: Track,
    pub played_at: DateTime<Utc>,
}

/// Estado de reproducción de un servidor.
///
/// Solo se modifica a través de un [`SessionGuard`](super::registry::SessionGuard),
/// que serializa las mutaciones por servidor.
#[derive(Debug)]
pub struct PlaybackSession {
    guild_id: GuildId,
    queue: MusicQueue,
    current: Option<Track>,
    loop_mode: bool,
    autoplay: bool,
    history: VecDeque<HistoryEntry>,
    history_capacity: usize,
    state: PlaybackState,
}

impl PlaybackSession {
    pub fn new(guild_id: GuildId, max_queue_size: usize, history_capacity: usize) -> Self {
        Self {
            guild_id,
            queue: MusicQueue::new(max_queue_size),
            current: None,
            loop_mode: false,
            autoplay: false,
            history: VecDeque::new(),
            history_capacity: history_capacity.clamp(1, MAX_HISTORY),
            state: PlaybackState::Idle,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn queue(&self) -> &MusicQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut MusicQueue {
        &mut self.queue
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn loop_mode(&self) -> bool {
        self.loop_mode
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_mode = !self.loop_mode;
        info!(
            "{} Repetición en guild {}",
            if self.loop_mode { "🔂 Activada" } else { "➡️ Desactivada" },
            self.guild_id
        );
        self.loop_mode
    }

    pub fn toggle_autoplay(&mut self) -> bool {
        self.autoplay = !self.autoplay;
        info!(
            "{} Autoplay en guild {}",
            if self.autoplay { "📻 Activado" } else { "⏹️ Desactivado" },
            self.guild_id
        );
        self.autoplay
    }

    /// Marca `track` como el actual. El anterior (si lo hay) pasa al historial.
    pub fn start_track(&mut self, track: Track, previous: Option<Track>) {
        if let Some(previous) = previous {
            self.push_history(previous);
        }
        debug!("▶️ Track actual en guild {}: {}", self.guild_id, track.title());
        self.current = Some(track);
        self.state = PlaybackState::Playing;
    }

    /// Sin track actual. La cola no se toca.
    pub fn go_idle(&mut self) {
        self.current = None;
        self.state = PlaybackState::Idle;
    }

    /// Pasa `track` al historial y deja la sesión en Idle
    pub fn retire(&mut self, track: Track) {
        self.push_history(track);
        self.go_idle();
    }

    /// Valida la transición Playing -> Paused sin aplicarla
    pub fn ensure_can_pause(&self) -> AudioResult<()> {
        match self.state {
            PlaybackState::Playing => Ok(()),
            PlaybackState::Paused => Err(AudioError::validation("la reproducción ya está pausada")),
            PlaybackState::Idle => Err(AudioError::validation("no hay nada reproduciéndose")),
        }
    }

    pub fn ensure_can_resume(&self) -> AudioResult<()> {
        match self.state {
            PlaybackState::Paused => Ok(()),
            PlaybackState::Playing => Err(AudioError::validation("la reproducción no está pausada")),
            PlaybackState::Idle => Err(AudioError::validation("no hay nada reproduciéndose")),
        }
    }

    pub fn pause(&mut self) -> AudioResult<()> {
        self.ensure_can_pause()?;
        self.state = PlaybackState::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> AudioResult<()> {
        self.ensure_can_resume()?;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            guild_id: self.guild_id,
            current: self.current.clone(),
            queue: self.queue.peek_all(),
            loop_mode: self.loop_mode,
            autoplay: self.autoplay,
            state: self.state,
            history: self.history.iter().cloned().collect(),
        }
    }

    fn push_history(&mut self, track: Track) {
        self.history.push_front(HistoryEntry {
            track,
            played_at: Utc::now(),
        });
        self.history.truncate(self.history_capacity);
    }
}

/// Copia inmutable del estado de una sesión, para comandos de solo lectura
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub loop_mode: bool,
    pub autoplay: bool,
    pub state: PlaybackState,
    /// Más reciente primero
    pub history: Vec<HistoryEntry>,
}

impl SessionSnapshot {
    pub fn empty(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            current: None,
            queue: Vec::new(),
            loop_mode: false,
            autoplay: false,
            state: PlaybackState::Idle,
            history: Vec::new(),
        }
    }

    /// Duración de lo que queda: track actual más la cola
    pub fn total_duration(&self) -> Duration {
        let queued: Duration = self.queue.iter().map(Track::duration).sum();
        queued + self.current.as_ref().map(Track::duration).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(name: &str) -> Track {
        Track::new(name, name, name, "artist", Duration::from_secs(30))
    }

    #[test]
    fn pause_and_resume_follow_state_machine() {
        let mut session = PlaybackSession::new(GuildId::new(1), 10, 10);
        assert!(session.pause().is_err());

        session.start_track(track("a"), None);
        session.pause().unwrap();
        assert_eq!(session.state(), PlaybackState::Paused);
        assert!(session.pause().is_err());

        session.resume().unwrap();
        assert_eq!(session.state(), PlaybackState::Playing);
        assert!(session.resume().is_err());

        session.go_idle();
        assert_eq!(session.state(), PlaybackState::Idle);
        assert!(session.current().is_none());
    }

    #[test]
    fn history_is_newest_first_and_bounded() {
        let mut session = PlaybackSession::new(GuildId::new(1), 10, 3);
        let mut previous = None;
        for name in ["a", "b", "c", "d", "e"] {
            session.start_track(track(name), previous.take());
            previous = session.current().cloned();
        }

        let titles: Vec<&str> = session.history().map(|e| e.track.title()).collect();
        assert_eq!(titles, vec!["d", "c", "b"]);
    }

    #[test]
    fn history_capacity_never_exceeds_limit() {
        let mut session = PlaybackSession::new(GuildId::new(1), 10, 10_000);
        for i in 0..(MAX_HISTORY + 20) {
            session.start_track(track(&i.to_string()), Some(track("prev")));
        }
        assert_eq!(session.history().count(), MAX_HISTORY);
    }

    #[test]
    fn toggles_flip_flags() {
        let mut session = PlaybackSession::new(GuildId::new(1), 10, 10);
        assert!(session.toggle_loop());
        assert!(session.toggle_autoplay());
        assert!(!session.toggle_loop());

        let snapshot = session.snapshot();
        assert!(!snapshot.loop_mode);
        assert!(snapshot.autoplay);
    }
}
