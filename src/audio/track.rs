use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::time::Duration;

/// Representa un track resuelto por el nodo de audio.
///
/// Inmutable: el único "setter" consume el valor y devuelve uno nuevo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    encoded: String,
    identifier: String,
    uri: Option<String>,
    title: String,
    author: String,
    duration: Duration,
    is_stream: bool,
    artwork_url: Option<String>,
    requester: Option<UserId>,
}

impl Track {
    pub fn new(
        encoded: impl Into<String>,
        identifier: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            encoded: encoded.into(),
            identifier: identifier.into(),
            uri: None,
            title: title.into(),
            author: author.into(),
            duration,
            is_stream: false,
            artwork_url: None,
            requester: None,
        }
    }

    // Getters
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn author(&self) -> &str {
        &self.author
    }
    pub fn duration(&self) -> Duration {
        self.duration
    }
    pub fn is_stream(&self) -> bool {
        self.is_stream
    }
    pub fn artwork_url(&self) -> Option<&str> {
        self.artwork_url.as_deref()
    }
    pub fn requester(&self) -> Option<UserId> {
        self.requester
    }

    // Builders
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_stream(mut self, is_stream: bool) -> Self {
        self.is_stream = is_stream;
        self
    }

    pub fn with_artwork(mut self, artwork_url: impl Into<String>) -> Self {
        self.artwork_url = Some(artwork_url.into());
        self
    }

    pub fn with_requester(mut self, requester: UserId) -> Self {
        self.requester = Some(requester);
        self
    }

    /// Same underlying audio, regardless of who requested it.
    pub fn same_source(&self, other: &Track) -> bool {
        self.encoded == other.encoded
    }

    /// Streams en vivo no tienen duración y no sirven como semilla de autoplay
    pub fn has_known_length(&self) -> bool {
        !self.is_stream && !self.duration.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_source_ignores_requester() {
        let a = Track::new("enc", "id", "Song", "Band", Duration::from_secs(60))
            .with_requester(UserId::new(1));
        let b = a.clone().with_requester(UserId::new(2));
        assert!(a.same_source(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn live_streams_have_no_known_length() {
        let live = Track::new("enc", "id", "Radio", "Station", Duration::ZERO).with_stream(true);
        let song = Track::new("enc2", "id2", "Song", "Band", Duration::from_secs(200));
        assert!(!live.has_known_length());
        assert!(song.has_known_length());
    }
}
