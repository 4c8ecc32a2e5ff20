//! Lavalink v4 wire types: REST bodies and WebSocket messages.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::track::Track;
use crate::error::{AudioError, AudioResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    pub encoded: String,
    pub info: TrackInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub author: String,
    /// Milisegundos
    pub length: u64,
    pub is_stream: bool,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
}

impl From<TrackData> for Track {
    fn from(data: TrackData) -> Self {
        let info = data.info;
        let mut track = Track::new(
            data.encoded,
            info.identifier,
            info.title,
            info.author,
            Duration::from_millis(info.length),
        )
        .with_stream(info.is_stream);

        if let Some(uri) = info.uri {
            track = track.with_uri(uri);
        }
        if let Some(artwork) = info.artwork_url {
            track = track.with_artwork(artwork);
        }
        track
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    pub tracks: Vec<TrackData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadException {
    pub message: Option<String>,
    pub severity: String,
}

/// Respuesta de `GET /v4/loadtracks`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(TrackData),
    Playlist(PlaylistData),
    Search(Vec<TrackData>),
    Empty(serde::de::IgnoredAny),
    Error(LoadException),
}

/// Cuerpo de `PATCH /v4/sessions/{session}/players/{guild}`. Los campos `None` no se envían.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<UpdateTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceStateBody>,
}

/// `encoded: null` detiene el track actual
#[derive(Debug, Clone, Serialize)]
pub struct UpdateTrack {
    pub encoded: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStateBody {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Cuerpo de `PATCH /v4/sessions/{session}`
#[derive(Debug, Clone, Serialize)]
pub struct UpdateSession {
    pub resuming: bool,
    /// Segundos
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdatePayload {
    pub guild_id: String,
    pub state: PlayerState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerState {
    /// Milisegundos
    #[serde(default)]
    pub position: u64,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    TrackStartEvent { guild_id: String, track: TrackData },
    #[serde(rename_all = "camelCase")]
    TrackEndEvent {
        guild_id: String,
        track: TrackData,
        reason: WireEndReason,
    },
    #[serde(rename_all = "camelCase")]
    TrackExceptionEvent {
        guild_id: String,
        track: TrackData,
        exception: LoadException,
    },
    #[serde(rename_all = "camelCase")]
    TrackStuckEvent {
        guild_id: String,
        track: TrackData,
        threshold_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    WebSocketClosedEvent {
        guild_id: String,
        code: u16,
        reason: String,
        by_remote: bool,
    },
    #[serde(other)]
    Unknown,
}

/// Mensaje entrante del WebSocket, ya clasificado por `op`
#[derive(Debug, Clone)]
pub enum Incoming {
    Ready(ReadyPayload),
    PlayerUpdate(PlayerUpdatePayload),
    Event(EventPayload),
    Stats,
    Unknown(String),
}

pub fn parse_incoming(text: &str) -> AudioResult<Incoming> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(protocol_error)?;
    let op = value
        .get("op")
        .and_then(|op| op.as_str())
        .ok_or_else(|| AudioError::Node("mensaje sin campo 'op'".to_string()))?
        .to_string();

    let incoming = match op.as_str() {
        "ready" => Incoming::Ready(serde_json::from_value(value).map_err(protocol_error)?),
        "playerUpdate" => {
            Incoming::PlayerUpdate(serde_json::from_value(value).map_err(protocol_error)?)
        }
        "event" => Incoming::Event(serde_json::from_value(value).map_err(protocol_error)?),
        "stats" => Incoming::Stats,
        _ => Incoming::Unknown(op),
    };
    Ok(incoming)
}

pub fn parse_guild_id(raw: &str) -> Option<serenity::model::id::GuildId> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(serenity::model::id::GuildId::new)
}

fn protocol_error(err: serde_json::Error) -> AudioError {
    AudioError::Node(format!("respuesta inválida del nodo: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TRACK_JSON: &str = r#"{
        "encoded": "QAAAjQIAJVJpY2sgQXN0bGV5",
        "info": {
            "identifier": "dQw4w9WgXcQ",
            "isSeekable": true,
            "author": "RickAstleyVEVO",
            "length": 212000,
            "isStream": false,
            "position": 0,
            "title": "Never Gonna Give You Up",
            "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "artworkUrl": null,
            "isrc": null,
            "sourceName": "youtube"
        },
        "pluginInfo": {},
        "userData": {}
    }"#;

    #[test]
    fn load_results_by_type() {
        let search = format!(r#"{{"loadType":"search","data":[{}]}}"#, TRACK_JSON);
        match serde_json::from_str::<LoadResult>(&search).unwrap() {
            LoadResult::Search(tracks) => {
                let track = Track::from(tracks[0].clone());
                assert_eq!(track.title(), "Never Gonna Give You Up");
                assert_eq!(track.duration(), Duration::from_secs(212));
                assert_eq!(track.artwork_url(), None);
            }
            other => panic!("unexpected {:?}", other),
        }

        let empty = r#"{"loadType":"empty","data":{}}"#;
        assert!(matches!(
            serde_json::from_str::<LoadResult>(empty).unwrap(),
            LoadResult::Empty(_)
        ));

        let error = r#"{"loadType":"error","data":{"message":"blocked","severity":"common","cause":"x"}}"#;
        assert!(matches!(
            serde_json::from_str::<LoadResult>(error).unwrap(),
            LoadResult::Error(LoadException { severity, .. }) if severity == "common"
        ));
    }

    #[test]
    fn stop_body_sends_null_track() {
        let body = UpdatePlayer {
            track: Some(UpdateTrack { encoded: None }),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"track":{"encoded":null}}"#
        );
    }

    #[test]
    fn voice_body_uses_camel_case() {
        let body = UpdatePlayer {
            voice: Some(VoiceStateBody {
                token: "t".into(),
                endpoint: "e".into(),
                session_id: "s".into(),
            }),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"voice":{"token":"t","endpoint":"e","sessionId":"s"}}"#
        );
    }

    #[test]
    fn parses_websocket_messages() {
        let ready = r#"{"op":"ready","resumed":false,"sessionId":"abc"}"#;
        assert!(matches!(
            parse_incoming(ready).unwrap(),
            Incoming::Ready(ReadyPayload { resumed: false, ref session_id }) if session_id == "abc"
        ));

        let end = format!(
            r#"{{"op":"event","type":"TrackEndEvent","guildId":"123","track":{},"reason":"finished"}}"#,
            TRACK_JSON
        );
        match parse_incoming(&end).unwrap() {
            Incoming::Event(EventPayload::TrackEndEvent { guild_id, reason, .. }) => {
                assert_eq!(guild_id, "123");
                assert_eq!(reason, WireEndReason::Finished);
            }
            other => panic!("unexpected {:?}", other),
        }

        let closed = r#"{"op":"event","type":"WebSocketClosedEvent","guildId":"5","code":4014,"reason":"","byRemote":true}"#;
        assert!(matches!(
            parse_incoming(closed).unwrap(),
            Incoming::Event(EventPayload::WebSocketClosedEvent { code: 4014, .. })
        ));

        let update = r#"{"op":"playerUpdate","guildId":"5","state":{"time":1,"position":6000,"connected":true,"ping":20}}"#;
        assert!(matches!(
            parse_incoming(update).unwrap(),
            Incoming::PlayerUpdate(PlayerUpdatePayload { state: PlayerState { position: 6000, .. }, .. })
        ));

        assert!(parse_incoming(r#"{"nope":1}"#).is_err());
    }

    #[test]
    fn guild_ids_must_be_numeric() {
        assert_eq!(parse_guild_id("42"), Some(serenity::model::id::GuildId::new(42)));
        assert_eq!(parse_guild_id("0"), None);
        assert_eq!(parse_guild_id("abc"), None);
    }
}
