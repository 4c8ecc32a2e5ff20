//! # Audio Module
//!
//! Per-guild playback orchestration on top of an external audio node.
//!
//! ## Architecture
//!
//! - [`node`] - Lavalink connection, reconnection and REST calls
//! - [`voice`] - Discord voice connections (join, move, leave)
//! - [`session`] / [`queue`] - per-guild queue, current track, flags, history
//! - [`registry`] - owns one locked session per guild
//! - [`dispatcher`] - reacts to finished tracks (loop, next, autoplay, leave)
//! - [`controller`] - one entry point per user command
//!
//! Commands and node events for the same guild are serialized by that
//! guild's session lock; different guilds never wait on each other.

pub mod controller;
pub mod dispatcher;
pub mod node;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod session;
pub mod track;
pub mod voice;
