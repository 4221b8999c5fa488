//! Remote orchestration server integration.
//!
//! The manager mirrors session existence to the server and consumes its
//! event stream: a REST client for session CRUD ([`api`]), a reconnecting
//! WebSocket channel ([`sync`]), the periodic orphan reaper ([`reaper`]),
//! and the spawn deduplicator ([`dedup`]).

pub mod api;
pub mod dedup;
pub mod reaper;
pub mod sync;
