#![forbid(unsafe_code)]

//! Terminal session lifecycle manager for the Maestro desktop app.
//!
//! Creates, tracks, persists, reconnects, and tears down PTY-backed
//! terminal sessions across projects; reconciles persisted sessions
//! against the live process table at startup; detects agent activity from
//! raw output; and mirrors session existence to the orchestration server
//! over a reconnecting event channel.

pub mod activity;
pub mod config;
pub mod errors;
pub mod host;
pub mod models;
pub mod persistence;
pub mod reconcile;
pub mod registry;
pub mod remote;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
