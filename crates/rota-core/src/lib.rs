//! Core of the rota account dispatcher.
//!
//! Framework-agnostic: the chat platform lives behind the ports in
//! [`client::port`], HTTP validation lives in `rota-http`, and the binary wires
//! everything together.
//!
//! # Runtime wiring
//!
//! A long-running host needs a [`client::port::ClientFactory`] for the real
//! platform ([`client::loopback::LoopbackNetwork`] is the in-memory one) and
//! builds two registries from it:
//!
//! 1. `dispatch_registry = Arc::new(SessionRegistry::new(factory.clone()))` owns
//!    the dispatch accounts and is handed to
//!    [`dispatch::DispatchScheduler::new`]. Load [`store::AppSettings`], call
//!    `configure(settings.dispatch)` and then `start()`; settings edits go
//!    through `reconfigure`.
//! 2. `shared_registry = Arc::new(SessionRegistry::new(factory))` backs a
//!    [`presence::PresenceController`] and the
//!    [`voice::VoiceStateController`] built on top of it, so voice joins
//!    reuse the sessions presence already logged in.
//!
//! On shutdown (e.g. `tokio::signal::ctrl_c`) the host calls `voice.stop()`,
//! then `scheduler.stop()`, and finally
//! `voice.ensure_on_exit(accounts, guild, channel)` so the accounts stay in
//! the configured voice channel after the dispatcher is gone.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod presence;
pub mod session;
pub mod store;
pub mod voice;

pub use errors::{Error, Result};
