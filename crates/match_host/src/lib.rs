//! # Match Host - Authoritative Match Runtime
//!
//! The host side of the runtime API. It loads plugin modules, freezes their
//! registrations, and runs everything they registered: RPC functions,
//! realtime before/after hooks, the matchmaker matched hook and
//! authoritative matches.
//!
//! ## Design Philosophy
//!
//! The host contains **no game logic**. It only provides infrastructure:
//!
//! * **Match lifecycle** - One task per match drives init, join, leave,
//!   loop, signal and terminate callbacks on a fixed tick
//! * **Realtime pipeline** - Client envelopes pass through before hooks,
//!   host handling and after hooks
//! * **Stream tracking** - Presence membership and delivery for streams
//! * **Outbound delivery** - Everything addressed to clients goes through
//!   an [`OutboundSink`]
//!
//! ## Architecture Overview
//!
//! * [`RuntimeHost`] - Owns the registry, matches and streams; implements
//!   the server API handed to plugins
//! * [`MatchRegistry`] - Running matches on this node and request routing
//! * [`RealtimePipeline`] - Hook-wrapped handling of inbound envelopes
//! * [`StreamTracker`] - In-memory stream membership
//!
//! ### Match Cycle
//!
//! 1. Presences that left or were kicked are reported to `match_leave`
//! 2. Presences accepted since the last tick are reported to `match_join`
//! 3. Buffered data is handed to `match_loop` in arrival order
//! 4. The tick counter advances
//!
//! A callback that returns `None` or an error ends the match.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use match_host::{ChannelSink, HostConfig, RuntimeHost};
//! use runtime_api::InitModule;
//! use std::sync::Arc;
//!
//! # async fn run(modules: Vec<Arc<dyn InitModule>>) -> Result<(), Box<dyn std::error::Error>> {
//! let sink = Arc::new(ChannelSink::new());
//! let host = RuntimeHost::new(HostConfig::default(), sink)?;
//! host.load_modules(&modules).await?;
//!
//! // ... serve clients ...
//!
//! host.shutdown(10).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! All host components are safe to share across tasks:
//!
//! * Matches and streams live in `DashMap`s
//! * Per-match state is only mutated by the match's own task
//! * The hook registry is immutable once modules are loaded

mod actor;
mod config;
mod dispatcher;
mod error;
mod host;
mod realtime;
mod registry;
mod sink;
mod streams;

pub use actor::MatchPhase;
pub use config::HostConfig;
pub use error::HostError;
pub use host::RuntimeHost;
pub use realtime::RealtimePipeline;
pub use registry::MatchRegistry;
pub use sink::{ChannelSink, OutboundSink};
pub use streams::StreamTracker;
