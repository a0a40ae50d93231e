//! # Runtime API
//!
//! The contract between a match runtime host and the plugin modules it runs.
//! Plugins see this crate and nothing else: the execution context, a
//! structured logger, the server API, hook registration, the authoritative
//! match lifecycle and the realtime message envelope.
//!
//! ## Core Concepts
//!
//! - **Init modules**: a plugin exposes an [`InitModule`]. At startup the host
//!   calls it once with an [`Initializer`], through which the plugin registers
//!   RPC functions, realtime before/after hooks, match handlers and the
//!   matchmaker matched hook.
//! - **Frozen registry**: after init the host calls [`Initializer::build`];
//!   the resulting [`HookRegistry`] never changes.
//! - **Authoritative matches**: a [`MatchHandler`] owns a typed state value
//!   that is threaded through its callbacks. The host runs one match per task
//!   and calls `match_loop` at the match's tick rate.
//! - **Realtime hooks**: every inbound [`Envelope`] kind can be intercepted
//!   before the host handles it (to rewrite or drop it) and observed after.
//!
//! ## Quick Start Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use runtime_api::*;
//! use std::sync::Arc;
//!
//! struct Module;
//!
//! async fn health(
//!     _ctx: Context,
//!     _logger: Logger,
//!     _nk: Arc<dyn ServerApi>,
//!     _payload: String,
//! ) -> Result<Option<String>, RuntimeError> {
//!     Ok(Some("{\"ok\":true}".to_string()))
//! }
//!
//! #[async_trait]
//! impl InitModule for Module {
//!     fn name(&self) -> &str {
//!         "health"
//!     }
//!
//!     async fn init(
//!         &self,
//!         _ctx: &Context,
//!         logger: &Logger,
//!         _nk: Arc<dyn ServerApi>,
//!         initializer: &mut Initializer,
//!     ) -> Result<(), RuntimeError> {
//!         initializer.register_rpc("health", health)?;
//!         logger.info("health module loaded");
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Errors
//!
//! Every fallible call returns [`RuntimeError`]: either a type error for
//! malformed arguments or a status error carrying a [`Code`].

pub mod bytes_b64;
mod context;
mod dispatcher;
mod envelope;
mod error;
mod hooks;
mod logger;
mod match_handler;
mod presence;
mod registry;
mod server_api;
mod types;

pub use context::{Context, ExecutionMode};
pub use dispatcher::MatchDispatcher;
pub use envelope::*;
pub use error::{Code, RuntimeError};
pub use hooks::{InitModule, MatchmakerMatchedHook, RpcFunction, RtAfterHook, RtBeforeHook};
pub use logger::{LogLevel, Logger};
pub use match_handler::{
    JoinDecision, MatchCore, MatchEnv, MatchHandler, MatchHandlerFactory, MatchSetup, MatchStep,
    TypedMatchCore, TypedMatchFactory,
};
pub use presence::{Presence, PresenceReason, Stream};
pub use registry::{HookRegistry, Initializer};
pub use server_api::ServerApi;
pub use types::*;

// Re-export commonly used external types so plugins don't need direct deps
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
