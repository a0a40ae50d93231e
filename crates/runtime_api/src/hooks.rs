//! Callable registrations: RPC functions, realtime hooks, matchmaker hook.
//!
//! Each kind is an async trait with a blanket implementation for plain
//! async functions and closures taking owned arguments, so both of these
//! register the same way:
//!
//! ```rust
//! use runtime_api::*;
//! use std::sync::Arc;
//!
//! async fn echo(
//!     _ctx: Context,
//!     _logger: Logger,
//!     _nk: Arc<dyn ServerApi>,
//!     payload: String,
//! ) -> Result<Option<String>, RuntimeError> {
//!     Ok(Some(payload))
//! }
//!
//! let mut initializer = Initializer::new();
//! initializer.register_rpc("echo", echo)?;
//! initializer.register_rpc(
//!     "ping",
//!     |_ctx: Context, _logger: Logger, _nk: Arc<dyn ServerApi>, _payload: String| async move {
//!         Ok::<_, RuntimeError>(Some("pong".to_string()))
//!     },
//! )?;
//! # Ok::<(), RuntimeError>(())
//! ```

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::envelope::Envelope;
use crate::error::RuntimeError;
use crate::logger::Logger;
use crate::registry::Initializer;
use crate::server_api::ServerApi;
use crate::types::MatchmakerEntry;

/// A client-callable function with a string payload.
#[async_trait]
pub trait RpcFunction: Send + Sync {
    async fn call(
        &self,
        ctx: Context,
        logger: Logger,
        nk: Arc<dyn ServerApi>,
        payload: String,
    ) -> Result<Option<String>, RuntimeError>;
}

#[async_trait]
impl<F, Fut> RpcFunction for F
where
    F: Fn(Context, Logger, Arc<dyn ServerApi>, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, RuntimeError>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: Context,
        logger: Logger,
        nk: Arc<dyn ServerApi>,
        payload: String,
    ) -> Result<Option<String>, RuntimeError> {
        (self)(ctx, logger, nk, payload).await
    }
}

/// Runs before the host handles an inbound realtime message.
///
/// Returning `Ok(None)` drops the message: the host does nothing and no
/// after hook runs. Returning `Ok(Some(envelope))` continues with that
/// envelope, which may differ from the input.
#[async_trait]
pub trait RtBeforeHook: Send + Sync {
    async fn call(
        &self,
        ctx: Context,
        logger: Logger,
        nk: Arc<dyn ServerApi>,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, RuntimeError>;
}

#[async_trait]
impl<F, Fut> RtBeforeHook for F
where
    F: Fn(Context, Logger, Arc<dyn ServerApi>, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Envelope>, RuntimeError>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: Context,
        logger: Logger,
        nk: Arc<dyn ServerApi>,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, RuntimeError> {
        (self)(ctx, logger, nk, envelope).await
    }
}

/// Runs after the host handled an inbound realtime message.
///
/// Receives the host's reply (if any) and the input that was handled. The
/// result cannot change what the client sees.
#[async_trait]
pub trait RtAfterHook: Send + Sync {
    async fn call(
        &self,
        ctx: Context,
        logger: Logger,
        nk: Arc<dyn ServerApi>,
        output: Option<Envelope>,
        input: Envelope,
    ) -> Result<(), RuntimeError>;
}

#[async_trait]
impl<F, Fut> RtAfterHook for F
where
    F: Fn(Context, Logger, Arc<dyn ServerApi>, Option<Envelope>, Envelope) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = Result<(), RuntimeError>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: Context,
        logger: Logger,
        nk: Arc<dyn ServerApi>,
        output: Option<Envelope>,
        input: Envelope,
    ) -> Result<(), RuntimeError> {
        (self)(ctx, logger, nk, output, input).await
    }
}

/// Receives a completed matchmaker group.
///
/// May return the id of an authoritative match the group should join.
#[async_trait]
pub trait MatchmakerMatchedHook: Send + Sync {
    async fn call(
        &self,
        ctx: Context,
        logger: Logger,
        nk: Arc<dyn ServerApi>,
        entries: Vec<MatchmakerEntry>,
    ) -> Result<Option<String>, RuntimeError>;
}

#[async_trait]
impl<F, Fut> MatchmakerMatchedHook for F
where
    F: Fn(Context, Logger, Arc<dyn ServerApi>, Vec<MatchmakerEntry>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, RuntimeError>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: Context,
        logger: Logger,
        nk: Arc<dyn ServerApi>,
        entries: Vec<MatchmakerEntry>,
    ) -> Result<Option<String>, RuntimeError> {
        (self)(ctx, logger, nk, entries).await
    }
}

/// Entry point of a plugin module.
///
/// Called once at startup. All registrations must happen inside `init`;
/// the initializer is frozen into a registry afterwards.
#[async_trait]
pub trait InitModule: Send + Sync {
    /// Name used in host logs.
    fn name(&self) -> &str;

    async fn init(
        &self,
        ctx: &Context,
        logger: &Logger,
        nk: Arc<dyn ServerApi>,
        initializer: &mut Initializer,
    ) -> Result<(), RuntimeError>;
}
