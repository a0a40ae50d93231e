//! Authoritative match handlers and their host-facing type erasure.
//!
//! A [`MatchHandler`] is the plugin-side description of a match: a set of
//! lifecycle callbacks over a typed state value. The host never sees the
//! state type. It drives matches through [`MatchCore`], an object-safe trait
//! implemented by [`TypedMatchCore`], which keeps the state between calls
//! and feeds each callback the value returned by the previous one.
//!
//! # State threading
//!
//! Every callback takes the state by value and hands back the next state.
//! Returning `Ok(None)` (or `Err`) from any callback after init ends the
//! match, except `match_join_attempt`: there `Ok(None)` rejects the join and
//! the state from before the attempt is kept. Because the state is moved in and out, a callback can't keep a
//! stale copy around and the host can't accidentally feed an older value.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::Context;
use crate::dispatcher::MatchDispatcher;
use crate::error::RuntimeError;
use crate::logger::Logger;
use crate::presence::Presence;
use crate::server_api::ServerApi;
use crate::types::{JoinAttempt, JoinMetadata, MatchInit, MatchMessage, MatchParams, SignalReply};

/// Inputs shared by every match callback after init.
#[derive(Clone)]
pub struct MatchEnv {
    pub ctx: Context,
    pub logger: Logger,
    pub nk: Arc<dyn ServerApi>,
    pub dispatcher: Arc<dyn MatchDispatcher>,
}

impl std::fmt::Debug for MatchEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchEnv")
            .field("ctx", &self.ctx)
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

/// Lifecycle callbacks of an authoritative match.
///
/// The host guarantees that at most one callback runs at a time for a given
/// match, and that callbacks of one match never observe another match's
/// state.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use runtime_api::*;
/// use std::sync::Arc;
///
/// struct Counter;
///
/// #[async_trait]
/// impl MatchHandler for Counter {
///     type State = u64;
///
///     async fn match_init(
///         &self,
///         _ctx: &Context,
///         _logger: &Logger,
///         _nk: Arc<dyn ServerApi>,
///         _params: MatchParams,
///     ) -> Result<MatchInit<u64>, RuntimeError> {
///         Ok(MatchInit { state: 0, tick_rate: 1, label: "counter".into() })
///     }
///
///     async fn match_join_attempt(
///         &self,
///         _env: &MatchEnv,
///         _tick: u64,
///         state: u64,
///         _presence: &Presence,
///         _metadata: &JoinMetadata,
///     ) -> Result<Option<JoinAttempt<u64>>, RuntimeError> {
///         Ok(Some(JoinAttempt::accept(state)))
///     }
///
///     async fn match_join(&self, _env: &MatchEnv, _tick: u64, state: u64, _p: &[Presence])
///         -> Result<Option<u64>, RuntimeError> { Ok(Some(state)) }
///
///     async fn match_leave(&self, _env: &MatchEnv, _tick: u64, state: u64, _p: &[Presence])
///         -> Result<Option<u64>, RuntimeError> { Ok(Some(state)) }
///
///     async fn match_loop(&self, _env: &MatchEnv, _tick: u64, state: u64, _m: Vec<MatchMessage>)
///         -> Result<Option<u64>, RuntimeError> { Ok(Some(state + 1)) }
///
///     async fn match_terminate(&self, _env: &MatchEnv, _tick: u64, _state: u64, _grace: u64)
///         -> Result<Option<u64>, RuntimeError> { Ok(None) }
///
///     async fn match_signal(&self, _env: &MatchEnv, _tick: u64, state: u64, _data: String)
///         -> Result<Option<SignalReply<u64>>, RuntimeError> {
///         Ok(Some(SignalReply { data: Some(state.to_string()), state }))
///     }
/// }
/// ```
#[async_trait]
pub trait MatchHandler: Send + Sync + 'static {
    /// Opaque per-match state. Must be serialisable so the host can
    /// snapshot it, and cloneable so a null join attempt can restore it.
    type State: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Creates the initial state, tick rate and label.
    ///
    /// Runs before the match exists; failing here aborts creation.
    async fn match_init(
        &self,
        ctx: &Context,
        logger: &Logger,
        nk: Arc<dyn ServerApi>,
        params: MatchParams,
    ) -> Result<MatchInit<Self::State>, RuntimeError>;

    /// Decides whether a presence may join.
    ///
    /// `Ok(None)` rejects without a reason and leaves the state unchanged.
    async fn match_join_attempt(
        &self,
        env: &MatchEnv,
        tick: u64,
        state: Self::State,
        presence: &Presence,
        metadata: &JoinMetadata,
    ) -> Result<Option<JoinAttempt<Self::State>>, RuntimeError>;

    /// Called with the batch of presences accepted since the last loop.
    async fn match_join(
        &self,
        env: &MatchEnv,
        tick: u64,
        state: Self::State,
        presences: &[Presence],
    ) -> Result<Option<Self::State>, RuntimeError>;

    /// Called with presences that left or were kicked since the last loop.
    async fn match_leave(
        &self,
        env: &MatchEnv,
        tick: u64,
        state: Self::State,
        presences: &[Presence],
    ) -> Result<Option<Self::State>, RuntimeError>;

    /// Called once per tick with the messages received since the last tick,
    /// in arrival order. Runs even when `messages` is empty.
    async fn match_loop(
        &self,
        env: &MatchEnv,
        tick: u64,
        state: Self::State,
        messages: Vec<MatchMessage>,
    ) -> Result<Option<Self::State>, RuntimeError>;

    /// Called once when the match is asked to stop.
    ///
    /// Returning a state keeps the match lingering until the grace period
    /// elapses; `None` ends it immediately.
    async fn match_terminate(
        &self,
        env: &MatchEnv,
        tick: u64,
        state: Self::State,
        grace_seconds: u64,
    ) -> Result<Option<Self::State>, RuntimeError>;

    /// Handles an out-of-band signal and returns an optional reply.
    async fn match_signal(
        &self,
        env: &MatchEnv,
        tick: u64,
        state: Self::State,
        data: String,
    ) -> Result<Option<SignalReply<Self::State>>, RuntimeError>;
}

/// Outcome of one erased callback.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchStep<T> {
    /// The handler returned a next state; carries the callback's output.
    Continue(T),
    /// The handler returned no state or failed; the match must end.
    Stop(Option<RuntimeError>),
}

impl<T> MatchStep<T> {
    pub fn is_stop(&self) -> bool {
        matches!(self, MatchStep::Stop(_))
    }
}

/// Join decision without the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDecision {
    pub accept: bool,
    pub reject_message: Option<String>,
}

/// Object-safe view of one running match.
///
/// Methods take `&mut self`: the owner (the host's match task) is the only
/// caller, which is what serialises callbacks per match.
#[async_trait]
pub trait MatchCore: Send {
    async fn join_attempt(
        &mut self,
        env: &MatchEnv,
        tick: u64,
        presence: &Presence,
        metadata: &JoinMetadata,
    ) -> MatchStep<JoinDecision>;

    async fn join(&mut self, env: &MatchEnv, tick: u64, presences: &[Presence]) -> MatchStep<()>;

    async fn leave(&mut self, env: &MatchEnv, tick: u64, presences: &[Presence]) -> MatchStep<()>;

    async fn tick(&mut self, env: &MatchEnv, tick: u64, messages: Vec<MatchMessage>) -> MatchStep<()>;

    async fn terminate(&mut self, env: &MatchEnv, tick: u64, grace_seconds: u64) -> MatchStep<()>;

    async fn signal(&mut self, env: &MatchEnv, tick: u64, data: String) -> MatchStep<Option<String>>;

    /// Serialises the current state without touching it.
    fn snapshot(&self) -> Result<serde_json::Value, RuntimeError>;

    /// True once a callback has ended the match.
    fn is_finished(&self) -> bool;
}

/// [`MatchCore`] over a concrete handler.
pub struct TypedMatchCore<H: MatchHandler> {
    handler: Arc<H>,
    state: Option<H::State>,
}

impl<H: MatchHandler> TypedMatchCore<H> {
    pub fn new(handler: Arc<H>, state: H::State) -> Self {
        Self {
            handler,
            state: Some(state),
        }
    }

    fn take_state(&mut self) -> Result<H::State, RuntimeError> {
        self.state
            .take()
            .ok_or_else(|| RuntimeError::failed_precondition("match has already ended"))
    }

    /// Stores the next state and maps the result into a step.
    fn settle<T, R>(
        &mut self,
        result: Result<Option<T>, RuntimeError>,
        split: impl FnOnce(T) -> (H::State, R),
    ) -> MatchStep<R> {
        match result {
            Ok(Some(value)) => {
                let (next, output) = split(value);
                self.state = Some(next);
                MatchStep::Continue(output)
            }
            Ok(None) => MatchStep::Stop(None),
            Err(err) => MatchStep::Stop(Some(err)),
        }
    }
}

#[async_trait]
impl<H: MatchHandler> MatchCore for TypedMatchCore<H> {
    async fn join_attempt(
        &mut self,
        env: &MatchEnv,
        tick: u64,
        presence: &Presence,
        metadata: &JoinMetadata,
    ) -> MatchStep<JoinDecision> {
        let state = match self.take_state() {
            Ok(state) => state,
            Err(err) => return MatchStep::Stop(Some(err)),
        };
        let previous = state.clone();
        let result = self
            .handler
            .match_join_attempt(env, tick, state, presence, metadata)
            .await;
        if let Ok(None) = result {
            self.state = Some(previous);
            return MatchStep::Continue(JoinDecision {
                accept: false,
                reject_message: None,
            });
        }
        self.settle(result, |attempt| {
            let decision = JoinDecision {
                accept: attempt.accept,
                reject_message: attempt.reject_message,
            };
            (attempt.state, decision)
        })
    }

    async fn join(&mut self, env: &MatchEnv, tick: u64, presences: &[Presence]) -> MatchStep<()> {
        let state = match self.take_state() {
            Ok(state) => state,
            Err(err) => return MatchStep::Stop(Some(err)),
        };
        let result = self.handler.match_join(env, tick, state, presences).await;
        self.settle(result, |next| (next, ()))
    }

    async fn leave(&mut self, env: &MatchEnv, tick: u64, presences: &[Presence]) -> MatchStep<()> {
        let state = match self.take_state() {
            Ok(state) => state,
            Err(err) => return MatchStep::Stop(Some(err)),
        };
        let result = self.handler.match_leave(env, tick, state, presences).await;
        self.settle(result, |next| (next, ()))
    }

    async fn tick(&mut self, env: &MatchEnv, tick: u64, messages: Vec<MatchMessage>) -> MatchStep<()> {
        let state = match self.take_state() {
            Ok(state) => state,
            Err(err) => return MatchStep::Stop(Some(err)),
        };
        let result = self.handler.match_loop(env, tick, state, messages).await;
        self.settle(result, |next| (next, ()))
    }

    async fn terminate(&mut self, env: &MatchEnv, tick: u64, grace_seconds: u64) -> MatchStep<()> {
        let state = match self.take_state() {
            Ok(state) => state,
            Err(err) => return MatchStep::Stop(Some(err)),
        };
        let result = self
            .handler
            .match_terminate(env, tick, state, grace_seconds)
            .await;
        self.settle(result, |next| (next, ()))
    }

    async fn signal(&mut self, env: &MatchEnv, tick: u64, data: String) -> MatchStep<Option<String>> {
        let state = match self.take_state() {
            Ok(state) => state,
            Err(err) => return MatchStep::Stop(Some(err)),
        };
        let result = self.handler.match_signal(env, tick, state, data).await;
        self.settle(result, |reply| (reply.state, reply.data))
    }

    fn snapshot(&self) -> Result<serde_json::Value, RuntimeError> {
        match &self.state {
            Some(state) => Ok(serde_json::to_value(state)?),
            None => Err(RuntimeError::failed_precondition("match has already ended")),
        }
    }

    fn is_finished(&self) -> bool {
        self.state.is_none()
    }
}

/// A freshly initialised match, ready to be driven by the host.
pub struct MatchSetup {
    pub core: Box<dyn MatchCore>,
    pub tick_rate: u32,
    pub label: String,
}

impl std::fmt::Debug for MatchSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSetup")
            .field("tick_rate", &self.tick_rate)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Creates matches of one registered module.
#[async_trait]
pub trait MatchHandlerFactory: Send + Sync {
    /// Runs `match_init` and wraps the result for the host.
    async fn init(
        &self,
        ctx: &Context,
        logger: &Logger,
        nk: Arc<dyn ServerApi>,
        params: MatchParams,
    ) -> Result<MatchSetup, RuntimeError>;
}

/// Factory over a concrete [`MatchHandler`].
pub struct TypedMatchFactory<H: MatchHandler> {
    handler: Arc<H>,
    _phantom: PhantomData<fn() -> H>,
}

impl<H: MatchHandler> TypedMatchFactory<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<H: MatchHandler> MatchHandlerFactory for TypedMatchFactory<H> {
    async fn init(
        &self,
        ctx: &Context,
        logger: &Logger,
        nk: Arc<dyn ServerApi>,
        params: MatchParams,
    ) -> Result<MatchSetup, RuntimeError> {
        let init = self.handler.match_init(ctx, logger, nk, params).await?;
        Ok(MatchSetup {
            core: Box::new(TypedMatchCore::new(self.handler.clone(), init.state)),
            tick_rate: init.tick_rate,
            label: init.label,
        })
    }
}
