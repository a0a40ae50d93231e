//! Per-match task driving the lifecycle state machine.
//!
//! Every running match is owned by exactly one tokio task. All of the
//! match's callbacks run inside that task, which is what guarantees that no
//! two callbacks of one match overlap and that the tick counter never goes
//! backwards. Different matches are independent tasks and run concurrently.
//!
//! # Cycle
//!
//! On every tick the task runs, in order:
//!
//! 1. `match_leave` with presences that left or were kicked since the last tick
//! 2. `match_join` with presences accepted since the last tick
//! 3. `match_loop` with all data received since the last tick, in arrival order
//!
//! Join attempts, leaves, signals and terminate requests arrive on a call
//! queue and are handled between ticks, using the current tick number.
//! The loop fires on every tick even when no data arrived; missed ticks are
//! caught up in a burst instead of being skipped.

use dashmap::DashMap;
use parking_lot::RwLock;
use runtime_api::{
    Context, JoinDecision, JoinMetadata, Logger, MatchCore, MatchEnv, MatchId, MatchInfo,
    MatchMessage, MatchSetup, MatchStep, Presence, PresenceReason, RuntimeError, ServerApi,
};
use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::dispatcher::HostDispatcher;
use crate::error::HostError;
use crate::sink::OutboundSink;

/// Lifecycle phase of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchPhase {
    /// Created but its task has not started yet
    Uninitialized,
    /// Ticking and accepting joins
    Active,
    /// Terminate was requested; no more ticks, joins are rejected
    Terminating,
    /// Finished; no further callbacks will run
    Terminated,
}

impl MatchPhase {
    /// Whether the match still takes joins and data.
    pub fn is_running(self) -> bool {
        matches!(self, MatchPhase::Uninitialized | MatchPhase::Active)
    }
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchPhase::Uninitialized => "uninitialized",
            MatchPhase::Active => "active",
            MatchPhase::Terminating => "terminating",
            MatchPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

type PresenceKey = (String, String);

/// State of a match visible outside its task.
///
/// Holds the presence list and label so lookups, listings and the
/// dispatcher never have to wait for the match task.
pub(crate) struct MatchShared {
    match_id: MatchId,
    module: String,
    tick_rate: u32,
    label: RwLock<String>,
    presences: RwLock<HashMap<PresenceKey, Presence>>,
}

impl MatchShared {
    pub(crate) fn new(match_id: MatchId, module: &str, tick_rate: u32, label: &str) -> Self {
        Self {
            match_id,
            module: module.to_string(),
            tick_rate,
            label: RwLock::new(label.to_string()),
            presences: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn info(&self) -> MatchInfo {
        MatchInfo {
            match_id: self.match_id.clone(),
            authoritative: true,
            size: self.size(),
            label: self.label.read().clone(),
            tick_rate: self.tick_rate,
            module: self.module.clone(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.presences.read().len()
    }

    pub(crate) fn contains(&self, presence: &Presence) -> bool {
        self.presences.read().contains_key(&presence.key())
    }

    pub(crate) fn presences(&self) -> Vec<Presence> {
        self.presences.read().values().cloned().collect()
    }

    pub(crate) fn add_presence(&self, presence: Presence) -> bool {
        self.presences.write().insert(presence.key(), presence).is_none()
    }

    /// Removes the given presences, returning the stored records that were present.
    pub(crate) fn remove_presences(&self, presences: &[Presence]) -> Vec<Presence> {
        let mut stored = self.presences.write();
        presences
            .iter()
            .filter_map(|p| stored.remove(&p.key()))
            .collect()
    }

    /// Session IDs of the participants among `presences`, or of everyone.
    pub(crate) fn resolve_targets(&self, presences: Option<&[Presence]>) -> Vec<String> {
        let stored = self.presences.read();
        match presences {
            Some(subset) => subset
                .iter()
                .filter(|p| stored.contains_key(&p.key()))
                .map(|p| p.session_id.clone())
                .collect(),
            None => stored.values().map(|p| p.session_id.clone()).collect(),
        }
    }

    pub(crate) fn set_label(&self, label: &str) {
        *self.label.write() = label.to_string();
    }

    fn clear_presences(&self) {
        self.presences.write().clear();
    }
}

/// Requests handled by a match task between ticks.
pub(crate) enum MatchCall {
    JoinAttempt {
        presence: Presence,
        metadata: JoinMetadata,
        reply: oneshot::Sender<Result<JoinDecision, HostError>>,
    },
    Leave {
        presences: Vec<Presence>,
    },
    Signal {
        data: String,
        reply: oneshot::Sender<Result<Option<String>, HostError>>,
    },
    Terminate {
        grace_seconds: u64,
    },
    Snapshot {
        reply: oneshot::Sender<Result<serde_json::Value, RuntimeError>>,
    },
}

/// Registry-side handle to a running match.
#[derive(Clone)]
pub(crate) struct MatchHandle {
    pub(crate) shared: Arc<MatchShared>,
    pub(crate) calls: mpsc::Sender<MatchCall>,
    pub(crate) inputs: mpsc::Sender<MatchMessage>,
    pub(crate) phase: watch::Receiver<MatchPhase>,
}

impl MatchHandle {
    pub(crate) fn phase(&self) -> MatchPhase {
        *self.phase.borrow()
    }

    /// Waits until the match task has finished.
    pub(crate) async fn wait_terminated(&self) {
        let mut phase = self.phase.clone();
        // A closed channel means the task is gone.
        let _ = phase.wait_for(|p| *p == MatchPhase::Terminated).await;
    }
}

/// Everything needed to start a match task after a successful init.
pub(crate) struct SpawnParams {
    pub(crate) match_id: MatchId,
    pub(crate) module: String,
    pub(crate) setup: MatchSetup,
    pub(crate) base_ctx: Context,
    pub(crate) nk: Arc<dyn ServerApi>,
    pub(crate) sink: Arc<dyn OutboundSink>,
    pub(crate) matches: Arc<DashMap<MatchId, MatchHandle>>,
}

/// Registers a handle for the match and starts its task.
pub(crate) fn spawn_match(params: SpawnParams, config: &HostConfig) -> MatchHandle {
    let SpawnParams {
        match_id,
        module,
        setup,
        base_ctx,
        nk,
        sink,
        matches,
    } = params;
    let MatchSetup {
        core,
        tick_rate,
        label,
    } = setup;

    let shared = Arc::new(MatchShared::new(match_id.clone(), &module, tick_rate, &label));
    let dispatcher = Arc::new(HostDispatcher::new(
        match_id.clone(),
        shared.clone(),
        sink,
        config.label_max_bytes,
    ));
    let (call_tx, call_rx) = mpsc::channel(config.call_queue_size);
    let (input_tx, input_rx) = mpsc::channel(config.input_queue_size);
    let (phase_tx, phase_rx) = watch::channel(MatchPhase::Uninitialized);

    let handle = MatchHandle {
        shared: shared.clone(),
        calls: call_tx,
        inputs: input_tx,
        phase: phase_rx,
    };
    matches.insert(match_id.clone(), handle.clone());

    let actor = MatchActor {
        logger: Logger::new(module).with_field("match_id", match_id.to_string()),
        match_id,
        core,
        shared,
        dispatcher,
        base_ctx,
        nk,
        tick_rate,
        calls: call_rx,
        inputs: input_rx,
        phase: phase_tx,
        matches,
        tick: 0,
        pending_joins: Vec::new(),
        pending_leaves: Vec::new(),
        linger_until: None,
        max_empty: (config.max_empty_sec > 0).then(|| Duration::from_secs(config.max_empty_sec)),
        empty_since: None,
    };
    tokio::spawn(actor.run());
    handle
}

/// Interval between ticks for a validated tick rate.
pub(crate) fn tick_period(tick_rate: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(tick_rate.max(1)))
}

struct MatchActor {
    match_id: MatchId,
    core: Box<dyn MatchCore>,
    shared: Arc<MatchShared>,
    dispatcher: Arc<HostDispatcher>,
    base_ctx: Context,
    logger: Logger,
    nk: Arc<dyn ServerApi>,
    tick_rate: u32,
    calls: mpsc::Receiver<MatchCall>,
    inputs: mpsc::Receiver<MatchMessage>,
    phase: watch::Sender<MatchPhase>,
    matches: Arc<DashMap<MatchId, MatchHandle>>,
    tick: u64,
    pending_joins: Vec<Presence>,
    pending_leaves: Vec<Presence>,
    linger_until: Option<Instant>,
    max_empty: Option<Duration>,
    empty_since: Option<Instant>,
}

impl MatchActor {
    async fn run(mut self) {
        let period = tick_period(self.tick_rate);
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        self.phase.send_replace(MatchPhase::Active);
        info!(
            "🎮 Match {} active (module: {}, tick rate: {})",
            self.match_id,
            self.logger.module(),
            self.tick_rate
        );

        loop {
            let flow = match self.linger_until {
                None => {
                    tokio::select! {
                        biased;
                        _ = ticker.tick() => self.on_tick().await,
                        call = self.calls.recv() => match call {
                            Some(call) => self.on_call(call).await,
                            None => self.begin_terminate(0).await,
                        },
                    }
                }
                Some(deadline) => {
                    tokio::select! {
                        biased;
                        _ = time::sleep_until(deadline) => ControlFlow::Break(()),
                        call = self.calls.recv() => match call {
                            Some(call) => self.on_call(call).await,
                            None => ControlFlow::Break(()),
                        },
                    }
                }
            };
            if flow.is_break() {
                break;
            }
        }

        self.finish();
    }

    fn env(&self) -> MatchEnv {
        let label = self.shared.label.read().clone();
        MatchEnv {
            ctx: self.base_ctx.for_match(&self.match_id, &label, self.tick_rate),
            logger: self.logger.clone(),
            nk: self.nk.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }

    /// Flushes deferred messages and unwraps a callback result.
    ///
    /// `None` means the match must end.
    fn settle<T>(&self, callback: &str, step: MatchStep<T>) -> Option<T> {
        self.dispatcher.flush_deferred();
        match step {
            MatchStep::Continue(output) => Some(output),
            MatchStep::Stop(None) => {
                info!("🏁 Match {} ended by {}", self.match_id, callback);
                None
            }
            MatchStep::Stop(Some(err)) => {
                error!("❌ Match {} {} failed: {}", self.match_id, callback, err);
                None
            }
        }
    }

    async fn on_tick(&mut self) -> ControlFlow<()> {
        let mut leaves = std::mem::take(&mut self.pending_leaves);
        for kicked in self.dispatcher.take_kicked() {
            if !self.drop_pending_join(&kicked) {
                leaves.push(kicked.with_reason(PresenceReason::Leave));
            }
        }
        if !leaves.is_empty() {
            let env = self.env();
            let step = self.core.leave(&env, self.tick, &leaves).await;
            if self.settle("match_leave", step).is_none() {
                return ControlFlow::Break(());
            }
        }

        let joins = std::mem::take(&mut self.pending_joins);
        if !joins.is_empty() {
            let env = self.env();
            let step = self.core.join(&env, self.tick, &joins).await;
            if self.settle("match_join", step).is_none() {
                return ControlFlow::Break(());
            }
        }

        let mut messages = Vec::new();
        while let Ok(message) = self.inputs.try_recv() {
            messages.push(message);
        }
        let env = self.env();
        let step = self.core.tick(&env, self.tick, messages).await;
        if self.settle("match_loop", step).is_none() {
            return ControlFlow::Break(());
        }
        self.tick += 1;

        self.check_empty().await
    }

    async fn on_call(&mut self, call: MatchCall) -> ControlFlow<()> {
        match call {
            MatchCall::JoinAttempt {
                presence,
                metadata,
                reply,
            } => self.on_join_attempt(presence, metadata, reply).await,
            MatchCall::Leave { presences } => {
                let removed = self.shared.remove_presences(&presences);
                if self.linger_until.is_none() {
                    for stored in removed {
                        if self.drop_pending_join(&stored) {
                            continue;
                        }
                        let reason = presences
                            .iter()
                            .find(|p| p.same_participant(&stored))
                            .map(|p| p.reason)
                            .filter(|reason| *reason == PresenceReason::Disconnect)
                            .unwrap_or(PresenceReason::Leave);
                        self.pending_leaves.push(stored.with_reason(reason));
                    }
                }
                ControlFlow::Continue(())
            }
            MatchCall::Signal { data, reply } => {
                let env = self.env();
                let step = self.core.signal(&env, self.tick, data).await;
                match self.settle("match_signal", step) {
                    Some(response) => {
                        let _ = reply.send(Ok(response));
                        ControlFlow::Continue(())
                    }
                    None => {
                        let _ = reply.send(Err(HostError::MatchStopping(self.match_id.to_string())));
                        ControlFlow::Break(())
                    }
                }
            }
            MatchCall::Terminate { grace_seconds } => {
                if self.linger_until.is_some() {
                    debug!("Match {} is already terminating", self.match_id);
                    return ControlFlow::Continue(());
                }
                self.begin_terminate(grace_seconds).await
            }
            MatchCall::Snapshot { reply } => {
                let _ = reply.send(self.core.snapshot());
                ControlFlow::Continue(())
            }
        }
    }

    async fn on_join_attempt(
        &mut self,
        presence: Presence,
        metadata: JoinMetadata,
        reply: oneshot::Sender<Result<JoinDecision, HostError>>,
    ) -> ControlFlow<()> {
        if self.linger_until.is_some() {
            let _ = reply.send(Err(HostError::MatchStopping(self.match_id.to_string())));
            return ControlFlow::Continue(());
        }
        // Retried join from a presence that is already in.
        if self.shared.contains(&presence) {
            let _ = reply.send(Ok(JoinDecision {
                accept: true,
                reject_message: None,
            }));
            return ControlFlow::Continue(());
        }

        let env = self.env();
        let step = self
            .core
            .join_attempt(&env, self.tick, &presence, &metadata)
            .await;
        match self.settle("match_join_attempt", step) {
            Some(decision) => {
                if decision.accept {
                    let joined = presence.with_reason(PresenceReason::Join);
                    self.shared.add_presence(joined.clone());
                    self.pending_joins.push(joined);
                } else {
                    debug!(
                        "Match {} rejected {}: {}",
                        self.match_id,
                        presence.username,
                        decision.reject_message.as_deref().unwrap_or("no reason")
                    );
                }
                let _ = reply.send(Ok(decision));
                ControlFlow::Continue(())
            }
            // Only an error ends the match here; a null attempt is a reject.
            None => {
                let _ = reply.send(Err(HostError::MatchStopping(self.match_id.to_string())));
                ControlFlow::Break(())
            }
        }
    }

    /// Removes a not-yet-reported join. Returns whether one was pending.
    fn drop_pending_join(&mut self, presence: &Presence) -> bool {
        match self
            .pending_joins
            .iter()
            .position(|p| p.same_participant(presence))
        {
            Some(index) => {
                self.pending_joins.remove(index);
                true
            }
            None => false,
        }
    }

    async fn begin_terminate(&mut self, grace_seconds: u64) -> ControlFlow<()> {
        self.phase.send_replace(MatchPhase::Terminating);
        info!(
            "⏳ Match {} terminating with {}s grace period",
            self.match_id, grace_seconds
        );

        let grace = Duration::from_secs(grace_seconds);
        let deadline = Instant::now() + grace;
        let env = self.env();
        let tick = self.tick;
        let outcome = time::timeout(grace, self.core.terminate(&env, tick, grace_seconds)).await;

        match outcome {
            Ok(step) => match self.settle("match_terminate", step) {
                Some(()) if grace_seconds > 0 => {
                    self.linger_until = Some(deadline);
                    ControlFlow::Continue(())
                }
                _ => ControlFlow::Break(()),
            },
            Err(_) => {
                self.dispatcher.discard_deferred();
                warn!(
                    "⏰ Match {} terminate did not return within {}s, forcing teardown",
                    self.match_id, grace_seconds
                );
                ControlFlow::Break(())
            }
        }
    }

    async fn check_empty(&mut self) -> ControlFlow<()> {
        let Some(max_empty) = self.max_empty else {
            return ControlFlow::Continue(());
        };
        if self.shared.size() > 0 {
            self.empty_since = None;
            return ControlFlow::Continue(());
        }
        let now = Instant::now();
        let since = *self.empty_since.get_or_insert(now);
        if now.duration_since(since) >= max_empty {
            info!(
                "🧹 Match {} empty for {}s, stopping",
                self.match_id,
                max_empty.as_secs()
            );
            return self.begin_terminate(0).await;
        }
        ControlFlow::Continue(())
    }

    fn finish(&mut self) {
        // Kicks issued while lingering are never reported to match_leave.
        let unreported = self.dispatcher.take_kicked();
        if !unreported.is_empty() {
            debug!(
                "Match {} dropped {} kick(s) issued during teardown",
                self.match_id,
                unreported.len()
            );
        }
        self.dispatcher.discard_deferred();
        self.matches.remove(&self.match_id);
        self.shared.clear_presences();
        self.phase.send_replace(MatchPhase::Terminated);
        info!(
            "🛑 Match {} terminated after {} ticks",
            self.match_id, self.tick
        );
    }
}
