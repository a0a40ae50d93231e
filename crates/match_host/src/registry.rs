//! Registry of running matches.

use dashmap::DashMap;
use futures::future::join_all;
use runtime_api::{
    Context, ExecutionMode, JoinDecision, JoinMetadata, Logger, MatchHandlerFactory, MatchId,
    MatchInfo, MatchListFilter, MatchMessage, MatchParams, Presence, PresenceReason, ServerApi,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::actor::{spawn_match, MatchCall, MatchHandle, MatchPhase, SpawnParams};
use crate::config::HostConfig;
use crate::error::HostError;
use crate::sink::OutboundSink;

/// Tracks every running match on this node and routes requests to them.
///
/// Lookups and listings read shared match state directly; joins, leaves,
/// signals and terminate requests are queued to the owning match task.
pub struct MatchRegistry {
    config: Arc<HostConfig>,
    matches: Arc<DashMap<MatchId, MatchHandle>>,
    sink: Arc<dyn OutboundSink>,
}

impl MatchRegistry {
    pub fn new(config: Arc<HostConfig>, sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            config,
            matches: Arc::new(DashMap::new()),
            sink,
        }
    }

    /// Initialises and starts a match.
    ///
    /// `match_init` runs on the caller's task; the match only exists once it
    /// has returned a valid tick rate and label. Any failure leaves nothing
    /// behind.
    ///
    /// # Arguments
    ///
    /// * `module` - Registered module name, used for logging and listings
    /// * `factory` - Handler factory registered under `module`
    /// * `base_ctx` - Context carrying node and environment for callbacks
    /// * `nk` - Server API handed to the match's callbacks
    /// * `params` - Creation parameters passed to `match_init`
    pub async fn create(
        &self,
        module: &str,
        factory: Arc<dyn MatchHandlerFactory>,
        base_ctx: Context,
        nk: Arc<dyn ServerApi>,
        params: MatchParams,
    ) -> Result<MatchId, HostError> {
        let match_id = MatchId::new(self.config.node.clone());
        let mut init_ctx = base_ctx.with_mode(ExecutionMode::MatchCreate);
        init_ctx.match_id = Some(match_id.clone());
        init_ctx.match_node = Some(match_id.node.clone());
        let logger = Logger::new(module).with_field("match_id", match_id.to_string());

        let setup = factory
            .init(&init_ctx, &logger, nk.clone(), params)
            .await
            .map_err(HostError::InitFailed)?;

        if setup.tick_rate == 0 || setup.tick_rate > self.config.max_tick_rate {
            return Err(HostError::InvalidTickRate {
                tick_rate: setup.tick_rate,
                max: self.config.max_tick_rate,
            });
        }
        if setup.label.len() > self.config.label_max_bytes {
            return Err(HostError::LabelTooLong {
                len: setup.label.len(),
                max: self.config.label_max_bytes,
            });
        }

        info!(
            "🎮 Created match {} (module: {}, tick rate: {})",
            match_id, module, setup.tick_rate
        );
        spawn_match(
            SpawnParams {
                match_id: match_id.clone(),
                module: module.to_string(),
                setup,
                base_ctx,
                nk,
                sink: self.sink.clone(),
                matches: self.matches.clone(),
            },
            &self.config,
        );
        Ok(match_id)
    }

    fn handle(&self, match_id: &MatchId) -> Result<MatchHandle, HostError> {
        self.matches
            .get(match_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HostError::MatchNotFound(match_id.to_string()))
    }

    fn queue_call(&self, handle: &MatchHandle, match_id: &MatchId, call: MatchCall) -> Result<(), HostError> {
        handle.calls.try_send(call).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => HostError::QueueFull(match_id.to_string()),
            mpsc::error::TrySendError::Closed(_) => HostError::MatchNotFound(match_id.to_string()),
        })
    }

    /// Public info for a running match.
    pub fn get(&self, match_id: &MatchId) -> Option<MatchInfo> {
        self.matches.get(match_id).map(|entry| entry.shared.info())
    }

    /// Running matches accepted by `filter`, at most `filter.limit` of them.
    pub fn list(&self, filter: &MatchListFilter) -> Vec<MatchInfo> {
        let mut found: Vec<MatchInfo> = self
            .matches
            .iter()
            .filter(|entry| entry.phase().is_running())
            .map(|entry| entry.shared.info())
            .filter(|info| filter.matches(info))
            .collect();
        found.sort_by(|a, b| {
            b.size
                .cmp(&a.size)
                .then_with(|| a.match_id.to_string().cmp(&b.match_id.to_string()))
        });
        found.truncate(filter.limit);
        found
    }

    /// Current presences of a running match.
    pub fn presences(&self, match_id: &MatchId) -> Option<Vec<Presence>> {
        self.matches.get(match_id).map(|entry| entry.shared.presences())
    }

    /// Asks a match to admit a presence and waits for its decision.
    pub async fn join_attempt(
        &self,
        match_id: &MatchId,
        presence: Presence,
        metadata: JoinMetadata,
    ) -> Result<JoinDecision, HostError> {
        let handle = self.handle(match_id)?;
        let (reply, rx) = oneshot::channel();
        self.queue_call(
            &handle,
            match_id,
            MatchCall::JoinAttempt {
                presence,
                metadata,
                reply,
            },
        )?;
        rx.await
            .map_err(|_| HostError::MatchStopping(match_id.to_string()))?
    }

    /// Removes presences from a match; `match_leave` runs before its next loop.
    pub fn leave(&self, match_id: &MatchId, presences: Vec<Presence>) -> Result<(), HostError> {
        let handle = self.handle(match_id)?;
        self.queue_call(&handle, match_id, MatchCall::Leave { presences })
    }

    /// Removes a presence from every match it is in, reporting it as a
    /// disconnect. Returns how many matches it left.
    pub fn disconnect(&self, presence: &Presence) -> usize {
        let joined: Vec<MatchId> = self
            .matches
            .iter()
            .filter(|entry| entry.shared.contains(presence))
            .map(|entry| entry.key().clone())
            .collect();
        let departing = presence.with_reason(PresenceReason::Disconnect);
        joined
            .iter()
            .filter(|match_id| self.leave(match_id, vec![departing.clone()]).is_ok())
            .count()
    }

    /// Buffers data for the match's next loop.
    ///
    /// Data from a sender that is not in the match is dropped and `false`
    /// is returned.
    pub fn send_data(&self, match_id: &MatchId, message: MatchMessage) -> Result<bool, HostError> {
        let handle = self.handle(match_id)?;
        if !handle.phase().is_running() || !handle.shared.contains(&message.sender) {
            return Ok(false);
        }
        handle.inputs.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => HostError::QueueFull(match_id.to_string()),
            mpsc::error::TrySendError::Closed(_) => HostError::MatchNotFound(match_id.to_string()),
        })?;
        Ok(true)
    }

    /// Sends a signal and waits for the match's reply.
    pub async fn signal(&self, match_id: &MatchId, data: String) -> Result<Option<String>, HostError> {
        let handle = self.handle(match_id)?;
        let (reply, rx) = oneshot::channel();
        self.queue_call(&handle, match_id, MatchCall::Signal { data, reply })?;
        rx.await
            .map_err(|_| HostError::MatchStopping(match_id.to_string()))?
    }

    /// Asks a match to terminate with the given grace period.
    ///
    /// Returns once the request is queued; use [`wait_terminated`](Self::wait_terminated)
    /// to wait for teardown.
    pub async fn terminate(&self, match_id: &MatchId, grace_seconds: u64) -> Result<(), HostError> {
        let handle = self.handle(match_id)?;
        handle
            .calls
            .send(MatchCall::Terminate { grace_seconds })
            .await
            .map_err(|_| HostError::MatchNotFound(match_id.to_string()))
    }

    /// Waits until a match has been torn down. Returns immediately for
    /// unknown IDs.
    pub async fn wait_terminated(&self, match_id: &MatchId) {
        if let Ok(handle) = self.handle(match_id) {
            handle.wait_terminated().await;
        }
    }

    /// Lifecycle phase of a match still in the registry.
    pub fn phase(&self, match_id: &MatchId) -> Option<MatchPhase> {
        self.matches.get(match_id).map(|entry| entry.phase())
    }

    /// Serialised state of a match, taken between callbacks.
    pub async fn snapshot(&self, match_id: &MatchId) -> Result<serde_json::Value, HostError> {
        let handle = self.handle(match_id)?;
        let (reply, rx) = oneshot::channel();
        self.queue_call(&handle, match_id, MatchCall::Snapshot { reply })?;
        let state = rx
            .await
            .map_err(|_| HostError::MatchStopping(match_id.to_string()))??;
        Ok(state)
    }

    pub fn count(&self) -> usize {
        self.matches.len()
    }

    /// Terminates every match concurrently and waits for all of them.
    pub async fn shutdown(&self, grace_seconds: u64) {
        let handles: Vec<(MatchId, MatchHandle)> = self
            .matches
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        if handles.is_empty() {
            return;
        }
        info!(
            "🛑 Stopping {} matches with {}s grace period",
            handles.len(),
            grace_seconds
        );

        let stops = handles.into_iter().map(|(match_id, handle)| async move {
            if handle
                .calls
                .send(MatchCall::Terminate { grace_seconds })
                .await
                .is_err()
            {
                warn!("Match {} was already gone during shutdown", match_id);
            }
            handle.wait_terminated().await;
        });
        join_all(stops).await;
        info!("✅ All matches stopped");
    }
}
