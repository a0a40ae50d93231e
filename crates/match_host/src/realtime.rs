//! Realtime message pipeline.
//!
//! Every inbound client envelope passes through three stages:
//!
//! 1. the before hook registered for its kind, which may replace or drop it
//! 2. host handling
//! 3. the after hook, which sees the host's reply and the (possibly
//!    replaced) input
//!
//! A dropped message has no host effect and skips the after hook.

use runtime_api::{
    Code, Context, Envelope, ExecutionMode, Logger, MatchDataSend, MatchJoin, MatchMessage,
    MatchSummary, Presence, PresenceReason, RtHookMessage, RuntimeError,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::host::RuntimeHost;

/// Runs inbound realtime envelopes through hooks and host handling.
#[derive(Clone)]
pub struct RealtimePipeline {
    host: Arc<RuntimeHost>,
}

impl RealtimePipeline {
    pub fn new(host: Arc<RuntimeHost>) -> Self {
        Self { host }
    }

    /// Processes one envelope sent by the session described in `ctx`.
    ///
    /// # Returns
    ///
    /// The reply for the sending session, if any. `Ok(None)` is returned
    /// both for messages without a reply and for messages a before hook
    /// dropped.
    pub async fn process(&self, ctx: &Context, envelope: Envelope) -> Result<Option<Envelope>, RuntimeError> {
        let kind = envelope.hook_kind().ok_or_else(|| {
            RuntimeError::invalid_argument("envelope is not a client message")
        })?;
        let hooks = self.host.hooks();
        let nk = self.host.nk()?;
        let logger = Logger::new("realtime").with_field("message", kind.as_str());

        let input = match hooks.rt_before(kind) {
            Some(hook) => {
                let before_ctx = self.hook_context(ctx, ExecutionMode::Before);
                match hook.call(before_ctx, logger.clone(), nk.clone(), envelope).await? {
                    None => {
                        debug!("Before hook dropped {} message", kind);
                        return Ok(None);
                    }
                    Some(replaced) => {
                        if replaced.hook_kind() != Some(kind) {
                            return Err(RuntimeError::internal(format!(
                                "before hook for {kind} returned a different message kind"
                            )));
                        }
                        replaced
                    }
                }
            }
            None => envelope,
        };

        let output = self.handle(ctx, kind, &input).await?;

        if let Some(hook) = hooks.rt_after(kind) {
            let after_ctx = self.hook_context(ctx, ExecutionMode::After);
            if let Err(err) = hook.call(after_ctx, logger, nk, output.clone(), input).await {
                warn!("After hook for {} failed: {}", kind, err);
            }
        }
        Ok(output)
    }

    fn hook_context(&self, ctx: &Context, mode: ExecutionMode) -> Context {
        let mut ctx = ctx.with_mode(mode);
        ctx.node = self.host.config().node.clone();
        ctx.env = self.host.config().env.clone();
        ctx
    }

    fn sender(&self, ctx: &Context) -> Result<Presence, RuntimeError> {
        match (&ctx.user_id, &ctx.session_id) {
            (Some(user_id), Some(session_id)) => Ok(Presence::new(
                user_id.clone(),
                session_id.clone(),
                ctx.username.clone().unwrap_or_default(),
                self.host.config().node.clone(),
            )),
            _ => Err(RuntimeError::new(
                Code::Unauthenticated,
                "realtime messages require a session",
            )),
        }
    }

    async fn handle(&self, ctx: &Context, kind: RtHookMessage, input: &Envelope) -> Result<Option<Envelope>, RuntimeError> {
        match input {
            Envelope::Ping {} => Ok(Some(Envelope::Pong {})),
            Envelope::Pong {} => Ok(None),
            Envelope::MatchCreate(_) => self.create_match(ctx).await.map(Some),
            Envelope::MatchJoin(join) => self.join_match(ctx, join).await.map(Some),
            Envelope::MatchLeave(leave) => {
                let presence = self.sender(ctx)?.with_reason(PresenceReason::Leave);
                self.host.matches().leave(&leave.match_id, vec![presence])?;
                Ok(None)
            }
            Envelope::MatchDataSend(send) => {
                self.send_data(ctx, send)?;
                Ok(None)
            }
            _ => Err(RuntimeError::unimplemented(format!(
                "{kind} messages are not handled by this node"
            ))),
        }
    }

    async fn create_match(&self, ctx: &Context) -> Result<Envelope, RuntimeError> {
        let presence = self.sender(ctx)?;
        let module = self
            .host
            .config()
            .realtime_match_module
            .clone()
            .ok_or_else(|| RuntimeError::unimplemented("client match creation is not configured"))?;

        let match_id = self.host.nk()?.match_create(&module, Default::default()).await?;
        let info = self
            .host
            .matches()
            .get(&match_id)
            .ok_or_else(|| RuntimeError::not_found(format!("match {match_id} stopped during creation")))?;
        Ok(Envelope::Match(MatchSummary::from_info(&info, Some(presence))))
    }

    async fn join_match(&self, ctx: &Context, join: &MatchJoin) -> Result<Envelope, RuntimeError> {
        let presence = self.sender(ctx)?;
        let decision = self
            .host
            .matches()
            .join_attempt(&join.match_id, presence.clone(), join.join_metadata())
            .await?;
        if !decision.accept {
            return Err(RuntimeError::permission_denied(
                decision
                    .reject_message
                    .unwrap_or_else(|| "match join rejected".to_string()),
            ));
        }

        let info = self
            .host
            .matches()
            .get(&join.match_id)
            .ok_or_else(|| RuntimeError::not_found(format!("match not found: {}", join.match_id)))?;
        let mut summary = MatchSummary::from_info(&info, Some(presence));
        summary.presences = self.host.matches().presences(&join.match_id).unwrap_or_default();
        Ok(Envelope::Match(summary))
    }

    fn send_data(&self, ctx: &Context, send: &MatchDataSend) -> Result<(), RuntimeError> {
        let sender = self.sender(ctx)?;
        let message = MatchMessage::new(sender, send.op_code, send.data.clone().unwrap_or_default());
        let message = MatchMessage {
            reliable: send.reliable,
            ..message
        };
        if !self.host.matches().send_data(&send.match_id, message)? {
            debug!("Dropped data from non-participant for match {}", send.match_id);
        }
        Ok(())
    }
}
