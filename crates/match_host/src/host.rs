//! The runtime host: owns the registry, matches and streams, and serves the
//! server API to plugin code.

use async_trait::async_trait;
use parking_lot::RwLock;
use runtime_api::{
    Context, ExecutionMode, HookRegistry, InitModule, Initializer, Logger, MatchId, MatchInfo,
    MatchListFilter, MatchParams, MatchmakerEntry, Presence, RuntimeError, ServerApi, Stream,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::error::HostError;
use crate::realtime::RealtimePipeline;
use crate::registry::MatchRegistry;
use crate::sink::OutboundSink;
use crate::streams::StreamTracker;

/// The core runtime host.
///
/// `RuntimeHost` ties together the frozen hook registry, the match registry
/// and stream tracking, and implements [`ServerApi`] for the plugin code it
/// runs. It always lives in an `Arc`: it hands itself to callbacks as their
/// server API.
///
/// # Lifecycle
///
/// 1. [`RuntimeHost::new`] validates the configuration
/// 2. [`RuntimeHost::load_modules`] runs every module's init and freezes
///    their registrations
/// 3. RPCs, realtime messages and matchmaker results are dispatched
/// 4. [`RuntimeHost::shutdown`] terminates all matches with a grace period
pub struct RuntimeHost {
    config: Arc<HostConfig>,
    hooks: RwLock<Arc<HookRegistry>>,
    modules_loaded: AtomicBool,
    matches: MatchRegistry,
    streams: StreamTracker,
    self_ref: Weak<RuntimeHost>,
}

impl RuntimeHost {
    /// Creates a host with an empty registry.
    ///
    /// # Arguments
    ///
    /// * `config` - Host settings, validated here
    /// * `sink` - Destination for everything sent to client sessions
    pub fn new(config: HostConfig, sink: Arc<dyn OutboundSink>) -> Result<Arc<Self>, HostError> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Arc::new_cyclic(|self_ref| Self {
            matches: MatchRegistry::new(config.clone(), sink.clone()),
            streams: StreamTracker::new(sink),
            hooks: RwLock::new(Arc::new(HookRegistry::default())),
            modules_loaded: AtomicBool::new(false),
            self_ref: self_ref.clone(),
            config,
        }))
    }

    /// Runs each module's init in order and installs the combined registry.
    ///
    /// Registrations from all modules share one [`Initializer`], so two
    /// modules cannot claim the same RPC id or hook. Can only be called once.
    pub async fn load_modules(&self, modules: &[Arc<dyn InitModule>]) -> Result<(), HostError> {
        if self.modules_loaded.swap(true, Ordering::SeqCst) {
            return Err(HostError::Runtime(RuntimeError::failed_precondition(
                "modules have already been loaded",
            )));
        }

        let nk = self.nk()?;
        let mut initializer = Initializer::new();
        for module in modules {
            let ctx = self.context(ExecutionMode::RunOnce);
            let logger = Logger::new(module.name());
            if let Err(err) = module.init(&ctx, &logger, nk.clone(), &mut initializer).await {
                error!("❌ Module {} failed to initialize: {}", module.name(), err);
                return Err(err.into());
            }
            info!("🔌 Loaded module {}", module.name());
        }

        let registry = initializer.build();
        info!(
            "📋 Registry ready: {} RPCs, {} realtime hooks, {} match modules",
            registry.rpc_ids().len(),
            registry.hook_count(),
            registry.match_modules().len()
        );
        if let Some(module) = &self.config.realtime_match_module {
            if registry.match_handler(module).is_none() {
                warn!(
                    "⚠️ Realtime match module '{}' is not registered; client match creation will fail",
                    module
                );
            }
        }
        *self.hooks.write() = Arc::new(registry);
        Ok(())
    }

    /// The frozen hook registry.
    pub fn hooks(&self) -> Arc<HookRegistry> {
        self.hooks.read().clone()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn matches(&self) -> &MatchRegistry {
        &self.matches
    }

    pub fn streams(&self) -> &StreamTracker {
        &self.streams
    }

    /// Pipeline for inbound realtime messages.
    pub fn realtime(self: &Arc<Self>) -> RealtimePipeline {
        RealtimePipeline::new(self.clone())
    }

    /// This host as the server API handed to plugin callbacks.
    pub fn nk(&self) -> Result<Arc<dyn ServerApi>, RuntimeError> {
        let host: Arc<dyn ServerApi> = self
            .self_ref
            .upgrade()
            .ok_or_else(|| RuntimeError::internal("runtime host is shutting down"))?;
        Ok(host)
    }

    /// A fresh context for this node in the given mode.
    pub fn context(&self, mode: ExecutionMode) -> Context {
        let mut ctx = Context::new(self.config.node.clone(), mode);
        ctx.env = self.config.env.clone();
        ctx
    }

    /// Invokes a registered RPC function.
    ///
    /// Caller identity is taken from `ctx`; node, environment and execution
    /// mode are filled in by the host. Unknown ids fail with `NOT_FOUND`.
    pub async fn rpc_call(&self, ctx: Context, id: &str, payload: String) -> Result<Option<String>, RuntimeError> {
        let function = self
            .hooks()
            .rpc(id)
            .ok_or_else(|| RuntimeError::not_found(format!("rpc function not found: {id}")))?;

        let mut ctx = ctx.with_mode(ExecutionMode::Rpc);
        ctx.node = self.config.node.clone();
        ctx.env = self.config.env.clone();
        let logger = Logger::new("rpc").with_field("rpc_id", id.to_lowercase());

        debug!("RPC {} invoked", id);
        let result = function.call(ctx, logger, self.nk()?, payload).await;
        if let Err(err) = &result {
            warn!("RPC {} failed: {}", id, err);
        }
        result
    }

    /// Hands a completed matchmaker group to the matched hook.
    ///
    /// Returns `None` when no hook is registered or the hook chose not to
    /// place the group in an authoritative match. A returned id must refer
    /// to a running match.
    pub async fn matchmaker_matched(&self, entries: Vec<MatchmakerEntry>) -> Result<Option<MatchId>, RuntimeError> {
        let Some(hook) = self.hooks().matchmaker_matched() else {
            return Ok(None);
        };
        if entries.is_empty() {
            return Err(RuntimeError::invalid_argument("matchmaker result has no entries"));
        }

        let ctx = self.context(ExecutionMode::Matchmaker);
        let logger = Logger::new("matchmaker").with_field("entries", entries.len().to_string());
        let returned = hook.call(ctx, logger, self.nk()?, entries).await?;

        match returned.filter(|id| !id.is_empty()) {
            None => Ok(None),
            Some(raw) => {
                let match_id: MatchId = raw.parse()?;
                if self.matches.get(&match_id).is_none() {
                    return Err(RuntimeError::not_found(format!(
                        "matchmaker hook returned unknown match {match_id}"
                    )));
                }
                info!("🤝 Matchmaker group placed in match {}", match_id);
                Ok(Some(match_id))
            }
        }
    }

    /// Drops a session from every match and stream it is in.
    pub fn disconnect(&self, presence: &Presence) {
        let matches = self.matches.disconnect(presence);
        let streams = self.streams.leave_all(&presence.session_id);
        debug!(
            "Session {} disconnected from {} matches and {} streams",
            presence.session_id, matches, streams
        );
    }

    /// Terminates every running match and waits for teardown.
    pub async fn shutdown(&self, grace_seconds: u64) {
        info!("🛑 Runtime host shutting down");
        self.matches.shutdown(grace_seconds).await;
    }

    /// [`shutdown`](Self::shutdown) with the configured `default_grace_seconds`.
    pub async fn shutdown_default(&self) {
        self.shutdown(self.config.default_grace_seconds).await;
    }
}

#[async_trait]
impl ServerApi for RuntimeHost {
    async fn match_create(&self, module: &str, params: MatchParams) -> Result<MatchId, RuntimeError> {
        let factory = self
            .hooks()
            .match_handler(module)
            .ok_or_else(|| HostError::ModuleNotFound(module.to_string()))?;
        let match_id = self
            .matches
            .create(
                module,
                factory,
                self.context(ExecutionMode::MatchCreate),
                self.nk()?,
                params,
            )
            .await?;
        Ok(match_id)
    }

    async fn match_get(&self, match_id: &MatchId) -> Result<Option<MatchInfo>, RuntimeError> {
        Ok(self.matches.get(match_id))
    }

    async fn match_list(&self, filter: MatchListFilter) -> Result<Vec<MatchInfo>, RuntimeError> {
        Ok(self.matches.list(&filter))
    }

    async fn match_signal(&self, match_id: &MatchId, data: String) -> Result<Option<String>, RuntimeError> {
        Ok(self.matches.signal(match_id, data).await?)
    }

    fn stream_user_list(
        &self,
        stream: &Stream,
        include_hidden: bool,
        include_not_hidden: bool,
    ) -> Result<Vec<Presence>, RuntimeError> {
        Ok(self.streams.list(stream, include_hidden, include_not_hidden))
    }

    fn stream_user_get(
        &self,
        stream: &Stream,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Presence>, RuntimeError> {
        Ok(self.streams.get(stream, user_id, session_id))
    }

    fn stream_user_join(&self, stream: &Stream, presence: Presence) -> Result<bool, RuntimeError> {
        Ok(self.streams.join(stream, presence))
    }

    fn stream_user_update(&self, stream: &Stream, presence: Presence) -> Result<(), RuntimeError> {
        self.streams.update(stream, presence)
    }

    fn stream_user_leave(&self, stream: &Stream, user_id: &str, session_id: &str) -> Result<(), RuntimeError> {
        self.streams.leave(stream, user_id, session_id);
        Ok(())
    }

    fn stream_count(&self, stream: &Stream) -> Result<usize, RuntimeError> {
        Ok(self.streams.count(stream))
    }

    fn stream_close(&self, stream: &Stream) -> Result<(), RuntimeError> {
        self.streams.close(stream);
        Ok(())
    }

    fn stream_send(
        &self,
        stream: &Stream,
        data: &str,
        presences: Option<&[Presence]>,
        reliable: bool,
    ) -> Result<(), RuntimeError> {
        self.streams.send(stream, data, presences, reliable);
        Ok(())
    }
}
