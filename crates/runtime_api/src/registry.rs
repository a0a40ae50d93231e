//! Startup registration and the frozen registry used at dispatch time.
//!
//! Plugins register everything through an [`Initializer`] while their
//! module's `init` runs. The host then calls [`Initializer::build`] and
//! shares the resulting [`HookRegistry`] behind an `Arc`; nothing can be
//! added or replaced after that point, so dispatch never takes a lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::envelope::RtHookMessage;
use crate::error::RuntimeError;
use crate::hooks::{MatchmakerMatchedHook, RpcFunction, RtAfterHook, RtBeforeHook};
use crate::match_handler::{MatchHandler, MatchHandlerFactory, TypedMatchFactory};

/// Collects registrations during module initialisation.
///
/// Every key can be registered once: one function per RPC id, one before
/// and one after hook per realtime message kind, one handler per match
/// module name and a single matchmaker matched hook. A second registration
/// fails with `ALREADY_EXISTS` and leaves the first one in place.
///
/// RPC ids are case-insensitive and stored lowercased.
#[derive(Default)]
pub struct Initializer {
    rpcs: HashMap<String, Arc<dyn RpcFunction>>,
    rt_before: HashMap<RtHookMessage, Arc<dyn RtBeforeHook>>,
    rt_after: HashMap<RtHookMessage, Arc<dyn RtAfterHook>>,
    matches: HashMap<String, Arc<dyn MatchHandlerFactory>>,
    matchmaker_matched: Option<Arc<dyn MatchmakerMatchedHook>>,
}

impl Initializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client-callable RPC function.
    ///
    /// # Arguments
    ///
    /// * `id` - Non-empty identifier clients call the function by
    /// * `function` - Async function or closure implementing [`RpcFunction`]
    ///
    /// # Returns
    ///
    /// `INVALID_ARGUMENT` for an empty id, `ALREADY_EXISTS` if the id is taken.
    pub fn register_rpc(
        &mut self,
        id: &str,
        function: impl RpcFunction + 'static,
    ) -> Result<(), RuntimeError> {
        let key = normalize_rpc_id(id)?;
        if self.rpcs.contains_key(&key) {
            return Err(RuntimeError::already_exists(format!(
                "rpc function already registered: {key}"
            )));
        }
        self.rpcs.insert(key, Arc::new(function));
        Ok(())
    }

    /// Registers the before hook for one realtime message kind.
    pub fn register_rt_before(
        &mut self,
        kind: RtHookMessage,
        hook: impl RtBeforeHook + 'static,
    ) -> Result<(), RuntimeError> {
        if self.rt_before.contains_key(&kind) {
            return Err(RuntimeError::already_exists(format!(
                "before hook already registered for {kind}"
            )));
        }
        self.rt_before.insert(kind, Arc::new(hook));
        Ok(())
    }

    /// Registers the after hook for one realtime message kind.
    pub fn register_rt_after(
        &mut self,
        kind: RtHookMessage,
        hook: impl RtAfterHook + 'static,
    ) -> Result<(), RuntimeError> {
        if self.rt_after.contains_key(&kind) {
            return Err(RuntimeError::already_exists(format!(
                "after hook already registered for {kind}"
            )));
        }
        self.rt_after.insert(kind, Arc::new(hook));
        Ok(())
    }

    /// Registers an authoritative match handler under a module name.
    pub fn register_match<H: MatchHandler>(&mut self, name: &str, handler: H) -> Result<(), RuntimeError> {
        if name.trim().is_empty() {
            return Err(RuntimeError::invalid_argument("match module name must not be empty"));
        }
        if self.matches.contains_key(name) {
            return Err(RuntimeError::already_exists(format!(
                "match handler already registered: {name}"
            )));
        }
        self.matches
            .insert(name.to_string(), Arc::new(TypedMatchFactory::new(handler)));
        Ok(())
    }

    /// Registers the matchmaker matched hook.
    pub fn register_matchmaker_matched(
        &mut self,
        hook: impl MatchmakerMatchedHook + 'static,
    ) -> Result<(), RuntimeError> {
        if self.matchmaker_matched.is_some() {
            return Err(RuntimeError::already_exists(
                "matchmaker matched hook already registered",
            ));
        }
        self.matchmaker_matched = Some(Arc::new(hook));
        Ok(())
    }

    /// Freezes the registrations.
    pub fn build(self) -> HookRegistry {
        HookRegistry {
            rpcs: self.rpcs,
            rt_before: self.rt_before,
            rt_after: self.rt_after,
            matches: self.matches,
            matchmaker_matched: self.matchmaker_matched,
        }
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initializer")
            .field("rpcs", &self.rpcs.len())
            .field("rt_before", &self.rt_before.len())
            .field("rt_after", &self.rt_after.len())
            .field("matches", &self.matches.len())
            .field("matchmaker_matched", &self.matchmaker_matched.is_some())
            .finish()
    }
}

fn normalize_rpc_id(id: &str) -> Result<String, RuntimeError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(RuntimeError::invalid_argument("rpc id must not be empty"));
    }
    Ok(id.to_lowercase())
}

/// Immutable set of registrations consulted by the host.
#[derive(Default, Clone)]
pub struct HookRegistry {
    rpcs: HashMap<String, Arc<dyn RpcFunction>>,
    rt_before: HashMap<RtHookMessage, Arc<dyn RtBeforeHook>>,
    rt_after: HashMap<RtHookMessage, Arc<dyn RtAfterHook>>,
    matches: HashMap<String, Arc<dyn MatchHandlerFactory>>,
    matchmaker_matched: Option<Arc<dyn MatchmakerMatchedHook>>,
}

impl HookRegistry {
    pub fn rpc(&self, id: &str) -> Option<Arc<dyn RpcFunction>> {
        self.rpcs.get(&id.trim().to_lowercase()).cloned()
    }

    pub fn rt_before(&self, kind: RtHookMessage) -> Option<Arc<dyn RtBeforeHook>> {
        self.rt_before.get(&kind).cloned()
    }

    pub fn rt_after(&self, kind: RtHookMessage) -> Option<Arc<dyn RtAfterHook>> {
        self.rt_after.get(&kind).cloned()
    }

    pub fn match_handler(&self, module: &str) -> Option<Arc<dyn MatchHandlerFactory>> {
        self.matches.get(module).cloned()
    }

    pub fn matchmaker_matched(&self) -> Option<Arc<dyn MatchmakerMatchedHook>> {
        self.matchmaker_matched.clone()
    }

    /// Registered RPC ids, sorted.
    pub fn rpc_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rpcs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Registered match module names, sorted.
    pub fn match_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.matches.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn hook_count(&self) -> usize {
        self.rt_before.len() + self.rt_after.len()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("rpcs", &self.rpc_ids())
            .field("matches", &self.match_modules())
            .field("hooks", &self.hook_count())
            .field("matchmaker_matched", &self.matchmaker_matched.is_some())
            .finish()
    }
}
