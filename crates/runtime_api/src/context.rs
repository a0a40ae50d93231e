//! Execution context handed to every plugin callback.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::MatchId;

/// What kind of host operation triggered the current callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Module initialisation at server startup.
    #[default]
    RunOnce,
    /// An RPC function invocation.
    Rpc,
    /// A before hook.
    Before,
    /// An after hook.
    After,
    /// A match lifecycle callback on a running match.
    Match,
    /// The init callback of a match being created.
    MatchCreate,
    /// The matchmaker matched hook.
    Matchmaker,
}

/// The context of the current execution.
///
/// Fields that only make sense for some execution modes are optional: the
/// user and session fields are set when a client triggered the call, the
/// match fields are set for match lifecycle callbacks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Runtime environment variables configured on the host
    pub env: HashMap<String, String>,
    pub execution_mode: ExecutionMode,
    /// Name of the node executing the callback
    pub node: String,
    pub headers: HashMap<String, Vec<String>>,
    pub query_params: HashMap<String, Vec<String>>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    /// Session variables attached to the caller's session
    pub vars: HashMap<String, String>,
    /// Session expiry as a Unix timestamp in seconds
    pub user_session_exp: Option<i64>,
    pub session_id: Option<String>,
    pub client_ip: Option<String>,
    pub client_port: Option<String>,
    pub match_id: Option<MatchId>,
    pub match_node: Option<String>,
    pub match_label: Option<String>,
    pub match_tick_rate: Option<u32>,
    pub lang: Option<String>,
}

impl Context {
    /// Creates an empty context for the given node and execution mode.
    pub fn new(node: impl Into<String>, execution_mode: ExecutionMode) -> Self {
        Self {
            node: node.into(),
            execution_mode,
            ..Default::default()
        }
    }

    /// Returns a copy with a different execution mode.
    pub fn with_mode(&self, execution_mode: ExecutionMode) -> Self {
        Self {
            execution_mode,
            ..self.clone()
        }
    }

    /// Returns a copy attributed to the given user.
    pub fn with_user(mut self, user_id: impl Into<String>, username: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.username = Some(username.into());
        self
    }

    /// Returns a copy attributed to the given session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Returns a copy for a match lifecycle callback.
    ///
    /// The user and session fields are cleared: match callbacks are driven
    /// by the host, not by any single client.
    pub fn for_match(&self, match_id: &MatchId, label: &str, tick_rate: u32) -> Self {
        Self {
            env: self.env.clone(),
            execution_mode: ExecutionMode::Match,
            node: self.node.clone(),
            match_id: Some(match_id.clone()),
            match_node: Some(match_id.node.clone()),
            match_label: Some(label.to_string()),
            match_tick_rate: Some(tick_rate),
            ..Default::default()
        }
    }

    /// Whether a client session is attached to this context.
    pub fn has_session(&self) -> bool {
        self.session_id.is_some()
    }
}
