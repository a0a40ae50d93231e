//! Match-related value types exchanged between host and plugin.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::presence::Presence;

/// Parameters supplied when a match is created.
pub type MatchParams = HashMap<String, serde_json::Value>;

/// Metadata attached to a join attempt.
pub type JoinMetadata = HashMap<String, serde_json::Value>;

/// Unique identifier for a running match.
///
/// The textual form is `<uuid>.<node>`, so the owning node can be read from
/// the identifier alone.
///
/// # Examples
///
/// ```rust
/// use runtime_api::MatchId;
///
/// let id = MatchId::new("node-1");
/// let parsed: MatchId = id.to_string().parse()?;
/// assert_eq!(parsed, id);
/// # Ok::<(), runtime_api::RuntimeError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatchId {
    pub id: Uuid,
    pub node: String,
}

impl MatchId {
    /// Creates a new random match ID owned by `node`.
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node: node.into(),
        }
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.node)
    }
}

impl FromStr for MatchId {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, node) = s
            .split_once('.')
            .ok_or_else(|| RuntimeError::invalid_argument(format!("invalid match id: {s}")))?;
        if node.is_empty() {
            return Err(RuntimeError::invalid_argument(format!(
                "match id is missing a node: {s}"
            )));
        }
        let id = Uuid::parse_str(id)
            .map_err(|e| RuntimeError::invalid_argument(format!("invalid match id {s}: {e}")))?;
        Ok(Self {
            id,
            node: node.to_string(),
        })
    }
}

impl TryFrom<String> for MatchId {
    type Error = RuntimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MatchId> for String {
    fn from(value: MatchId) -> Self {
        value.to_string()
    }
}

/// Public information about a running match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInfo {
    pub match_id: MatchId,
    /// Always true for matches driven by a registered handler
    pub authoritative: bool,
    /// Number of presences currently in the match
    pub size: usize,
    pub label: String,
    pub tick_rate: u32,
    /// Name of the handler module running the match
    pub module: String,
}

/// A message received by a match and buffered until the next loop tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchMessage {
    pub sender: Presence,
    pub persistence: bool,
    pub status: String,
    pub op_code: i64,
    #[serde(with = "crate::bytes_b64")]
    pub data: Vec<u8>,
    pub reliable: bool,
    /// Unix timestamp in milliseconds when the host received the message
    pub receive_time_ms: i64,
}

impl MatchMessage {
    /// Creates a reliable message stamped with the current time.
    pub fn new(sender: Presence, op_code: i64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            sender,
            persistence: false,
            status: String::new(),
            op_code,
            data: data.into(),
            reliable: true,
            receive_time_ms: current_timestamp_millis(),
        }
    }
}

/// Result of a match init callback.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchInit<S> {
    pub state: S,
    /// Loop invocations per second
    pub tick_rate: u32,
    pub label: String,
}

/// Result of a join attempt callback.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinAttempt<S> {
    pub state: S,
    pub accept: bool,
    /// Optional reason returned to the client when `accept` is false
    pub reject_message: Option<String>,
}

impl<S> JoinAttempt<S> {
    pub fn accept(state: S) -> Self {
        Self {
            state,
            accept: true,
            reject_message: None,
        }
    }

    pub fn reject(state: S, message: impl Into<String>) -> Self {
        Self {
            state,
            accept: false,
            reject_message: Some(message.into()),
        }
    }
}

/// Result of a signal callback: next state and an optional reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalReply<S> {
    pub state: S,
    pub data: Option<String>,
}

/// One matched user handed to the matchmaker matched hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakerEntry {
    pub presence: Presence,
    pub ticket: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

/// Filters for listing running matches.
///
/// A `None` filter matches every value. `limit` defaults to 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchListFilter {
    pub limit: usize,
    pub authoritative: Option<bool>,
    pub label: Option<String>,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
}

impl Default for MatchListFilter {
    fn default() -> Self {
        Self {
            limit: 1,
            authoritative: None,
            label: None,
            min_size: None,
            max_size: None,
        }
    }
}

impl MatchListFilter {
    pub fn matches(&self, info: &MatchInfo) -> bool {
        if let Some(authoritative) = self.authoritative {
            if info.authoritative != authoritative {
                return false;
            }
        }
        if let Some(label) = &self.label {
            if &info.label != label {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if info.size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if info.size > max {
                return false;
            }
        }
        true
    }
}

/// Returns the current Unix timestamp in milliseconds.
pub fn current_timestamp_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
