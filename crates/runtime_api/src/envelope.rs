//! Realtime protocol messages.
//!
//! An [`Envelope`] is a tagged union: exactly one variant is populated per
//! message. On the wire it is serialised as a JSON object with a single
//! camelCase key naming the variant, e.g. `{"matchJoin": {...}}`, so the
//! zero-field and multi-field states of an object-with-optional-fields
//! encoding cannot be represented.
//!
//! The first sixteen variants are inbound (client to host) and can be
//! intercepted by before/after hooks; see [`RtHookMessage`]. The remaining
//! variants are produced by the host.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::RuntimeError;
use crate::presence::{Presence, Stream};
use crate::types::{JoinMetadata, MatchId, MatchInfo};

/// Chat channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    #[default]
    Room,
    DirectMessage,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelJoin {
    pub target: String,
    #[serde(rename = "type", default)]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub persistence: bool,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelLeave {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessageSend {
    pub channel_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessageUpdate {
    pub channel_id: String,
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessageRemove {
    pub channel_id: String,
    pub message_id: String,
}

/// Request to create a match. The host picks the handler module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MatchCreate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Client data sent to a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDataSend {
    pub match_id: MatchId,
    pub op_code: i64,
    #[serde(
        default,
        with = "crate::bytes_b64::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Vec<u8>>,
    /// Participants the client would like to address. Authoritative
    /// matches ignore it: the match loop decides who receives what.
    #[serde(default)]
    pub presences: Vec<Presence>,
    #[serde(default = "default_reliable")]
    pub reliable: bool,
}

fn default_reliable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchJoin {
    pub match_id: MatchId,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl MatchJoin {
    /// Metadata in the shape handed to join-attempt callbacks.
    pub fn join_metadata(&self) -> JoinMetadata {
        self.metadata
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchLeave {
    pub match_id: MatchId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakerAdd {
    pub min_count: u32,
    pub max_count: u32,
    pub query: String,
    #[serde(default)]
    pub string_properties: HashMap<String, String>,
    #[serde(default)]
    pub numeric_properties: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_multiple: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakerRemove {
    pub ticket: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusFollow {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusUnfollow {
    #[serde(default)]
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A joined chat channel, sent in reply to [`ChannelJoin`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub presences: Vec<Presence>,
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_presence: Option<Presence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id_one: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id_two: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessageAck {
    pub channel_id: String,
    pub message_id: String,
    pub code: i32,
    pub username: String,
    pub create_time: i64,
    pub update_time: i64,
    pub persistent: bool,
}

/// A match the client created or joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub match_id: MatchId,
    pub authoritative: bool,
    pub label: String,
    pub size: usize,
    #[serde(default)]
    pub presences: Vec<Presence>,
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_presence: Option<Presence>,
}

impl MatchSummary {
    pub fn from_info(info: &MatchInfo, self_presence: Option<Presence>) -> Self {
        Self {
            match_id: info.match_id.clone(),
            authoritative: info.authoritative,
            label: info.label.clone(),
            size: info.size,
            presences: Vec::new(),
            self_presence,
        }
    }
}

/// Data broadcast by a match to its participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchData {
    pub match_id: MatchId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Presence>,
    pub op_code: i64,
    #[serde(with = "crate::bytes_b64")]
    pub data: Vec<u8>,
    pub reliable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPresenceEvent {
    pub match_id: MatchId,
    #[serde(default)]
    pub joins: Vec<Presence>,
    #[serde(default)]
    pub leaves: Vec<Presence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamData {
    pub stream: Stream,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Presence>,
    pub data: String,
    pub reliable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: u32,
    pub message: String,
}

impl From<&RuntimeError> for ErrorMessage {
    fn from(err: &RuntimeError) -> Self {
        Self {
            code: err.code().as_u32(),
            message: err.message().to_string(),
        }
    }
}

/// A realtime protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Envelope {
    ChannelJoin(ChannelJoin),
    ChannelLeave(ChannelLeave),
    ChannelMessageSend(ChannelMessageSend),
    ChannelMessageUpdate(ChannelMessageUpdate),
    ChannelMessageRemove(ChannelMessageRemove),
    MatchCreate(MatchCreate),
    MatchDataSend(MatchDataSend),
    MatchJoin(MatchJoin),
    MatchLeave(MatchLeave),
    MatchmakerAdd(MatchmakerAdd),
    MatchmakerRemove(MatchmakerRemove),
    StatusFollow(StatusFollow),
    StatusUnfollow(StatusUnfollow),
    StatusUpdate(StatusUpdate),
    Ping {},
    Pong {},

    Channel(Channel),
    ChannelMessageAck(ChannelMessageAck),
    Match(MatchSummary),
    MatchData(MatchData),
    MatchPresenceEvent(MatchPresenceEvent),
    StreamData(StreamData),
    Error(ErrorMessage),
}

impl Envelope {
    /// The hook kind for inbound envelopes, `None` for host-produced ones.
    pub fn hook_kind(&self) -> Option<RtHookMessage> {
        let kind = match self {
            Envelope::ChannelJoin(_) => RtHookMessage::ChannelJoin,
            Envelope::ChannelLeave(_) => RtHookMessage::ChannelLeave,
            Envelope::ChannelMessageSend(_) => RtHookMessage::ChannelMessageSend,
            Envelope::ChannelMessageUpdate(_) => RtHookMessage::ChannelMessageUpdate,
            Envelope::ChannelMessageRemove(_) => RtHookMessage::ChannelMessageRemove,
            Envelope::MatchCreate(_) => RtHookMessage::MatchCreate,
            Envelope::MatchDataSend(_) => RtHookMessage::MatchDataSend,
            Envelope::MatchJoin(_) => RtHookMessage::MatchJoin,
            Envelope::MatchLeave(_) => RtHookMessage::MatchLeave,
            Envelope::MatchmakerAdd(_) => RtHookMessage::MatchmakerAdd,
            Envelope::MatchmakerRemove(_) => RtHookMessage::MatchmakerRemove,
            Envelope::StatusFollow(_) => RtHookMessage::StatusFollow,
            Envelope::StatusUnfollow(_) => RtHookMessage::StatusUnfollow,
            Envelope::StatusUpdate(_) => RtHookMessage::StatusUpdate,
            Envelope::Ping {} => RtHookMessage::Ping,
            Envelope::Pong {} => RtHookMessage::Pong,
            Envelope::Channel(_)
            | Envelope::ChannelMessageAck(_)
            | Envelope::Match(_)
            | Envelope::MatchData(_)
            | Envelope::MatchPresenceEvent(_)
            | Envelope::StreamData(_)
            | Envelope::Error(_) => return None,
        };
        Some(kind)
    }

    /// Builds an error envelope for the given failure.
    pub fn error(err: &RuntimeError) -> Self {
        Envelope::Error(ErrorMessage::from(err))
    }

    /// Parses an envelope from its JSON wire form.
    pub fn from_json(data: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn to_json(&self) -> Result<String, RuntimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Realtime message kinds that accept before/after hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RtHookMessage {
    ChannelJoin,
    ChannelLeave,
    ChannelMessageSend,
    ChannelMessageUpdate,
    ChannelMessageRemove,
    MatchCreate,
    MatchDataSend,
    MatchJoin,
    MatchLeave,
    MatchmakerAdd,
    MatchmakerRemove,
    StatusFollow,
    StatusUnfollow,
    StatusUpdate,
    Ping,
    Pong,
}

impl RtHookMessage {
    pub const ALL: [RtHookMessage; 16] = [
        RtHookMessage::ChannelJoin,
        RtHookMessage::ChannelLeave,
        RtHookMessage::ChannelMessageSend,
        RtHookMessage::ChannelMessageUpdate,
        RtHookMessage::ChannelMessageRemove,
        RtHookMessage::MatchCreate,
        RtHookMessage::MatchDataSend,
        RtHookMessage::MatchJoin,
        RtHookMessage::MatchLeave,
        RtHookMessage::MatchmakerAdd,
        RtHookMessage::MatchmakerRemove,
        RtHookMessage::StatusFollow,
        RtHookMessage::StatusUnfollow,
        RtHookMessage::StatusUpdate,
        RtHookMessage::Ping,
        RtHookMessage::Pong,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RtHookMessage::ChannelJoin => "ChannelJoin",
            RtHookMessage::ChannelLeave => "ChannelLeave",
            RtHookMessage::ChannelMessageSend => "ChannelMessageSend",
            RtHookMessage::ChannelMessageUpdate => "ChannelMessageUpdate",
            RtHookMessage::ChannelMessageRemove => "ChannelMessageRemove",
            RtHookMessage::MatchCreate => "MatchCreate",
            RtHookMessage::MatchDataSend => "MatchDataSend",
            RtHookMessage::MatchJoin => "MatchJoin",
            RtHookMessage::MatchLeave => "MatchLeave",
            RtHookMessage::MatchmakerAdd => "MatchmakerAdd",
            RtHookMessage::MatchmakerRemove => "MatchmakerRemove",
            RtHookMessage::StatusFollow => "StatusFollow",
            RtHookMessage::StatusUnfollow => "StatusUnfollow",
            RtHookMessage::StatusUpdate => "StatusUpdate",
            RtHookMessage::Ping => "Ping",
            RtHookMessage::Pong => "Pong",
        }
    }
}

impl fmt::Display for RtHookMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RtHookMessage {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RuntimeError::invalid_argument(format!("unknown realtime message: {s}")))
    }
}
