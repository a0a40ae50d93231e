//! Presences and streams.
//!
//! A [`Presence`] is one connected participant's membership in a match or
//! stream at a point in time. Its [`PresenceReason`] is informational
//! metadata attached when the presence is reported as part of a transition;
//! it is not a state of the match machine.

use serde::{Deserialize, Serialize};

/// Why a presence is being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresenceReason {
    #[default]
    Unknown,
    Join,
    Update,
    Leave,
    Disconnect,
}

impl PresenceReason {
    /// Numeric value used on the wire by clients.
    pub fn as_u8(self) -> u8 {
        match self {
            PresenceReason::Unknown => 0,
            PresenceReason::Join => 1,
            PresenceReason::Update => 2,
            PresenceReason::Leave => 3,
            PresenceReason::Disconnect => 4,
        }
    }
}

/// A participant's membership record.
///
/// Two presences refer to the same participant when their user and session
/// identifiers are equal; see [`Presence::same_participant`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    pub session_id: String,
    pub username: String,
    /// Node the session is connected to
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub persistence: bool,
    #[serde(default)]
    pub reason: PresenceReason,
}

impl Presence {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        username: impl Into<String>,
        node: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            username: username.into(),
            node: node.into(),
            status: None,
            hidden: false,
            persistence: false,
            reason: PresenceReason::Unknown,
        }
    }

    /// Returns a copy tagged with the given reason.
    pub fn with_reason(&self, reason: PresenceReason) -> Self {
        Self {
            reason,
            ..self.clone()
        }
    }

    /// Identity key of the participant.
    pub fn key(&self) -> (String, String) {
        (self.user_id.clone(), self.session_id.clone())
    }

    pub fn same_participant(&self, other: &Presence) -> bool {
        self.user_id == other.user_id && self.session_id == other.session_id
    }
}

/// Stream identifier.
///
/// Streams are addressed by the full tuple; an empty field is a valid
/// component of the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stream {
    pub mode: u8,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub subcontext: String,
    #[serde(default)]
    pub label: String,
}

impl Stream {
    pub fn new(mode: u8, subject: impl Into<String>) -> Self {
        Self {
            mode,
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
