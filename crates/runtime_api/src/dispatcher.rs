//! Outbound side of a running match.

use crate::error::RuntimeError;
use crate::presence::Presence;

/// Messaging and control surface handed to match callbacks.
///
/// A dispatcher is bound to one match. Every presence argument is checked
/// against the match's current participants and non-participants are
/// silently ignored, so a handler can never address a session that is not
/// in its match.
///
/// Calls never block on delivery: immediate broadcasts are handed to the
/// host's outbound sink straight away, deferred broadcasts are buffered and
/// flushed once the current callback returns.
pub trait MatchDispatcher: Send + Sync {
    /// Sends data to the given presences, or to every participant when
    /// `presences` is `None`.
    ///
    /// # Arguments
    ///
    /// * `op_code` - Application-defined message kind
    /// * `data` - Raw payload
    /// * `presences` - Recipients, `None` for everyone
    /// * `sender` - Presence reported as the sender, `None` for the match itself
    /// * `reliable` - Delivery hint forwarded to the transport
    fn broadcast_message(
        &self,
        op_code: i64,
        data: &[u8],
        presences: Option<&[Presence]>,
        sender: Option<&Presence>,
        reliable: bool,
    ) -> Result<(), RuntimeError>;

    /// Like [`broadcast_message`](Self::broadcast_message), but delivery
    /// happens after the current callback completes, in call order.
    fn broadcast_message_deferred(
        &self,
        op_code: i64,
        data: &[u8],
        presences: Option<&[Presence]>,
        sender: Option<&Presence>,
        reliable: bool,
    ) -> Result<(), RuntimeError>;

    /// Removes presences from the match.
    ///
    /// Kicked presences are reported to `match_leave` before the next loop.
    fn match_kick(&self, presences: &[Presence]) -> Result<(), RuntimeError>;

    /// Replaces the match label visible to `match_get` and `match_list`.
    fn match_label_update(&self, label: &str) -> Result<(), RuntimeError>;
}
