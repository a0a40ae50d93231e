//! Outbound delivery of envelopes to client sessions.
//!
//! The host never talks to a transport directly. Everything addressed to a
//! client goes through an [`OutboundSink`]; a transport (or a test) owns the
//! other end.

use dashmap::DashMap;
use runtime_api::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Destination for envelopes sent by matches and streams.
pub trait OutboundSink: Send + Sync {
    /// Queues an envelope for a session.
    ///
    /// Returns `false` if the session is unknown or gone. Delivery failures
    /// are never fatal to the caller.
    fn deliver(&self, session_id: &str, envelope: Envelope) -> bool;
}

/// [`OutboundSink`] backed by one unbounded channel per session.
///
/// # Examples
///
/// ```rust
/// use match_host::{ChannelSink, OutboundSink};
/// use runtime_api::Envelope;
///
/// let sink = ChannelSink::new();
/// let mut rx = sink.register_session("session-1");
/// assert!(sink.deliver("session-1", Envelope::Pong {}));
/// assert_eq!(rx.try_recv().unwrap(), Envelope::Pong {});
/// ```
#[derive(Debug, Default)]
pub struct ChannelSink {
    sessions: DashMap<String, mpsc::UnboundedSender<Envelope>>,
}

impl ChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a channel for a session, replacing any previous one.
    pub fn register_session(&self, session_id: impl Into<String>) -> mpsc::UnboundedReceiver<Envelope> {
        let session_id = session_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        info!("🔌 Session {} registered for outbound delivery", session_id);
        self.sessions.insert(session_id, tx);
        rx
    }

    pub fn unregister_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            info!("🔌 Session {} unregistered", session_id);
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl OutboundSink for ChannelSink {
    fn deliver(&self, session_id: &str, envelope: Envelope) -> bool {
        let Some(sender) = self.sessions.get(session_id) else {
            debug!("No outbound channel for session {}", session_id);
            return false;
        };
        if sender.send(envelope).is_err() {
            drop(sender);
            self.sessions.remove(session_id);
            debug!("Outbound channel for session {} closed", session_id);
            return false;
        }
        true
    }
}
