//! Stream presence tracking.

use dashmap::DashMap;
use runtime_api::{Envelope, Presence, PresenceReason, RuntimeError, Stream, StreamData};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::sink::OutboundSink;

type PresenceKey = (String, String);

/// In-memory membership of every stream on this node.
///
/// Streams exist implicitly: joining creates one, and the last leave (or a
/// close) removes it.
pub struct StreamTracker {
    streams: DashMap<Stream, HashMap<PresenceKey, Presence>>,
    sink: Arc<dyn OutboundSink>,
}

impl StreamTracker {
    pub fn new(sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            streams: DashMap::new(),
            sink,
        }
    }

    /// Adds a presence. Returns `false` if it was already a member.
    pub fn join(&self, stream: &Stream, presence: Presence) -> bool {
        let mut members = self.streams.entry(stream.clone()).or_default();
        let key = presence.key();
        if members.contains_key(&key) {
            return false;
        }
        members.insert(key, presence.with_reason(PresenceReason::Join));
        true
    }

    /// Replaces the stored presence for an existing member.
    pub fn update(&self, stream: &Stream, presence: Presence) -> Result<(), RuntimeError> {
        let mut members = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| RuntimeError::not_found("stream has no members"))?;
        let slot = members
            .get_mut(&presence.key())
            .ok_or_else(|| RuntimeError::not_found("presence is not on the stream"))?;
        *slot = presence.with_reason(PresenceReason::Update);
        Ok(())
    }

    /// Removes a presence. Returns whether it was a member.
    pub fn leave(&self, stream: &Stream, user_id: &str, session_id: &str) -> bool {
        let key = (user_id.to_string(), session_id.to_string());
        let removed = match self.streams.get_mut(stream) {
            Some(mut members) => members.remove(&key).is_some(),
            None => false,
        };
        self.streams.remove_if(stream, |_, members| members.is_empty());
        removed
    }

    /// Removes a session from every stream it is on.
    pub fn leave_all(&self, session_id: &str) -> usize {
        let mut removed = 0;
        for mut entry in self.streams.iter_mut() {
            let before = entry.len();
            entry.retain(|(_, session), _| session != session_id);
            removed += before - entry.len();
        }
        self.streams.retain(|_, members| !members.is_empty());
        removed
    }

    pub fn list(&self, stream: &Stream, include_hidden: bool, include_not_hidden: bool) -> Vec<Presence> {
        let Some(members) = self.streams.get(stream) else {
            return Vec::new();
        };
        members
            .values()
            .filter(|p| if p.hidden { include_hidden } else { include_not_hidden })
            .cloned()
            .collect()
    }

    pub fn get(&self, stream: &Stream, user_id: &str, session_id: &str) -> Option<Presence> {
        let key = (user_id.to_string(), session_id.to_string());
        self.streams.get(stream)?.get(&key).cloned()
    }

    pub fn count(&self, stream: &Stream) -> usize {
        self.streams.get(stream).map(|m| m.len()).unwrap_or(0)
    }

    /// Removes every member. Returns how many were removed.
    pub fn close(&self, stream: &Stream) -> usize {
        self.streams
            .remove(stream)
            .map(|(_, members)| members.len())
            .unwrap_or(0)
    }

    /// Sends `StreamData` to members, or to the members among `presences`.
    ///
    /// Returns how many sessions it was delivered to.
    pub fn send(&self, stream: &Stream, data: &str, presences: Option<&[Presence]>, reliable: bool) -> usize {
        let targets: Vec<String> = match self.streams.get(stream) {
            Some(members) => match presences {
                Some(subset) => subset
                    .iter()
                    .filter(|p| members.contains_key(&p.key()))
                    .map(|p| p.session_id.clone())
                    .collect(),
                None => members.values().map(|p| p.session_id.clone()).collect(),
            },
            None => return 0,
        };

        let envelope = Envelope::StreamData(StreamData {
            stream: stream.clone(),
            sender: None,
            data: data.to_string(),
            reliable,
        });
        let delivered = targets
            .iter()
            .filter(|session| self.sink.deliver(session, envelope.clone()))
            .count();
        debug!("Stream data delivered to {}/{} sessions", delivered, targets.len());
        delivered
    }

    /// Number of streams with at least one member.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    fn tracker() -> (StreamTracker, Arc<ChannelSink>) {
        let sink = Arc::new(ChannelSink::new());
        (StreamTracker::new(sink.clone()), sink)
    }

    #[test]
    fn test_join_is_idempotent() {
        let (streams, _) = tracker();
        let stream = Stream::new(2, "room");
        let alice = Presence::new("u1", "s1", "alice", "n");

        assert!(streams.join(&stream, alice.clone()));
        assert!(!streams.join(&stream, alice));
        assert_eq!(streams.count(&stream), 1);
    }

    #[test]
    fn test_visibility_filters() {
        let (streams, _) = tracker();
        let stream = Stream::new(2, "room");
        let visible = Presence::new("u1", "s1", "alice", "n");
        let mut hidden = Presence::new("u2", "s2", "bob", "n");
        hidden.hidden = true;
        streams.join(&stream, visible);
        streams.join(&stream, hidden);

        assert_eq!(streams.list(&stream, true, true).len(), 2);
        assert_eq!(streams.list(&stream, false, true)[0].username, "alice");
        assert_eq!(streams.list(&stream, true, false)[0].username, "bob");
        assert!(streams.list(&stream, false, false).is_empty());
    }

    #[test]
    fn test_update_requires_membership() {
        let (streams, _) = tracker();
        let stream = Stream::new(2, "room");
        let mut alice = Presence::new("u1", "s1", "alice", "n");
        assert!(streams.update(&stream, alice.clone()).is_err());

        streams.join(&stream, alice.clone());
        alice.status = Some("away".to_string());
        streams.update(&stream, alice).unwrap();
        let stored = streams.get(&stream, "u1", "s1").unwrap();
        assert_eq!(stored.status.as_deref(), Some("away"));
        assert_eq!(stored.reason, PresenceReason::Update);
    }

    #[test]
    fn test_last_leave_removes_stream() {
        let (streams, _) = tracker();
        let stream = Stream::new(2, "room");
        streams.join(&stream, Presence::new("u1", "s1", "alice", "n"));

        assert!(streams.leave(&stream, "u1", "s1"));
        assert!(!streams.leave(&stream, "u1", "s1"));
        assert_eq!(streams.stream_count(), 0);
    }

    #[test]
    fn test_send_only_reaches_members() {
        let (streams, sink) = tracker();
        let stream = Stream::new(2, "room");
        let mut alice_rx = sink.register_session("s1");
        let mut outsider_rx = sink.register_session("s9");
        streams.join(&stream, Presence::new("u1", "s1", "alice", "n"));

        let outsider = Presence::new("u9", "s9", "eve", "n");
        let alice = Presence::new("u1", "s1", "alice", "n");
        assert_eq!(streams.send(&stream, "hi", Some(&[outsider, alice]), true), 1);

        match alice_rx.try_recv().unwrap() {
            Envelope::StreamData(data) => assert_eq!(data.data, "hi"),
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert!(outsider_rx.try_recv().is_err());
    }

    #[test]
    fn test_leave_all_and_close() {
        let (streams, _) = tracker();
        let a = Stream::new(2, "a");
        let b = Stream::new(2, "b");
        streams.join(&a, Presence::new("u1", "s1", "alice", "n"));
        streams.join(&b, Presence::new("u1", "s1", "alice", "n"));
        streams.join(&b, Presence::new("u2", "s2", "bob", "n"));

        assert_eq!(streams.leave_all("s1"), 2);
        assert_eq!(streams.stream_count(), 1);
        assert_eq!(streams.close(&b), 1);
        assert_eq!(streams.stream_count(), 0);
    }
}
