//! Host-side [`MatchDispatcher`] bound to one running match.

use parking_lot::Mutex;
use runtime_api::{Envelope, MatchData, MatchDispatcher, MatchId, Presence, RuntimeError};
use std::sync::Arc;
use tracing::debug;

use crate::actor::MatchShared;
use crate::sink::OutboundSink;

/// Dispatcher handed to a match's callbacks.
///
/// Recipients are resolved against the shared presence list at call time.
/// Kicks remove presences immediately and are reported to the actor, which
/// runs `match_leave` for them before the next loop.
pub(crate) struct HostDispatcher {
    match_id: MatchId,
    shared: Arc<MatchShared>,
    sink: Arc<dyn OutboundSink>,
    label_max_bytes: usize,
    deferred: Mutex<Vec<(String, Envelope)>>,
    kicked: Mutex<Vec<Presence>>,
}

impl HostDispatcher {
    pub(crate) fn new(
        match_id: MatchId,
        shared: Arc<MatchShared>,
        sink: Arc<dyn OutboundSink>,
        label_max_bytes: usize,
    ) -> Self {
        Self {
            match_id,
            shared,
            sink,
            label_max_bytes,
            deferred: Mutex::new(Vec::new()),
            kicked: Mutex::new(Vec::new()),
        }
    }

    /// Delivers deferred broadcasts in the order they were queued.
    pub(crate) fn flush_deferred(&self) -> usize {
        let queued = std::mem::take(&mut *self.deferred.lock());
        let count = queued.len();
        for (session_id, envelope) in queued {
            self.sink.deliver(&session_id, envelope);
        }
        count
    }

    /// Drops deferred broadcasts without sending them.
    pub(crate) fn discard_deferred(&self) {
        self.deferred.lock().clear();
    }

    /// Presences kicked since the last call.
    pub(crate) fn take_kicked(&self) -> Vec<Presence> {
        std::mem::take(&mut *self.kicked.lock())
    }

    fn envelopes(
        &self,
        op_code: i64,
        data: &[u8],
        presences: Option<&[Presence]>,
        sender: Option<&Presence>,
        reliable: bool,
    ) -> Vec<(String, Envelope)> {
        let targets = self.shared.resolve_targets(presences);
        let envelope = Envelope::MatchData(MatchData {
            match_id: self.match_id.clone(),
            presence: sender.cloned(),
            op_code,
            data: data.to_vec(),
            reliable,
        });
        targets
            .into_iter()
            .map(|session_id| (session_id, envelope.clone()))
            .collect()
    }
}

impl MatchDispatcher for HostDispatcher {
    fn broadcast_message(
        &self,
        op_code: i64,
        data: &[u8],
        presences: Option<&[Presence]>,
        sender: Option<&Presence>,
        reliable: bool,
    ) -> Result<(), RuntimeError> {
        for (session_id, envelope) in self.envelopes(op_code, data, presences, sender, reliable) {
            if !self.sink.deliver(&session_id, envelope) {
                debug!("Match {} could not deliver to session {}", self.match_id, session_id);
            }
        }
        Ok(())
    }

    fn broadcast_message_deferred(
        &self,
        op_code: i64,
        data: &[u8],
        presences: Option<&[Presence]>,
        sender: Option<&Presence>,
        reliable: bool,
    ) -> Result<(), RuntimeError> {
        let queued = self.envelopes(op_code, data, presences, sender, reliable);
        self.deferred.lock().extend(queued);
        Ok(())
    }

    fn match_kick(&self, presences: &[Presence]) -> Result<(), RuntimeError> {
        let removed = self.shared.remove_presences(presences);
        self.kicked.lock().extend(removed);
        Ok(())
    }

    fn match_label_update(&self, label: &str) -> Result<(), RuntimeError> {
        if label.len() > self.label_max_bytes {
            return Err(RuntimeError::invalid_argument(format!(
                "match label is {} bytes, limit is {}",
                label.len(),
                self.label_max_bytes
            )));
        }
        self.shared.set_label(label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    fn setup() -> (HostDispatcher, Arc<MatchShared>, Arc<ChannelSink>) {
        let match_id = MatchId::new("n");
        let shared = Arc::new(MatchShared::new(match_id.clone(), "lobby", 10, "open"));
        let sink = Arc::new(ChannelSink::new());
        let dispatcher = HostDispatcher::new(match_id, shared.clone(), sink.clone(), 16);
        (dispatcher, shared, sink)
    }

    #[test]
    fn test_broadcast_skips_non_participants() {
        let (dispatcher, shared, sink) = setup();
        let mut alice_rx = sink.register_session("s1");
        let mut eve_rx = sink.register_session("s9");
        let alice = Presence::new("u1", "s1", "alice", "n");
        let eve = Presence::new("u9", "s9", "eve", "n");
        shared.add_presence(alice.clone());

        dispatcher
            .broadcast_message(5, b"x", Some(&[alice, eve]), None, true)
            .unwrap();

        match alice_rx.try_recv().unwrap() {
            Envelope::MatchData(data) => {
                assert_eq!(data.op_code, 5);
                assert_eq!(data.data, b"x".to_vec());
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert!(eve_rx.try_recv().is_err());
    }

    #[test]
    fn test_deferred_waits_for_flush() {
        let (dispatcher, shared, sink) = setup();
        let mut rx = sink.register_session("s1");
        shared.add_presence(Presence::new("u1", "s1", "alice", "n"));

        dispatcher
            .broadcast_message_deferred(1, b"a", None, None, true)
            .unwrap();
        dispatcher
            .broadcast_message_deferred(2, b"b", None, None, true)
            .unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(dispatcher.flush_deferred(), 2);
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(matches!(first, Envelope::MatchData(ref d) if d.op_code == 1));
        assert!(matches!(second, Envelope::MatchData(ref d) if d.op_code == 2));
    }

    #[test]
    fn test_kick_removes_presence_and_queues_leave() {
        let (dispatcher, shared, _) = setup();
        let alice = Presence::new("u1", "s1", "alice", "n");
        let eve = Presence::new("u9", "s9", "eve", "n");
        shared.add_presence(alice.clone());

        dispatcher.match_kick(&[alice.clone(), eve]).unwrap();

        assert_eq!(shared.size(), 0);
        let kicked = dispatcher.take_kicked();
        assert_eq!(kicked.len(), 1);
        assert!(kicked[0].same_participant(&alice));
        assert!(dispatcher.take_kicked().is_empty());
    }

    #[test]
    fn test_label_update_respects_limit() {
        let (dispatcher, shared, _) = setup();
        dispatcher.match_label_update("closed").unwrap();
        assert_eq!(shared.info().label, "closed");

        let err = dispatcher
            .match_label_update("this label is far too long")
            .unwrap_err();
        assert_eq!(err.code(), runtime_api::Code::InvalidArgument);
        assert_eq!(shared.info().label, "closed");
    }
}
