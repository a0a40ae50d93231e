//! The server API surface available to plugin code.

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::presence::{Presence, Stream};
use crate::types::{MatchId, MatchInfo, MatchListFilter, MatchParams};

/// Host services callable from plugin callbacks.
///
/// Implemented by the host and handed to plugins as `Arc<dyn ServerApi>`
/// (conventionally named `nk`). Match operations are async because they
/// talk to running match tasks; stream operations only touch in-memory
/// tracking and return immediately.
///
/// A match callback must not `match_signal` its own match: the signal is
/// queued behind the callback that is waiting for it.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Creates an authoritative match of a registered module.
    ///
    /// Returns once `match_init` has completed. Fails with `NOT_FOUND` when
    /// no handler is registered under `module`.
    async fn match_create(&self, module: &str, params: MatchParams) -> Result<MatchId, RuntimeError>;

    /// Looks up a running match.
    async fn match_get(&self, match_id: &MatchId) -> Result<Option<MatchInfo>, RuntimeError>;

    /// Lists running matches accepted by `filter`, at most `filter.limit`.
    async fn match_list(&self, filter: MatchListFilter) -> Result<Vec<MatchInfo>, RuntimeError>;

    /// Delivers a signal to a match and waits for its reply.
    async fn match_signal(&self, match_id: &MatchId, data: String) -> Result<Option<String>, RuntimeError>;

    /// Presences on a stream, filtered by visibility.
    fn stream_user_list(
        &self,
        stream: &Stream,
        include_hidden: bool,
        include_not_hidden: bool,
    ) -> Result<Vec<Presence>, RuntimeError>;

    fn stream_user_get(
        &self,
        stream: &Stream,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Presence>, RuntimeError>;

    /// Adds a presence to a stream. Returns `false` if it was already there,
    /// in which case the stored presence is left untouched.
    fn stream_user_join(&self, stream: &Stream, presence: Presence) -> Result<bool, RuntimeError>;

    /// Replaces a presence's metadata. `NOT_FOUND` if it is not on the stream.
    fn stream_user_update(&self, stream: &Stream, presence: Presence) -> Result<(), RuntimeError>;

    fn stream_user_leave(&self, stream: &Stream, user_id: &str, session_id: &str) -> Result<(), RuntimeError>;

    fn stream_count(&self, stream: &Stream) -> Result<usize, RuntimeError>;

    /// Removes every presence from a stream.
    fn stream_close(&self, stream: &Stream) -> Result<(), RuntimeError>;

    /// Sends data to stream members, or to the given subset of them.
    fn stream_send(
        &self,
        stream: &Stream,
        data: &str,
        presences: Option<&[Presence]>,
        reliable: bool,
    ) -> Result<(), RuntimeError>;
}
