//! # Lobby Module
//!
//! A small runtime module showing every registration kind:
//!
//! * **`lobby` match handler** - players gather, chat and get notified of
//!   each other's arrivals and departures
//! * **`lobby_create` RPC** - creates a lobby and returns its match ID
//! * **Before hook on `MatchDataSend`** - drops oversized payloads
//! * **After hook on `MatchJoin`** - logs joins
//! * **Matchmaker hook** - places each matched group in a lobby sized to it
//!
//! ## Op Codes
//!
//! | Op | Direction | Payload |
//! |----|-----------|---------|
//! | 1  | server → clients | `{"user_id", "username"}` of a player who joined |
//! | 2  | server → clients | `{"user_id", "username"}` of a player who left |
//! | 3  | server → clients | `{"grace_seconds"}` when the lobby is closing |
//! | 10 | client → others | chat payload, relayed unchanged |

use async_trait::async_trait;
use runtime_api::{
    Context, Envelope, InitModule, Initializer, JoinAttempt, JoinMetadata, Logger, MatchEnv,
    MatchHandler, MatchInit, MatchMessage, MatchParams, MatchmakerEntry, Presence, RtHookMessage,
    RuntimeError, ServerApi, SignalReply,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Match module name the lobby handler is registered under.
pub const LOBBY_MODULE: &str = "lobby";

pub const OP_PLAYER_JOINED: i64 = 1;
pub const OP_PLAYER_LEFT: i64 = 2;
pub const OP_LOBBY_CLOSING: i64 = 3;
pub const OP_CHAT: i64 = 10;

/// Largest match data payload the before hook lets through.
pub const MAX_MESSAGE_BYTES: usize = 4096;

const DEFAULT_MAX_PLAYERS: usize = 4;
const DEFAULT_TICK_RATE: u32 = 5;
const DEFAULT_EMPTY_TICKS_LIMIT: u64 = 50;

/// Per-lobby state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyState {
    pub max_players: usize,
    pub players: Vec<Presence>,
    /// Closed lobbies reject every join
    pub closed: bool,
    /// Consecutive ticks without players since the first player joined
    pub empty_ticks: u64,
    pub empty_ticks_limit: u64,
    pub had_players: bool,
    pub messages_relayed: u64,
}

impl LobbyState {
    fn label(&self) -> String {
        json!({ "mode": "lobby", "open": !self.closed, "max_players": self.max_players }).to_string()
    }

    fn status(&self) -> String {
        json!({
            "players": self.players.len(),
            "max_players": self.max_players,
            "closed": self.closed,
            "messages_relayed": self.messages_relayed,
        })
        .to_string()
    }
}

#[derive(Serialize)]
struct PlayerNotice<'a> {
    user_id: &'a str,
    username: &'a str,
}

fn notice(presence: &Presence) -> Vec<u8> {
    serde_json::to_vec(&PlayerNotice {
        user_id: &presence.user_id,
        username: &presence.username,
    })
    .unwrap_or_default()
}

fn param_u64(params: &MatchParams, key: &str) -> Result<Option<u64>, RuntimeError> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| RuntimeError::type_error(format!("{key} must be a non-negative integer"))),
    }
}

/// Like [`param_u64`], but the value must also fit in `T`.
fn param_int<T: TryFrom<u64>>(params: &MatchParams, key: &str) -> Result<Option<T>, RuntimeError> {
    param_u64(params, key)?
        .map(|v| T::try_from(v).map_err(|_| RuntimeError::type_error(format!("{key} is out of range"))))
        .transpose()
}

/// The lobby match handler.
///
/// Params: `max_players` (default 4), `tick_rate` (default 5) and
/// `empty_ticks_limit` (default 50).
pub struct LobbyMatch;

#[async_trait]
impl MatchHandler for LobbyMatch {
    type State = LobbyState;

    async fn match_init(
        &self,
        _ctx: &Context,
        logger: &Logger,
        _nk: Arc<dyn ServerApi>,
        params: MatchParams,
    ) -> Result<MatchInit<LobbyState>, RuntimeError> {
        let max_players =
            param_int::<usize>(&params, "max_players")?.unwrap_or(DEFAULT_MAX_PLAYERS);
        if max_players == 0 {
            return Err(RuntimeError::invalid_argument("max_players must be at least 1"));
        }
        let tick_rate = param_int::<u32>(&params, "tick_rate")?.unwrap_or(DEFAULT_TICK_RATE);

        let state = LobbyState {
            max_players,
            players: Vec::new(),
            closed: false,
            empty_ticks: 0,
            empty_ticks_limit: param_u64(&params, "empty_ticks_limit")?
                .unwrap_or(DEFAULT_EMPTY_TICKS_LIMIT),
            had_players: false,
            messages_relayed: 0,
        };
        logger.info(format!("lobby created for {max_players} players"));
        Ok(MatchInit {
            label: state.label(),
            state,
            tick_rate,
        })
    }

    async fn match_join_attempt(
        &self,
        env: &MatchEnv,
        _tick: u64,
        state: LobbyState,
        _presence: &Presence,
        _metadata: &JoinMetadata,
    ) -> Result<Option<JoinAttempt<LobbyState>>, RuntimeError> {
        if state.closed {
            return Ok(Some(JoinAttempt::reject(state, "lobby is closed")));
        }
        // Counts accepted joins that have not reached match_join yet.
        let occupied = match &env.ctx.match_id {
            Some(match_id) => env.nk.match_get(match_id).await?.map(|info| info.size),
            None => None,
        }
        .unwrap_or(state.players.len());
        if occupied >= state.max_players {
            return Ok(Some(JoinAttempt::reject(state, "lobby is full")));
        }
        Ok(Some(JoinAttempt::accept(state)))
    }

    async fn match_join(
        &self,
        env: &MatchEnv,
        _tick: u64,
        mut state: LobbyState,
        presences: &[Presence],
    ) -> Result<Option<LobbyState>, RuntimeError> {
        state.players.extend(presences.iter().cloned());
        state.had_players = true;
        state.empty_ticks = 0;
        for presence in presences {
            env.dispatcher
                .broadcast_message(OP_PLAYER_JOINED, &notice(presence), None, None, true)?;
        }
        Ok(Some(state))
    }

    async fn match_leave(
        &self,
        env: &MatchEnv,
        _tick: u64,
        mut state: LobbyState,
        presences: &[Presence],
    ) -> Result<Option<LobbyState>, RuntimeError> {
        state
            .players
            .retain(|player| !presences.iter().any(|p| p.same_participant(player)));
        for presence in presences {
            env.dispatcher
                .broadcast_message(OP_PLAYER_LEFT, &notice(presence), None, None, true)?;
        }
        Ok(Some(state))
    }

    async fn match_loop(
        &self,
        env: &MatchEnv,
        _tick: u64,
        mut state: LobbyState,
        messages: Vec<MatchMessage>,
    ) -> Result<Option<LobbyState>, RuntimeError> {
        for message in messages {
            if message.op_code != OP_CHAT {
                env.logger
                    .debug(format!("ignoring op {} from {}", message.op_code, message.sender.username));
                continue;
            }
            let others: Vec<Presence> = state
                .players
                .iter()
                .filter(|p| !p.same_participant(&message.sender))
                .cloned()
                .collect();
            if !others.is_empty() {
                env.dispatcher.broadcast_message(
                    OP_CHAT,
                    &message.data,
                    Some(&others),
                    Some(&message.sender),
                    message.reliable,
                )?;
                state.messages_relayed += 1;
            }
        }

        if state.players.is_empty() && state.had_players {
            state.empty_ticks += 1;
            if state.empty_ticks >= state.empty_ticks_limit {
                env.logger.info("lobby empty, closing");
                return Ok(None);
            }
        } else {
            state.empty_ticks = 0;
        }
        Ok(Some(state))
    }

    async fn match_terminate(
        &self,
        env: &MatchEnv,
        _tick: u64,
        _state: LobbyState,
        grace_seconds: u64,
    ) -> Result<Option<LobbyState>, RuntimeError> {
        let payload = json!({ "grace_seconds": grace_seconds }).to_string();
        env.dispatcher
            .broadcast_message(OP_LOBBY_CLOSING, payload.as_bytes(), None, None, true)?;
        Ok(None)
    }

    async fn match_signal(
        &self,
        env: &MatchEnv,
        _tick: u64,
        mut state: LobbyState,
        data: String,
    ) -> Result<Option<SignalReply<LobbyState>>, RuntimeError> {
        let reply = match data.as_str() {
            "status" => Some(state.status()),
            "close" => {
                state.closed = true;
                env.dispatcher.match_label_update(&state.label())?;
                Some(state.status())
            }
            other => {
                env.logger.warn(format!("unknown signal: {other}"));
                None
            }
        };
        Ok(Some(SignalReply { state, data: reply }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct CreateRequest {
    max_players: Option<u64>,
    tick_rate: Option<u64>,
}

async fn lobby_create(
    ctx: Context,
    logger: Logger,
    nk: Arc<dyn ServerApi>,
    payload: String,
) -> Result<Option<String>, RuntimeError> {
    let request: CreateRequest = if payload.trim().is_empty() {
        CreateRequest::default()
    } else {
        serde_json::from_str(&payload)?
    };

    let mut params = MatchParams::new();
    if let Some(max_players) = request.max_players {
        params.insert("max_players".to_string(), json!(max_players));
    }
    if let Some(tick_rate) = request.tick_rate {
        params.insert("tick_rate".to_string(), json!(tick_rate));
    }
    let match_id = nk.match_create(LOBBY_MODULE, params).await?;
    logger.info(format!(
        "lobby {} created by {}",
        match_id,
        ctx.user_id.as_deref().unwrap_or("server")
    ));
    Ok(Some(json!({ "match_id": match_id.to_string() }).to_string()))
}

async fn drop_oversized_data(
    _ctx: Context,
    logger: Logger,
    _nk: Arc<dyn ServerApi>,
    envelope: Envelope,
) -> Result<Option<Envelope>, RuntimeError> {
    if let Envelope::MatchDataSend(send) = &envelope {
        let size = send.data.as_ref().map(Vec::len).unwrap_or(0);
        if size > MAX_MESSAGE_BYTES {
            logger.warn(format!("dropping {size} byte message for match {}", send.match_id));
            return Ok(None);
        }
    }
    Ok(Some(envelope))
}

async fn log_match_join(
    ctx: Context,
    logger: Logger,
    _nk: Arc<dyn ServerApi>,
    output: Option<Envelope>,
    input: Envelope,
) -> Result<(), RuntimeError> {
    if let (Some(Envelope::Match(summary)), Envelope::MatchJoin(_)) = (&output, &input) {
        logger.info(format!(
            "{} joined lobby {} ({} present)",
            ctx.username.as_deref().unwrap_or("unknown"),
            summary.match_id,
            summary.size
        ));
    }
    Ok(())
}

async fn place_matched_group(
    _ctx: Context,
    logger: Logger,
    nk: Arc<dyn ServerApi>,
    entries: Vec<MatchmakerEntry>,
) -> Result<Option<String>, RuntimeError> {
    let mut params = MatchParams::new();
    params.insert("max_players".to_string(), json!(entries.len()));
    let match_id = nk.match_create(LOBBY_MODULE, params).await?;
    logger.info(format!("placed {} matched players in {}", entries.len(), match_id));
    Ok(Some(match_id.to_string()))
}

/// Module entry point registering the lobby handler and its hooks.
#[derive(Debug, Default)]
pub struct LobbyModule;

impl LobbyModule {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InitModule for LobbyModule {
    fn name(&self) -> &str {
        "lobby"
    }

    async fn init(
        &self,
        _ctx: &Context,
        logger: &Logger,
        _nk: Arc<dyn ServerApi>,
        initializer: &mut Initializer,
    ) -> Result<(), RuntimeError> {
        initializer.register_match(LOBBY_MODULE, LobbyMatch)?;
        initializer.register_rpc("lobby_create", lobby_create)?;
        initializer.register_rt_before(RtHookMessage::MatchDataSend, drop_oversized_data)?;
        initializer.register_rt_after(RtHookMessage::MatchJoin, log_match_join)?;
        initializer.register_matchmaker_matched(place_matched_group)?;

        info!("🏠 Lobby module registered");
        logger.debug("lobby handlers registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_api::serde_json::Value;

    #[test]
    fn test_label_tracks_closed_flag() {
        let mut state = LobbyState {
            max_players: 2,
            players: Vec::new(),
            closed: false,
            empty_ticks: 0,
            empty_ticks_limit: 5,
            had_players: false,
            messages_relayed: 0,
        };
        let open: Value = serde_json::from_str(&state.label()).unwrap();
        assert_eq!(open["open"], json!(true));

        state.closed = true;
        let closed: Value = serde_json::from_str(&state.label()).unwrap();
        assert_eq!(closed["open"], json!(false));
        assert_eq!(closed["max_players"], json!(2));
    }

    #[test]
    fn test_param_u64_rejects_wrong_types() {
        let mut params = MatchParams::new();
        params.insert("max_players".to_string(), json!("four"));
        let err = param_u64(&params, "max_players").unwrap_err();
        assert_eq!(err.code(), runtime_api::Code::InvalidArgument);
        assert_eq!(param_u64(&params, "missing").unwrap(), None);
    }

    #[test]
    fn test_param_int_rejects_values_that_do_not_fit() {
        let mut params = MatchParams::new();
        params.insert("tick_rate".to_string(), json!(4_294_967_301u64));
        params.insert("max_players".to_string(), json!(6));

        let err = param_int::<u32>(&params, "tick_rate").unwrap_err();
        assert_eq!(err.code(), runtime_api::Code::InvalidArgument);
        assert_eq!(param_int::<usize>(&params, "max_players").unwrap(), Some(6));
        assert_eq!(param_int::<u32>(&params, "missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_data_is_dropped() {
        use runtime_api::{MatchDataSend, MatchId};

        let send = |size: usize| {
            Envelope::MatchDataSend(MatchDataSend {
                match_id: MatchId::new("n"),
                op_code: OP_CHAT,
                data: Some(vec![0; size]),
                presences: Vec::new(),
                reliable: true,
            })
        };
        let host = match_host::RuntimeHost::new(
            match_host::HostConfig::default(),
            Arc::new(match_host::ChannelSink::new()),
        )
        .unwrap();
        let nk = host.nk().unwrap();
        let ctx = Context::default();

        let kept = drop_oversized_data(ctx.clone(), Logger::new("t"), nk.clone(), send(MAX_MESSAGE_BYTES))
            .await
            .unwrap();
        assert!(kept.is_some());
        let dropped = drop_oversized_data(ctx, Logger::new("t"), nk, send(MAX_MESSAGE_BYTES + 1))
            .await
            .unwrap();
        assert!(dropped.is_none());
    }
}
