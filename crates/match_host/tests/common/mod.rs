//! Shared fixtures for host integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use match_host::{ChannelSink, HostConfig, RuntimeHost};
use parking_lot::Mutex;
use runtime_api::{
    Context, InitModule, Initializer, JoinAttempt, JoinMetadata, Logger, MatchEnv, MatchHandler,
    MatchInit, MatchMessage, MatchParams, Presence, PresenceReason, RuntimeError, ServerApi,
    SignalReply,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One observed callback, tagged with the tick it ran on.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Init,
    JoinAttempt(u64, String),
    Join(u64, Vec<String>),
    Leave(u64, Vec<(String, PresenceReason)>),
    Loop(u64, Vec<i64>),
    Terminate(u64, u64),
    Signal(u64, String),
}

#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<Event>>>);

impl Events {
    pub fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn all(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn loops(&self) -> Vec<(u64, Vec<i64>)> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                Event::Loop(tick, ops) => Some((tick, ops)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.0.lock().iter().position(|e| pred(e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderState {
    pub max_players: usize,
    pub linger: bool,
    pub presences: Vec<Presence>,
    pub messages: u64,
    pub attempts: u64,
    pub hang_terminate: bool,
    pub end_on: Option<String>,
}

/// Match handler that records every callback.
///
/// Params: `tick_rate` (default 10), `max_players` (default 8), `label`,
/// `linger` (terminate keeps the state), `hang_terminate` (terminate never
/// returns), `end_on` (`"join"` or `"leave"` ends the match from that
/// callback), `fail_init`.
///
/// Join attempts from a presence named `ghost` return no result.
///
/// Data op codes: 99 ends the match from the loop, 10 is broadcast to all
/// participants, 11 is broadcast deferred.
///
/// Signals: `stop` ends the match, `kick` kicks everyone, `label:<x>`
/// updates the label, anything else is echoed back as `ack:<data>`.
pub struct Recorder {
    pub events: Events,
}

#[async_trait]
impl MatchHandler for Recorder {
    type State = RecorderState;

    async fn match_init(
        &self,
        _ctx: &Context,
        _logger: &Logger,
        _nk: Arc<dyn ServerApi>,
        params: MatchParams,
    ) -> Result<MatchInit<RecorderState>, RuntimeError> {
        if params.get("fail_init").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(RuntimeError::invalid_argument("init refused"));
        }
        self.events.push(Event::Init);
        let tick_rate = params.get("tick_rate").and_then(|v| v.as_u64()).unwrap_or(10) as u32;
        let label = params
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or("recorder")
            .to_string();
        Ok(MatchInit {
            state: RecorderState {
                max_players: params.get("max_players").and_then(|v| v.as_u64()).unwrap_or(8) as usize,
                linger: params.get("linger").and_then(|v| v.as_bool()).unwrap_or(false),
                presences: Vec::new(),
                messages: 0,
                attempts: 0,
                hang_terminate: params
                    .get("hang_terminate")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                end_on: params
                    .get("end_on")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            },
            tick_rate,
            label,
        })
    }

    async fn match_join_attempt(
        &self,
        _env: &MatchEnv,
        tick: u64,
        mut state: RecorderState,
        presence: &Presence,
        _metadata: &JoinMetadata,
    ) -> Result<Option<JoinAttempt<RecorderState>>, RuntimeError> {
        self.events.push(Event::JoinAttempt(tick, presence.username.clone()));
        state.attempts += 1;
        if presence.username == "ghost" {
            return Ok(None);
        }
        if state.presences.len() >= state.max_players {
            return Ok(Some(JoinAttempt::reject(state, "match full")));
        }
        Ok(Some(JoinAttempt::accept(state)))
    }

    async fn match_join(
        &self,
        _env: &MatchEnv,
        tick: u64,
        mut state: RecorderState,
        presences: &[Presence],
    ) -> Result<Option<RecorderState>, RuntimeError> {
        self.events.push(Event::Join(
            tick,
            presences.iter().map(|p| p.username.clone()).collect(),
        ));
        if state.end_on.as_deref() == Some("join") {
            return Ok(None);
        }
        state.presences.extend(presences.iter().cloned());
        Ok(Some(state))
    }

    async fn match_leave(
        &self,
        _env: &MatchEnv,
        tick: u64,
        mut state: RecorderState,
        presences: &[Presence],
    ) -> Result<Option<RecorderState>, RuntimeError> {
        self.events.push(Event::Leave(
            tick,
            presences.iter().map(|p| (p.username.clone(), p.reason)).collect(),
        ));
        state
            .presences
            .retain(|kept| !presences.iter().any(|p| p.same_participant(kept)));
        if state.end_on.as_deref() == Some("leave") {
            return Ok(None);
        }
        Ok(Some(state))
    }

    async fn match_loop(
        &self,
        env: &MatchEnv,
        tick: u64,
        mut state: RecorderState,
        messages: Vec<MatchMessage>,
    ) -> Result<Option<RecorderState>, RuntimeError> {
        self.events.push(Event::Loop(tick, messages.iter().map(|m| m.op_code).collect()));
        for message in &messages {
            state.messages += 1;
            match message.op_code {
                99 => return Ok(None),
                10 => env.dispatcher.broadcast_message(
                    10,
                    &message.data,
                    None,
                    Some(&message.sender),
                    true,
                )?,
                11 => env.dispatcher.broadcast_message_deferred(
                    11,
                    &message.data,
                    None,
                    Some(&message.sender),
                    true,
                )?,
                _ => {}
            }
        }
        Ok(Some(state))
    }

    async fn match_terminate(
        &self,
        _env: &MatchEnv,
        tick: u64,
        state: RecorderState,
        grace_seconds: u64,
    ) -> Result<Option<RecorderState>, RuntimeError> {
        self.events.push(Event::Terminate(tick, grace_seconds));
        if state.hang_terminate {
            std::future::pending::<()>().await;
        }
        Ok(state.linger.then_some(state))
    }

    async fn match_signal(
        &self,
        env: &MatchEnv,
        tick: u64,
        state: RecorderState,
        data: String,
    ) -> Result<Option<SignalReply<RecorderState>>, RuntimeError> {
        self.events.push(Event::Signal(tick, data.clone()));
        if data == "stop" {
            return Ok(None);
        }
        let reply = if data == "kick" {
            env.dispatcher.match_kick(&state.presences)?;
            "kicked".to_string()
        } else if let Some(label) = data.strip_prefix("label:") {
            env.dispatcher.match_label_update(label)?;
            "relabelled".to_string()
        } else {
            format!("ack:{data}")
        };
        Ok(Some(SignalReply {
            state,
            data: Some(reply),
        }))
    }
}

/// Registers [`Recorder`] as the `recorder` match module.
pub struct RecorderModule {
    pub events: Events,
}

#[async_trait]
impl InitModule for RecorderModule {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn init(
        &self,
        _ctx: &Context,
        _logger: &Logger,
        _nk: Arc<dyn ServerApi>,
        initializer: &mut Initializer,
    ) -> Result<(), RuntimeError> {
        initializer.register_match(
            "recorder",
            Recorder {
                events: self.events.clone(),
            },
        )
    }
}

pub struct Harness {
    pub host: Arc<RuntimeHost>,
    pub sink: Arc<ChannelSink>,
    pub events: Events,
}

pub async fn harness() -> Harness {
    harness_with(HostConfig::default(), Vec::new()).await
}

/// Host with the recorder module loaded first, followed by `extra`.
pub async fn harness_with(config: HostConfig, extra: Vec<Arc<dyn InitModule>>) -> Harness {
    let events = Events::default();
    let sink = Arc::new(ChannelSink::new());
    let host = RuntimeHost::new(config, sink.clone()).expect("Failed to create host");

    let mut modules: Vec<Arc<dyn InitModule>> = vec![Arc::new(RecorderModule {
        events: events.clone(),
    })];
    modules.extend(extra);
    host.load_modules(&modules)
        .await
        .expect("Failed to load modules");

    Harness { host, sink, events }
}

pub fn params(pairs: &[(&str, serde_json::Value)]) -> MatchParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn player(n: u32) -> Presence {
    Presence::new(
        format!("u{n}"),
        format!("s{n}"),
        format!("player{n}"),
        "node-1",
    )
}

/// Presence whose join attempts the recorder answers with no result.
pub fn ghost() -> Presence {
    Presence::new("u0", "s0", "ghost", "node-1")
}

/// Context of a connected client session for `player(n)`.
pub fn session_ctx(n: u32) -> Context {
    Context::new("node-1", runtime_api::ExecutionMode::Rpc)
        .with_user(format!("u{n}"), format!("player{n}"))
        .with_session(format!("s{n}"))
}
