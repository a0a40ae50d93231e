//! Match lifecycle tests driven on a paused clock.

mod common;

use common::{ghost, harness, harness_with, params, player, Event};
use match_host::{HostConfig, MatchPhase};
use runtime_api::{Code, Envelope, MatchListFilter, MatchMessage, PresenceReason, ServerApi};
use serde_json::json;
use tokio::time::{sleep, Duration, Instant};

#[tokio::test(start_paused = true)]
async fn test_leave_join_loop_order_within_tick() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    let alice = player(1);

    let decision = h
        .host
        .matches()
        .join_attempt(&id, alice.clone(), Default::default())
        .await
        .expect("Failed to join");
    assert!(decision.accept);
    assert!(h
        .host
        .matches()
        .send_data(&id, MatchMessage::new(alice.clone(), 5, b"hi".to_vec()))
        .expect("Failed to send data"));
    sleep(Duration::from_millis(150)).await;

    h.host
        .matches()
        .join_attempt(&id, player(2), Default::default())
        .await
        .expect("Failed to join");
    h.host
        .matches()
        .leave(&id, vec![alice])
        .expect("Failed to leave");
    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        h.events.all(),
        vec![
            Event::Init,
            Event::JoinAttempt(0, "player1".into()),
            Event::Join(0, vec!["player1".into()]),
            Event::Loop(0, vec![5]),
            Event::JoinAttempt(1, "player2".into()),
            Event::Leave(1, vec![("player1".into(), PresenceReason::Leave)]),
            Event::Join(1, vec!["player2".into()]),
            Event::Loop(1, vec![]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_loop_runs_every_tick_with_increasing_counter() {
    let h = harness().await;
    h.host
        .match_create("recorder", params(&[("tick_rate", json!(10))]))
        .await
        .expect("Failed to create match");

    sleep(Duration::from_millis(1050)).await;

    let ticks: Vec<u64> = h.events.loops().into_iter().map(|(tick, _)| tick).collect();
    assert_eq!(ticks, (0..10).collect::<Vec<u64>>());
}

#[tokio::test(start_paused = true)]
async fn test_messages_arrive_in_order() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    let alice = player(1);
    h.host
        .matches()
        .join_attempt(&id, alice.clone(), Default::default())
        .await
        .expect("Failed to join");

    for op in [3, 1, 2] {
        h.host
            .matches()
            .send_data(&id, MatchMessage::new(alice.clone(), op, Vec::new()))
            .expect("Failed to send data");
    }
    sleep(Duration::from_millis(150)).await;

    assert_eq!(h.events.loops(), vec![(0, vec![3, 1, 2])]);
}

#[tokio::test(start_paused = true)]
async fn test_data_from_non_participant_is_dropped() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");

    let accepted = h
        .host
        .matches()
        .send_data(&id, MatchMessage::new(player(9), 1, Vec::new()))
        .expect("Failed to send data");
    assert!(!accepted);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(h.events.loops(), vec![(0, vec![])]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_join_is_never_reported() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[("max_players", json!(1))]))
        .await
        .expect("Failed to create match");
    h.host
        .matches()
        .join_attempt(&id, player(1), Default::default())
        .await
        .expect("Failed to join");
    sleep(Duration::from_millis(150)).await;

    let decision = h
        .host
        .matches()
        .join_attempt(&id, player(2), Default::default())
        .await
        .expect("Failed to attempt join");
    assert!(!decision.accept);
    assert_eq!(decision.reject_message.as_deref(), Some("match full"));
    sleep(Duration::from_millis(100)).await;

    assert_eq!(h.events.count(|e| matches!(e, Event::Join(..))), 1);
    let info = h.host.match_get(&id).await.expect("Failed to get match");
    assert_eq!(info.map(|i| i.size), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_join_skips_callback() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");

    for _ in 0..2 {
        let decision = h
            .host
            .matches()
            .join_attempt(&id, player(1), Default::default())
            .await
            .expect("Failed to join");
        assert!(decision.accept);
    }
    sleep(Duration::from_millis(150)).await;

    assert_eq!(h.events.count(|e| matches!(e, Event::JoinAttempt(..))), 1);
    assert_eq!(h.events.count(|e| matches!(e, Event::Join(..))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_leave_before_join_reported_cancels_both() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    h.host
        .matches()
        .join_attempt(&id, player(1), Default::default())
        .await
        .expect("Failed to join");
    h.host
        .matches()
        .leave(&id, vec![player(1)])
        .expect("Failed to leave");
    sleep(Duration::from_millis(150)).await;

    assert_eq!(h.events.count(|e| matches!(e, Event::Join(..))), 0);
    assert_eq!(h.events.count(|e| matches!(e, Event::Leave(..))), 0);
    assert_eq!(h.host.matches().presences(&id), Some(vec![]));
}

#[tokio::test(start_paused = true)]
async fn test_loop_returning_none_ends_match() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    let alice = player(1);
    h.host
        .matches()
        .join_attempt(&id, alice.clone(), Default::default())
        .await
        .expect("Failed to join");
    h.host
        .matches()
        .send_data(&id, MatchMessage::new(alice, 99, Vec::new()))
        .expect("Failed to send data");
    sleep(Duration::from_millis(150)).await;

    assert!(h.host.match_get(&id).await.expect("Failed to get").is_none());
    assert_eq!(h.host.matches().phase(&id), None);
    assert_eq!(h.events.count(|e| matches!(e, Event::Terminate(..))), 0);

    let err = h
        .host
        .matches()
        .join_attempt(&id, player(2), Default::default())
        .await
        .expect_err("join on ended match should fail");
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_lingers_for_grace_period() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[("linger", json!(true))]))
        .await
        .expect("Failed to create match");
    sleep(Duration::from_millis(250)).await;

    let started = Instant::now();
    h.host
        .matches()
        .terminate(&id, 5)
        .await
        .expect("Failed to request terminate");
    sleep(Duration::from_secs(1)).await;

    assert_eq!(h.host.matches().phase(&id), Some(MatchPhase::Terminating));
    let listed = h
        .host
        .match_list(MatchListFilter {
            limit: 10,
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    assert!(listed.is_empty());
    let err = h
        .host
        .matches()
        .join_attempt(&id, player(1), Default::default())
        .await
        .expect_err("join during grace period should fail");
    assert_eq!(err.code(), Code::FailedPrecondition);

    h.host.matches().wait_terminated(&id).await;
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.host.matches().count(), 0);

    let terminate_at = h
        .events
        .position(|e| matches!(e, Event::Terminate(2, 5)))
        .expect("terminate was not called");
    let last_loop = h
        .events
        .position(|e| matches!(e, Event::Loop(1, _)))
        .expect("loop did not run");
    assert!(last_loop < terminate_at);
    assert_eq!(h.events.loops().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_without_state_ends_immediately() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");

    let started = Instant::now();
    h.host
        .matches()
        .terminate(&id, 30)
        .await
        .expect("Failed to request terminate");
    h.host.matches().wait_terminated(&id).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.events.count(|e| *e == Event::Terminate(0, 30)), 1);
    assert!(h.host.match_get(&id).await.expect("Failed to get").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_signal_reply_and_stop() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");

    let reply = h
        .host
        .match_signal(&id, "hello".to_string())
        .await
        .expect("Failed to signal");
    assert_eq!(reply.as_deref(), Some("ack:hello"));

    let err = h
        .host
        .match_signal(&id, "stop".to_string())
        .await
        .expect_err("stop signal should end the match");
    assert_eq!(err.code(), Code::FailedPrecondition);
    h.host.matches().wait_terminated(&id).await;
    assert_eq!(h.host.matches().count(), 0);

    let err = h
        .host
        .match_signal(&id, "hello".to_string())
        .await
        .expect_err("signal to ended match should fail");
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_kick_is_reported_as_leave() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    h.host
        .matches()
        .join_attempt(&id, player(1), Default::default())
        .await
        .expect("Failed to join");
    sleep(Duration::from_millis(150)).await;

    let reply = h
        .host
        .match_signal(&id, "kick".to_string())
        .await
        .expect("Failed to signal");
    assert_eq!(reply.as_deref(), Some("kicked"));
    assert_eq!(h.host.matches().presences(&id), Some(vec![]));

    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.events.count(|e| *e == Event::Leave(1, vec![("player1".into(), PresenceReason::Leave)])),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_reported_with_reason() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    let alice = player(1);
    h.host
        .matches()
        .join_attempt(&id, alice.clone(), Default::default())
        .await
        .expect("Failed to join");
    sleep(Duration::from_millis(150)).await;

    h.host.disconnect(&alice);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        h.events.count(|e| *e == Event::Leave(1, vec![("player1".into(), PresenceReason::Disconnect)])),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_broadcasts_reach_participants() {
    let h = harness().await;
    let mut alice_rx = h.sink.register_session("s1");
    let mut bob_rx = h.sink.register_session("s2");
    let mut outsider_rx = h.sink.register_session("s3");
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    for n in [1, 2] {
        h.host
            .matches()
            .join_attempt(&id, player(n), Default::default())
            .await
            .expect("Failed to join");
    }

    h.host
        .matches()
        .send_data(&id, MatchMessage::new(player(1), 10, b"now".to_vec()))
        .expect("Failed to send data");
    h.host
        .matches()
        .send_data(&id, MatchMessage::new(player(1), 11, b"later".to_vec()))
        .expect("Failed to send data");
    sleep(Duration::from_millis(150)).await;

    for rx in [&mut alice_rx, &mut bob_rx] {
        let mut received = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let Envelope::MatchData(data) = envelope {
                assert_eq!(data.match_id, id);
                assert_eq!(data.presence.as_ref().map(|p| p.user_id.as_str()), Some("u1"));
                received.push((data.op_code, data.data));
            }
        }
        assert_eq!(received, vec![(10, b"now".to_vec()), (11, b"later".to_vec())]);
    }
    assert!(outsider_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_label_update_and_listing() {
    let h = harness().await;
    let quiet = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    let busy = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    h.host
        .matches()
        .join_attempt(&busy, player(1), Default::default())
        .await
        .expect("Failed to join");

    let all = h
        .host
        .match_list(MatchListFilter {
            limit: 10,
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].match_id, busy);

    let default_limit = h
        .host
        .match_list(MatchListFilter::default())
        .await
        .expect("Failed to list");
    assert_eq!(default_limit.len(), 1);

    h.host
        .match_signal(&quiet, "label:closed".to_string())
        .await
        .expect("Failed to signal");
    let closed = h
        .host
        .match_list(MatchListFilter {
            limit: 10,
            label: Some("closed".to_string()),
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].match_id, quiet);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_init_results_leave_nothing_behind() {
    let h = harness().await;

    let err = h
        .host
        .match_create("recorder", params(&[("tick_rate", json!(0))]))
        .await
        .expect_err("tick rate 0 should be rejected");
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = h
        .host
        .match_create("recorder", params(&[("tick_rate", json!(61))]))
        .await
        .expect_err("tick rate above the limit should be rejected");
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = h
        .host
        .match_create("recorder", params(&[("fail_init", json!(true))]))
        .await
        .expect_err("failing init should abort creation");
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "init refused");

    let err = h
        .host
        .match_create("missing", params(&[]))
        .await
        .expect_err("unknown module should fail");
    assert_eq!(err.code(), Code::NotFound);

    assert_eq!(h.host.matches().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_match_is_reaped() {
    let config = HostConfig {
        max_empty_sec: 2,
        ..Default::default()
    };
    let h = harness_with(config, Vec::new()).await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");

    sleep(Duration::from_secs(3)).await;

    assert!(h.host.match_get(&id).await.expect("Failed to get").is_none());
    assert_eq!(h.events.count(|e| matches!(e, Event::Terminate(_, 0))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_reflects_state() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    h.host
        .matches()
        .join_attempt(&id, player(1), Default::default())
        .await
        .expect("Failed to join");
    h.host
        .matches()
        .send_data(&id, MatchMessage::new(player(1), 4, Vec::new()))
        .expect("Failed to send data");
    sleep(Duration::from_millis(150)).await;

    let state = h.host.matches().snapshot(&id).await.expect("Failed to snapshot");
    assert_eq!(state["messages"], json!(1));
    assert_eq!(state["presences"].as_array().map(|p| p.len()), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_terminates_every_match() {
    let h = harness().await;
    for _ in 0..3 {
        h.host
            .match_create("recorder", params(&[]))
            .await
            .expect("Failed to create match");
    }
    assert_eq!(h.host.matches().count(), 3);

    h.host.shutdown(0).await;

    assert_eq!(h.host.matches().count(), 0);
    assert_eq!(h.events.count(|e| matches!(e, Event::Terminate(_, 0))), 3);
}

#[tokio::test(start_paused = true)]
async fn test_null_join_attempt_rejects_and_keeps_state() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[]))
        .await
        .expect("Failed to create match");
    h.host
        .matches()
        .join_attempt(&id, player(1), Default::default())
        .await
        .expect("Failed to join");
    sleep(Duration::from_millis(150)).await;

    let decision = h
        .host
        .matches()
        .join_attempt(&id, ghost(), Default::default())
        .await
        .expect("null join attempt should not end the match");
    assert!(!decision.accept);
    assert_eq!(decision.reject_message, None);

    let loops_before = h.events.loops().len();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(h.host.matches().phase(&id), Some(MatchPhase::Active));
    assert!(h.events.loops().len() >= loops_before + 3);
    assert_eq!(h.events.count(|e| matches!(e, Event::Terminate(..))), 0);
    assert_eq!(
        h.events.count(|e| matches!(e, Event::Join(_, names) if names.contains(&"ghost".to_string()))),
        0
    );
    let state = h.host.matches().snapshot(&id).await.expect("Failed to snapshot");
    assert_eq!(state["attempts"], json!(1));
    assert_eq!(h.host.matches().presences(&id).map(|p| p.len()), Some(1));

    let decision = h
        .host
        .matches()
        .join_attempt(&id, player(2), Default::default())
        .await
        .expect("Failed to join");
    assert!(decision.accept);
}

#[tokio::test(start_paused = true)]
async fn test_join_returning_none_ends_match() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[("end_on", json!("join"))]))
        .await
        .expect("Failed to create match");
    h.host
        .matches()
        .join_attempt(&id, player(1), Default::default())
        .await
        .expect("Failed to join");
    sleep(Duration::from_millis(150)).await;

    assert!(h.host.match_get(&id).await.expect("Failed to get").is_none());
    assert_eq!(h.events.count(|e| matches!(e, Event::Join(0, _))), 1);
    assert!(h.events.loops().is_empty());
    assert_eq!(h.events.count(|e| matches!(e, Event::Terminate(..))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_leave_returning_none_ends_match() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[("end_on", json!("leave"))]))
        .await
        .expect("Failed to create match");
    h.host
        .matches()
        .join_attempt(&id, player(1), Default::default())
        .await
        .expect("Failed to join");
    sleep(Duration::from_millis(150)).await;
    h.host
        .matches()
        .leave(&id, vec![player(1)])
        .expect("Failed to leave");
    sleep(Duration::from_millis(100)).await;

    assert!(h.host.match_get(&id).await.expect("Failed to get").is_none());
    assert_eq!(h.events.count(|e| matches!(e, Event::Leave(1, _))), 1);
    assert_eq!(h.events.loops(), vec![(0, vec![])]);
    assert_eq!(h.events.count(|e| matches!(e, Event::Terminate(..))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_terminate_is_torn_down_at_grace_deadline() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[("hang_terminate", json!(true))]))
        .await
        .expect("Failed to create match");
    sleep(Duration::from_millis(250)).await;

    let started = Instant::now();
    h.host
        .matches()
        .terminate(&id, 3)
        .await
        .expect("Failed to request terminate");
    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.host.matches().phase(&id), Some(MatchPhase::Terminating));

    h.host.matches().wait_terminated(&id).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_millis(3500));
    assert_eq!(h.host.matches().count(), 0);
    assert_eq!(h.events.count(|e| matches!(e, Event::Terminate(_, 3))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_kick_during_grace_period_is_not_reported() {
    let h = harness().await;
    let id = h
        .host
        .match_create("recorder", params(&[("linger", json!(true))]))
        .await
        .expect("Failed to create match");
    h.host
        .matches()
        .join_attempt(&id, player(1), Default::default())
        .await
        .expect("Failed to join");
    sleep(Duration::from_millis(150)).await;

    h.host
        .matches()
        .terminate(&id, 2)
        .await
        .expect("Failed to request terminate");
    sleep(Duration::from_millis(100)).await;
    let reply = h
        .host
        .match_signal(&id, "kick".to_string())
        .await
        .expect("signals are served while lingering");
    assert_eq!(reply.as_deref(), Some("kicked"));
    assert_eq!(h.host.matches().presences(&id).map(|p| p.len()), Some(0));

    h.host.matches().wait_terminated(&id).await;
    assert_eq!(h.events.count(|e| matches!(e, Event::Leave(..))), 0);
    assert_eq!(h.host.matches().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_default_uses_configured_grace() {
    let config = HostConfig {
        default_grace_seconds: 4,
        ..Default::default()
    };
    let h = harness_with(config, Vec::new()).await;
    h.host
        .match_create("recorder", params(&[("linger", json!(true))]))
        .await
        .expect("Failed to create match");

    let started = Instant::now();
    h.host.shutdown_default().await;

    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(h.host.matches().count(), 0);
    assert_eq!(h.events.count(|e| matches!(e, Event::Terminate(_, 4))), 1);
}
