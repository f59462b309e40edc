//! Gateway lifecycle tests
//!
//! Shards run against the in-memory gateway with Tokio time paused, so heartbeat
//! intervals and reconnect delays elapse instantly.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chorus_cache::MessageLookup;
use chorus_core::{Snowflake, Status};
use chorus_gateway::protocol::{GatewayMessage, OpCode};
use chorus_gateway::shard::ShardState;
use chorus_gateway::{Event, EventName, ListenerFlow};
use integration_tests::{fixtures, settings, Harness, MockGateway, WAIT_LIMIT};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};

// ============================================================================
// Session establishment
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_identify_and_ready() {
    let mut harness = Harness::start(settings(1));
    let (mut conn, identify) = harness.handshake().await;

    assert_eq!(identify.op, OpCode::Identify);
    let payload = identify.d.expect("identify payload");
    assert_eq!(payload["token"], "test-token");
    assert_eq!(payload["shard"], json!([0, 1]));
    assert_eq!(payload["large_threshold"], 250);
    assert_eq!(
        harness.gateway.urls(),
        vec!["wss://gateway.test?v=6&encoding=json".to_string()]
    );

    conn.dispatch("READY", 1, fixtures::ready("abc", json!([])));
    assert_eq!(*harness.next_event().await, Event::Connect { shard_id: 0 });
    assert_eq!(*harness.next_event().await, Event::Ready { shard_id: 0 });
    assert_eq!(
        *harness.next_event().await,
        Event::ShardsReady { shard_count: 1 }
    );

    assert!(harness.coordinator.all_ready());
    assert_eq!(harness.coordinator.shard_states(), vec![ShardState::Connected]);
    assert_eq!(
        harness.cache.current_user().map(|user| user.username),
        Some("ferris".to_string())
    );

    harness.coordinator.shutdown().await;
    assert_eq!(conn.expect_close().await, 1000);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_carry_last_sequence() {
    let mut harness = Harness::start(settings(1));
    let (mut conn, _) = harness.handshake().await;
    conn.dispatch("READY", 7, fixtures::ready("abc", json!([])));
    harness.expect_event(EventName::ShardsReady).await;

    let heartbeat = conn.expect_op(OpCode::Heartbeat).await;
    assert_eq!(heartbeat.d, Some(json!(7)));
    conn.heartbeat_ack();

    // acked, so the connection survives the next interval
    let heartbeat = conn.expect_op(OpCode::Heartbeat).await;
    assert_eq!(heartbeat.d, Some(json!(7)));
}

// ============================================================================
// Guild streaming and chunking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ready_waits_for_streamed_and_chunked_guilds() {
    let mut harness = Harness::start(settings(1));
    let (mut conn, _) = harness.handshake().await;

    let guilds = json!([fixtures::unavailable_guild("10"), fixtures::unavailable_guild("20")]);
    conn.dispatch("READY", 1, fixtures::ready("abc", guilds));
    assert_eq!(*harness.next_event().await, Event::Connect { shard_id: 0 });

    conn.dispatch("GUILD_CREATE", 2, fixtures::guild("10", false, 1, 1));
    assert_eq!(harness.next_event().await.name(), EventName::GuildStreamed);

    conn.dispatch("GUILD_CREATE", 3, fixtures::guild("20", true, 3, 1));
    assert_eq!(harness.next_event().await.name(), EventName::GuildStreamed);

    let request = conn.expect_op(OpCode::RequestMembers).await;
    let payload = request.d.expect("request payload");
    assert_eq!(payload["guild_id"], json!(["20"]));
    assert_eq!(payload["limit"], 0);
    assert!(!harness.coordinator.all_ready());

    conn.dispatch("GUILD_MEMBERS_CHUNK", 4, fixtures::member_chunk("20", &["2001", "2002"]));
    match &*harness.next_event().await {
        Event::GuildChunk { guild, complete, .. } => {
            assert_eq!(guild.id, Snowflake::new(20));
            assert!(*complete);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(*harness.next_event().await, Event::Ready { shard_id: 0 });
    assert_eq!(harness.next_event().await.name(), EventName::ShardsReady);

    let guild = harness.cache.find_guild(Snowflake::new(20)).expect("guild cached");
    assert!(guild.chunked);
    assert!(harness.cache.find_member(guild.id, Snowflake::new(2002)).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_messages_reach_cache_and_handlers() {
    let mut harness = Harness::start(settings(1));
    let (conn, _) = harness.handshake().await;
    conn.dispatch("READY", 1, fixtures::ready("abc", json!([])));
    harness.expect_event(EventName::ShardsReady).await;

    conn.dispatch("GUILD_CREATE", 2, fixtures::guild("10", false, 1, 1));
    assert_eq!(harness.next_event().await.name(), EventName::GuildJoin);

    conn.dispatch("MESSAGE_CREATE", 3, fixtures::message("30", "101", "hello"));
    match &*harness.next_event().await {
        Event::MessageCreate { message, author } => {
            assert_eq!(message.content, "hello");
            assert_eq!(author.username, "corro");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        harness.cache.find_message(Snowflake::new(101), Snowflake::new(30)),
        MessageLookup::Cached(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_does_not_stall_heartbeats() {
    let mut harness = Harness::start(settings(1));
    let (conn, _) = harness.handshake().await;
    conn.dispatch("READY", 1, fixtures::ready("abc", json!([])));
    harness.expect_event(EventName::ShardsReady).await;

    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    harness
        .dispatcher
        .register(EventName::MessageCreate, move |_ctx, _event| {
            let flag = Arc::clone(&flag);
            async move {
                sleep(Duration::from_secs(200)).await;
                flag.store(true, Ordering::SeqCst);
                anyhow::Ok(ListenerFlow::Continue)
            }
        });

    conn.dispatch("GUILD_CREATE", 2, fixtures::guild("10", false, 1, 1));
    conn.dispatch("MESSAGE_CREATE", 3, fixtures::message("30", "101", "slow"));
    harness.expect_event(EventName::MessageCreate).await;
    let acker = conn.spawn_acker();

    // three heartbeat intervals pass while the handler sleeps
    sleep(Duration::from_secs(150)).await;
    assert!(!finished.load(Ordering::SeqCst));
    assert!(!acker.is_finished());
    assert_eq!(harness.coordinator.shard_states(), vec![ShardState::Connected]);

    sleep(Duration::from_secs(60)).await;
    assert!(finished.load(Ordering::SeqCst));

    harness.coordinator.shutdown().await;
    assert_eq!(acker.await.unwrap(), Some(1000));
}

#[tokio::test(start_paused = true)]
async fn test_handler_waits_for_a_later_event() {
    let mut harness = Harness::start(settings(1));
    let (conn, _) = harness.handshake().await;
    conn.dispatch("READY", 1, fixtures::ready("abc", json!([])));
    harness.expect_event(EventName::ShardsReady).await;

    let (armed_tx, armed_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();
    let senders = Mutex::new(Some((armed_tx, done_tx)));
    let dispatcher = Arc::clone(&harness.dispatcher);
    harness
        .dispatcher
        .register(EventName::MessageCreate, move |_ctx, _event| {
            let joined = dispatcher.wait_for(EventName::GuildJoin, |event| {
                matches!(event, Event::GuildJoin(guild) if guild.id == Snowflake::new(20))
            });
            let senders = senders.lock().take();
            async move {
                if let Some((armed, done)) = senders {
                    let _ = armed.send(());
                    let _ = done.send(joined.await);
                }
                anyhow::Ok(ListenerFlow::Stop)
            }
        });

    conn.dispatch("GUILD_CREATE", 2, fixtures::guild("10", false, 1, 1));
    conn.dispatch("MESSAGE_CREATE", 3, fixtures::message("30", "101", "wait"));
    timeout(WAIT_LIMIT, armed_rx).await.unwrap().unwrap();

    // only reachable if the shard keeps reading while the handler waits
    conn.dispatch("GUILD_CREATE", 4, fixtures::guild("20", false, 1, 1));
    let joined = timeout(WAIT_LIMIT, done_rx).await.unwrap().unwrap();
    match joined.as_deref() {
        Some(Event::GuildJoin(guild)) => assert_eq!(guild.id, Snowflake::new(20)),
        other => panic!("unexpected event: {other:?}"),
    }
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_zombied_connection_resumes() {
    let mut harness = Harness::start(settings(1));
    let (mut conn, _) = harness.handshake().await;
    conn.dispatch("READY", 3, fixtures::ready("abc", json!([])));
    harness.expect_event(EventName::ShardsReady).await;

    // never acknowledged: the next due heartbeat declares the connection dead
    conn.expect_op(OpCode::Heartbeat).await;
    assert_eq!(conn.expect_close().await, 4000);

    match &*harness.expect_event(EventName::Disconnect).await {
        Event::Disconnect { will_resume, .. } => assert!(*will_resume),
        other => panic!("unexpected event: {other:?}"),
    }

    let (conn, resume) = harness.handshake().await;
    assert_eq!(resume.op, OpCode::Resume);
    let payload = resume.d.expect("resume payload");
    assert_eq!(payload["session_id"], "abc");
    assert_eq!(payload["seq"], 3);
    assert_eq!(payload["token"], "test-token");

    // replay: seq 3 was already applied, seq 4 is new
    conn.dispatch("GUILD_CREATE", 3, fixtures::guild("30", false, 1, 1));
    conn.dispatch("GUILD_CREATE", 4, fixtures::guild("10", false, 1, 1));
    conn.dispatch("RESUMED", 5, json!({}));

    match &*harness.next_event().await {
        Event::GuildJoin(guild) => assert_eq!(guild.id, Snowflake::new(10)),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        *harness.next_event().await,
        Event::Resumed {
            shard_id: 0,
            replayed: 1
        }
    );
    assert!(harness.cache.find_guild(Snowflake::new(30)).is_none());
    assert_eq!(harness.coordinator.shard_states(), vec![ShardState::Connected]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_request_resumes() {
    let mut harness = Harness::start(settings(1));
    let (mut conn, _) = harness.handshake().await;
    conn.dispatch("READY", 2, fixtures::ready("abc", json!([])));
    harness.expect_event(EventName::ShardsReady).await;

    conn.send(&GatewayMessage::reconnect());
    assert_eq!(conn.expect_close().await, 4000);

    let (_conn, resume) = harness.handshake().await;
    assert_eq!(resume.op, OpCode::Resume);
    assert_eq!(resume.d.expect("resume payload")["seq"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_storm_exhausts_retries() {
    let mut config = settings(1);
    config.backoff.max_attempts = Some(3);
    let mut harness = Harness::start(config);
    let (mut conn, _) = harness.handshake().await;
    conn.dispatch("READY", 1, fixtures::ready("abc", json!([])));
    harness.expect_event(EventName::ShardsReady).await;

    // every connection is told to reconnect before it resumes
    for _ in 0..3 {
        conn.send(&GatewayMessage::reconnect());
        assert_eq!(conn.expect_close().await, 4000);
        let (next, resume) = harness.handshake().await;
        assert_eq!(resume.op, OpCode::Resume);
        conn = next;
    }
    conn.send(&GatewayMessage::reconnect());
    assert_eq!(conn.expect_close().await, 4000);

    match &*harness.expect_event(EventName::ShardFailed).await {
        Event::ShardFailed { reason, .. } => assert_eq!(reason, "reconnect attempts exhausted"),
        other => panic!("unexpected event: {other:?}"),
    }
    harness.coordinator.wait().await;
    assert_eq!(harness.coordinator.shard_states(), vec![ShardState::Failed]);
    assert_eq!(harness.gateway.urls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_session_reidentifies() {
    let mut harness = Harness::start(settings(1));
    let (mut conn, _) = harness.handshake().await;
    conn.dispatch("READY", 1, fixtures::ready("abc", json!([])));
    harness.expect_event(EventName::ShardsReady).await;

    conn.send(&GatewayMessage::invalid_session(false));
    assert_eq!(conn.expect_close().await, 1000);

    match &*harness.expect_event(EventName::Disconnect).await {
        Event::Disconnect { will_resume, .. } => assert!(!*will_resume),
        other => panic!("unexpected event: {other:?}"),
    }

    let (conn, identify) = harness.handshake().await;
    assert_eq!(identify.op, OpCode::Identify);

    // a fresh session fires readiness again
    conn.dispatch("READY", 1, fixtures::ready("def", json!([])));
    assert_eq!(*harness.next_event().await, Event::Connect { shard_id: 0 });
    assert_eq!(*harness.next_event().await, Event::Ready { shard_id: 0 });
    assert_eq!(harness.next_event().await.name(), EventName::ShardsReady);
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failure_is_fatal() {
    let mut harness = Harness::start(settings(1));
    let (conn, _) = harness.handshake().await;
    conn.close(4004, "");

    match &*harness.expect_event(EventName::Disconnect).await {
        Event::Disconnect {
            code, will_resume, ..
        } => {
            assert_eq!(*code, Some(4004));
            assert!(!*will_resume);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &*harness.expect_event(EventName::ShardFailed).await {
        Event::ShardFailed { shard_id, reason } => {
            assert_eq!(*shard_id, 0);
            assert_eq!(reason, "Authentication failed");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    harness.coordinator.wait().await;
    assert_eq!(harness.coordinator.shard_states(), vec![ShardState::Failed]);
    assert_eq!(harness.gateway.urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_exhaust_retries() {
    let gateway = MockGateway::new();
    gateway.refuse(usize::MAX);

    let mut config = settings(1);
    config.backoff.max_attempts = Some(2);
    let mut harness = Harness::start_with(config, gateway);

    for _ in 0..3 {
        assert_eq!(harness.next_event().await.name(), EventName::Disconnect);
    }
    match &*harness.next_event().await {
        Event::ShardFailed { reason, .. } => assert_eq!(reason, "reconnect attempts exhausted"),
        other => panic!("unexpected event: {other:?}"),
    }

    harness.coordinator.wait().await;
    assert_eq!(harness.gateway.urls().len(), 3);
}

// ============================================================================
// Multiple shards
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shards_ready_and_command_routing() {
    let mut harness = Harness::start(settings(2));

    let mut conns = Vec::new();
    for _ in 0..2 {
        let (conn, identify) = harness.handshake().await;
        let shard = identify.d.expect("identify payload")["shard"].clone();
        assert_eq!(shard[1], 2);
        let shard_id = shard[0].as_u64().expect("shard id");
        conns.push((shard_id, conn));
    }
    conns.sort_by_key(|(shard_id, _)| *shard_id);
    let mut conns: Vec<_> = conns.into_iter().map(|(_, conn)| conn).collect();

    for conn in &conns {
        conn.dispatch("READY", 1, fixtures::ready("abc", json!([])));
    }
    let ready = harness.expect_event(EventName::ShardsReady).await;
    assert_eq!(*ready, Event::ShardsReady { shard_count: 2 });
    assert!(harness.coordinator.all_ready());

    // (1 << 22) >> 22 == 1, served by shard 1
    harness
        .coordinator
        .request_members(&[Snowflake::new(1 << 22)])
        .await
        .unwrap();
    let request = conns[1].expect_op(OpCode::RequestMembers).await;
    assert_eq!(request.d.expect("request payload")["guild_id"], json!(["4194304"]));

    harness
        .coordinator
        .change_status(None, Status::Idle, None, false)
        .await
        .unwrap();
    for conn in &mut conns {
        let presence = conn.expect_op(OpCode::Presence).await;
        assert_eq!(presence.d.expect("presence payload")["status"], "idle");
    }
}

#[tokio::test(start_paused = true)]
async fn test_identify_pacing_keeps_heartbeats_flowing() {
    let mut config = settings(2);
    config.identify_interval = Duration::from_secs(5);
    let mut harness = Harness::start(config);
    let started = Instant::now();

    let mut ackers = Vec::new();
    for _ in 0..2 {
        let mut conn = harness.gateway.accept().await;
        let connected_at = started.elapsed();
        conn.hello(1_000);
        // the IDENTIFY turn is taken before connecting, so nothing precedes it
        assert_eq!(conn.next_message().await.op, OpCode::Identify);
        conn.dispatch("READY", 1, fixtures::ready("abc", json!([])));
        ackers.push((connected_at, conn.spawn_acker()));
    }
    assert!(ackers[0].0 < Duration::from_millis(100));
    assert!(ackers[1].0 >= Duration::from_millis(4_900));

    harness.expect_event(EventName::ShardsReady).await;
    sleep(Duration::from_secs(10)).await;
    assert_eq!(
        harness.coordinator.shard_states(),
        vec![ShardState::Connected, ShardState::Connected]
    );

    harness.coordinator.shutdown().await;
    for (_, acker) in ackers {
        assert_eq!(acker.await.unwrap(), Some(1000));
    }
}
