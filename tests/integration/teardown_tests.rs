use dialtone::call_engine::IceState;
use dialtone::media::MediaAccessError;
use dialtone::signaling::SignalingMessage;
use dialtone::{CallError, CallPhase, SessionError, SessionStatus};

use crate::integration::init_tracing;
use crate::utils::{establish_call, TestPeer};

#[tokio::test]
async fn test_remote_call_end_tears_down() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    let mut bob = TestPeer::connected("bob").await;
    establish_call(&mut alice, &mut bob).await;

    bob.engines.last().report_track("stream-alice");
    bob.settle().await;
    assert_eq!(bob.playback.current().as_deref(), Some("stream-alice"));

    bob.deliver(SignalingMessage::CallEnd {
        from: "alice".into(),
        target_user: "bob".into(),
    })
    .await;

    let engine = bob.engines.last();
    assert_eq!(bob.phase(), CallPhase::Idle);
    assert_eq!(engine.close_count(), 1);
    assert!(engine.tracks_stopped());
    assert_eq!(bob.playback.current(), None);
    assert!(bob.session.is_connected());
}

#[tokio::test]
async fn test_call_end_from_other_user_is_ignored() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    let mut bob = TestPeer::connected("bob").await;
    establish_call(&mut alice, &mut bob).await;

    bob.deliver(SignalingMessage::CallEnd {
        from: "mallory".into(),
        target_user: "bob".into(),
    })
    .await;

    assert_eq!(bob.phase(), CallPhase::Active);
    assert_eq!(bob.engines.last().close_count(), 0);
}

#[tokio::test]
async fn test_user_not_found_aborts_dial() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    alice.session.dial("dave").expect("Dial rejected");
    alice.settle().await;

    alice
        .deliver(SignalingMessage::UserNotFound {
            target_user: "dave".into(),
        })
        .await;

    assert_eq!(alice.phase(), CallPhase::Idle);
    assert_eq!(alice.engines.last().close_count(), 1);
    assert!(alice.engines.last().tracks_stopped());
    assert!(alice
        .journal()
        .iter()
        .any(|t| t == "User dave is not connected."));
}

#[tokio::test]
async fn test_user_not_found_for_other_user_keeps_call() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    alice.session.dial("bob").expect("Dial rejected");
    alice.settle().await;
    let before = alice.session.status().snapshot().last_message;

    alice
        .deliver(SignalingMessage::UserNotFound {
            target_user: "dave".into(),
        })
        .await;

    assert_eq!(alice.phase(), CallPhase::Dialing);
    assert_eq!(alice.session.status().snapshot().last_message, before);
    assert!(!alice.journal().iter().any(|t| t.contains("dave")));
}

#[tokio::test]
async fn test_ice_failure_tears_down_without_call_end() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    let mut bob = TestPeer::connected("bob").await;
    establish_call(&mut alice, &mut bob).await;
    alice.transport.take_sent();

    alice.engines.last().report_ice(IceState::Failed);
    alice.settle().await;

    assert_eq!(alice.phase(), CallPhase::Idle);
    assert_eq!(alice.engines.last().close_count(), 1);
    assert!(alice.engines.last().tracks_stopped());
    assert!(alice.transport.sent().is_empty());
}

#[tokio::test]
async fn test_engine_events_after_teardown_are_discarded() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    let mut bob = TestPeer::connected("bob").await;
    establish_call(&mut alice, &mut bob).await;

    alice.session.hang_up().await.expect("Hangup failed");
    alice.transport.take_sent();

    let engine = alice.engines.last();
    engine.report_candidate("candidate:late");
    engine.report_track("stream-late");
    engine.report_ice(IceState::Closed);
    alice.settle().await;

    assert!(alice.transport.sent().is_empty());
    assert_eq!(alice.playback.current(), None);
    assert_eq!(engine.close_count(), 1);
}

#[tokio::test]
async fn test_hangup_notifies_remote_and_is_idempotent() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    let mut bob = TestPeer::connected("bob").await;
    establish_call(&mut alice, &mut bob).await;
    alice.transport.take_sent();

    alice.session.hang_up().await.expect("Hangup failed");
    assert_eq!(
        alice.transport.sent(),
        vec![SignalingMessage::CallEnd {
            from: "alice".into(),
            target_user: "bob".into(),
        }]
    );

    assert_eq!(alice.session.hang_up().await, Err(CallError::NoActiveCall));
    alice
        .deliver(SignalingMessage::CallEnd {
            from: "bob".into(),
            target_user: "alice".into(),
        })
        .await;

    let engine = alice.engines.last();
    assert_eq!(alice.phase(), CallPhase::Idle);
    assert_eq!(engine.close_count(), 1);
    assert!(engine.tracks_stopped());
    assert_eq!(alice.playback.clear_count(), 1);
    assert_eq!(alice.transport.sent_kinds(), vec!["call_end"]);
}

#[tokio::test]
async fn test_new_call_after_teardown() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    let mut bob = TestPeer::connected("bob").await;
    establish_call(&mut alice, &mut bob).await;

    bob.deliver(SignalingMessage::CallEnd {
        from: "alice".into(),
        target_user: "bob".into(),
    })
    .await;
    alice.session.hang_up().await.expect("Hangup failed");
    alice.transport.take_sent();

    establish_call(&mut alice, &mut bob).await;
    assert_eq!(alice.engines.created(), 2);
    assert_eq!(bob.engines.created(), 2);
    assert_eq!(alice.engines.engine(0).close_count(), 1);
    assert_eq!(alice.engines.engine(1).close_count(), 0);
}

#[tokio::test]
async fn test_channel_close_ends_session() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    let mut bob = TestPeer::connected("bob").await;
    establish_call(&mut alice, &mut bob).await;

    alice.transport.drop_connection();
    alice.settle().await;

    let engine = alice.engines.last();
    assert_eq!(alice.phase(), CallPhase::Idle);
    assert_eq!(engine.close_count(), 1);
    assert!(engine.tracks_stopped());
    assert!(!alice.session.is_connected());
    assert_eq!(alice.media.stop_count(), 1);
    assert_eq!(
        alice.session.status().snapshot().session,
        SessionStatus::Disconnected
    );
    assert_eq!(alice.session.dial("bob"), Err(CallError::NotConnected));
}

#[tokio::test]
async fn test_channel_error_closes_channel() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    alice.session.dial("bob").expect("Dial rejected");
    alice.settle().await;

    alice.transport.fail("connection reset");
    alice.settle().await;

    assert_eq!(alice.phase(), CallPhase::Idle);
    assert_eq!(alice.engines.last().close_count(), 1);
    assert_eq!(alice.transport.close_count(), 1);
    assert!(!alice.session.is_connected());
    assert_eq!(alice.media.stop_count(), 1);
}

#[tokio::test]
async fn test_media_access_error_closes_channel() {
    init_tracing();

    let mut alice = TestPeer::new("alice");
    alice.media.deny(MediaAccessError::NoInputDevice);

    let err = alice.session.connect("alice").await.unwrap_err();
    assert_eq!(err, SessionError::Media(MediaAccessError::NoInputDevice));
    alice.settle().await;

    assert_eq!(alice.transport.close_count(), 1);
    assert!(!alice.session.is_connected());
    assert_eq!(
        alice.session.status().snapshot().session,
        SessionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_relay_error_message_keeps_state() {
    init_tracing();

    let mut alice = TestPeer::connected("alice").await;
    alice.session.dial("bob").expect("Dial rejected");
    alice.settle().await;

    alice
        .deliver(SignalingMessage::Error {
            message: "Username already taken".into(),
        })
        .await;

    assert_eq!(alice.phase(), CallPhase::Dialing);
    assert_eq!(
        alice.session.status().snapshot().last_message.as_deref(),
        Some("Relay error: Username already taken")
    );
}
