use std::time::Duration;

use std::sync::Arc;

use dialtone::{CallPhase, DriverStopped, SessionStatus, StatusSnapshot};
use tokio::sync::{watch, Semaphore};

use crate::integration::init_tracing;
use crate::utils::{EngineBehavior, TestPeer};

async fn wait_for(
    status: &mut watch::Receiver<StatusSnapshot>,
    predicate: impl Fn(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let snapshot = status.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            status.changed().await.expect("Status board dropped");
        }
    })
    .await
    .expect("Timed out waiting for status")
}

#[tokio::test]
async fn test_driver_runs_intents_until_disconnect() {
    init_tracing();

    let alice = TestPeer::connected("alice").await;
    let engines = alice.engines.clone();
    let (driver, handle, transport) = alice.into_driver();
    let driver_task = tokio::spawn(driver.run());

    let mut status = handle.status();
    handle.dial("bob").expect("Driver stopped");
    let snapshot = wait_for(&mut status, |s| s.call == CallPhase::Dialing).await;
    assert_eq!(snapshot.remote.as_deref(), Some("bob"));
    wait_for(&mut status, |s| {
        s.last_message.as_deref() == Some("Sent offer to bob.")
    })
    .await;

    handle.hang_up().expect("Driver stopped");
    wait_for(&mut status, |s| s.call == CallPhase::Idle).await;

    handle.disconnect().expect("Driver stopped");
    let driver = tokio::time::timeout(Duration::from_secs(5), driver_task)
        .await
        .expect("Driver did not stop")
        .expect("Driver panicked");

    assert!(!driver.session().is_connected());
    assert!(!driver.session().has_pending_steps());
    assert_eq!(handle.snapshot().session, SessionStatus::Disconnected);
    assert_eq!(transport.sent_kinds().first(), Some(&"offer"));
    assert_eq!(transport.sent_kinds().last(), Some(&"call_end"));
    assert_eq!(engines.last().close_count(), 1);
}

#[tokio::test]
async fn test_driver_reports_rejected_intents() {
    init_tracing();

    let alice = TestPeer::connected("alice").await;
    let (driver, handle, _transport) = alice.into_driver();
    let driver_task = tokio::spawn(driver.run());

    let mut status = handle.status();
    handle.dial("alice").expect("Driver stopped");
    wait_for(&mut status, |s| {
        s.last_message.as_deref() == Some("Cannot call yourself")
    })
    .await;

    handle.hang_up().expect("Driver stopped");
    wait_for(&mut status, |s| {
        s.last_message.as_deref() == Some("No call in progress")
    })
    .await;

    handle.disconnect().expect("Driver stopped");
    let driver = tokio::time::timeout(Duration::from_secs(5), driver_task)
        .await
        .expect("Driver did not stop")
        .expect("Driver panicked");

    let journal: Vec<_> = handle.journal().into_iter().map(|e| e.text).collect();
    assert_eq!(journal.first().map(String::as_str), Some("Disconnected from relay."));

    drop(driver);
    let err = handle.dial("bob").unwrap_err();
    assert_eq!(err, DriverStopped);
    assert_eq!(err.to_string(), "Session driver has stopped");
}

#[tokio::test]
async fn test_channel_close_during_offer_closes_engine() {
    init_tracing();

    let gate = Arc::new(Semaphore::new(0));
    let behavior = EngineBehavior {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let alice = TestPeer::connected_with("alice", behavior).await;
    let engines = alice.engines.clone();
    let (driver, handle, transport) = alice.into_driver();
    let driver_task = tokio::spawn(driver.run());

    let mut status = handle.status();
    handle.dial("bob").expect("Driver stopped");
    wait_for(&mut status, |s| s.call == CallPhase::Dialing).await;

    transport.drop_connection();
    wait_for(&mut status, |s| s.session == SessionStatus::Disconnected).await;
    assert!(!driver_task.is_finished());

    gate.add_permits(1);
    let driver = tokio::time::timeout(Duration::from_secs(5), driver_task)
        .await
        .expect("Driver did not stop")
        .expect("Driver panicked");

    assert_eq!(engines.created(), 1);
    assert_eq!(engines.last().close_count(), 1);
    assert!(transport.sent().is_empty());
    assert!(!driver.session().has_pending_steps());
    assert_eq!(driver.session().phase(), CallPhase::Idle);
}

#[tokio::test]
async fn test_disconnect_during_offer_closes_engine() {
    init_tracing();

    let gate = Arc::new(Semaphore::new(0));
    let behavior = EngineBehavior {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let alice = TestPeer::connected_with("alice", behavior).await;
    let engines = alice.engines.clone();
    let (driver, handle, transport) = alice.into_driver();
    let driver_task = tokio::spawn(driver.run());

    let mut status = handle.status();
    handle.dial("bob").expect("Driver stopped");
    wait_for(&mut status, |s| s.call == CallPhase::Dialing).await;

    handle.disconnect().expect("Driver stopped");
    wait_for(&mut status, |s| s.session == SessionStatus::Disconnected).await;

    gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), driver_task)
        .await
        .expect("Driver did not stop")
        .expect("Driver panicked");

    assert_eq!(engines.last().close_count(), 1);
    assert_eq!(transport.sent_kinds(), vec!["call_end"]);
}
