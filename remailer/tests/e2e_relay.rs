//! End-to-end flows: real ingress sessions, real spool directories, and a
//! scripted upstream, all in one process.

mod support;

use std::time::Duration;

use remailer_common::event::Event;
use remailer_spool::Queue;
use support::{mock_upstream::MockUpstream, wait_until, Harness};
use tempfile::tempdir;

#[tokio::test]
async fn burst_is_spooled_then_drained_one_per_tick() {
    let upstream = MockUpstream::start().await;
    let root = tempdir().unwrap();
    let harness = Harness::start(root.path(), upstream.addr(), 150, true).await;

    // Hold the dispatcher while the burst arrives so every ack can be
    // checked against the spool before anything leaves it.
    harness.state.pause_sender(true);

    for index in 0..5 {
        let reply = harness
            .send_mail(
                "producer@example.com",
                "audience@example.org",
                &format!("Subject: burst {index}\r\n\r\nmessage {index}\r\n"),
            )
            .await
            .unwrap();
        assert!(reply.message().contains("queued as "));
    }

    // Every ack implies a durable parking entry.
    let parked = harness.spool.queued(Queue::Parking);
    assert_eq!(parked.len(), 5);
    for filename in &parked {
        assert!(harness.spool.path_of(Queue::Parking, filename).exists());
    }

    harness.state.pause_sender(false);
    upstream.wait_for_count(5, Duration::from_secs(10)).await;

    // Delivery happened in receipt order.
    let bodies = upstream.messages();
    for (index, body) in bodies.iter().enumerate() {
        assert!(
            body.contains(&format!("burst {index}")),
            "message {index} out of order: {body}"
        );
    }

    // Everything archived, nothing pending, nothing duplicated.
    wait_until("parking to drain into backup", Duration::from_secs(5), || {
        harness.spool.is_empty(Queue::Parking)
    })
    .await;
    let snapshot = harness.engine.rescan().await.unwrap();
    assert!(snapshot.parking.is_empty());
    assert_eq!(snapshot.parking_backup.len(), 5);

    harness.stop();
}

#[tokio::test]
async fn suspended_sender_holds_the_queue() {
    let upstream = MockUpstream::start().await;
    let root = tempdir().unwrap();
    let harness = Harness::start(root.path(), upstream.addr(), 100, true).await;

    harness.state.pause_sender(true);

    for index in 0..3 {
        harness
            .send_mail(
                "producer@example.com",
                "audience@example.org",
                &format!("Subject: held {index}\r\n\r\nbody\r\n"),
            )
            .await
            .unwrap();
    }

    // Many tick periods pass; nothing moves while suspended.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(upstream.message_count(), 0);
    assert_eq!(harness.spool.len(Queue::Parking), 3);

    harness.state.pause_sender(false);
    upstream.wait_for_count(3, Duration::from_secs(5)).await;

    harness.stop();
}

#[tokio::test]
async fn upstream_rejection_moves_the_file_to_error_and_requeues() {
    let upstream = MockUpstream::start().await;
    upstream.set_reject_data(true);

    let root = tempdir().unwrap();
    let harness = Harness::start(root.path(), upstream.addr(), 100, true).await;

    harness
        .send_mail(
            "producer@example.com",
            "audience@example.org",
            "Subject: doomed\r\n\r\nbody\r\n",
        )
        .await
        .unwrap();

    wait_until("the file to land in error/", Duration::from_secs(5), || {
        harness.spool.queued(Queue::Error).len() == 1
    })
    .await;

    // On disk: in error/, gone from parking/. In memory: re-queued at the
    // parking tail for another attempt.
    let snapshot_error = std::fs::read_dir(harness.spool.dir(Queue::Error))
        .unwrap()
        .count();
    assert_eq!(snapshot_error, 1);
    assert_eq!(
        std::fs::read_dir(harness.spool.dir(Queue::Parking))
            .unwrap()
            .count(),
        0
    );
    // The failed name cycles through the in-memory parking queue for
    // further attempts (it is briefly absent while a tick holds it).
    wait_until("the name to be re-queued", Duration::from_secs(5), || {
        harness.spool.queued(Queue::Parking).len() == 1
    })
    .await;

    // The retried name no longer exists in parking/, so the next attempt
    // surfaces a persist failure rather than a delivery.
    wait_until("a persist failure on retry", Duration::from_secs(5), || {
        harness.events.count_matching(|event| {
            matches!(event, Event::Error { message, .. } if message.contains("persist"))
        }) >= 1
    })
    .await;
    assert_eq!(upstream.message_count(), 0);

    harness.stop();
}

#[tokio::test]
async fn direct_mode_forwards_within_the_session() {
    let upstream = MockUpstream::start().await;
    let root = tempdir().unwrap();
    let harness = Harness::start(root.path(), upstream.addr(), 0, true).await;

    let reply = harness
        .send_mail(
            "producer@example.com",
            "audience@example.org",
            "Subject: now\r\n\r\nimmediately please\r\n",
        )
        .await
        .unwrap();

    // The 250 only arrives after the upstream accepted the message.
    assert!(reply.message().contains("forwarded as "));
    assert_eq!(upstream.message_count(), 1);

    let snapshot = harness.engine.rescan().await.unwrap();
    assert!(snapshot.direct.is_empty());
    assert_eq!(snapshot.direct_backup.len(), 1);

    harness.stop();
}

#[tokio::test]
async fn paused_listener_drains_the_body_and_stores_nothing() {
    let upstream = MockUpstream::start().await;
    let root = tempdir().unwrap();
    let harness = Harness::start(root.path(), upstream.addr(), 100, true).await;

    harness.state.pause_listener(true);

    let err = harness
        .send_mail(
            "producer@example.com",
            "audience@example.org",
            "Subject: refused\r\n\r\nlong body that still gets read\r\n",
        )
        .await
        .unwrap_err();

    match err {
        remailer_smtp::client::ClientError::Refused { code, .. } => assert_eq!(code, 451),
        other => panic!("expected an SMTP refusal, got {other}"),
    }

    let snapshot = harness.engine.rescan().await.unwrap();
    assert!(snapshot.parking.is_empty());
    assert!(snapshot.direct.is_empty());
    assert_eq!(
        harness
            .events
            .count_matching(|event| matches!(event, Event::Reject { .. })),
        1
    );

    harness.stop();
}

#[tokio::test]
async fn restart_recovers_the_parking_backlog_in_order() {
    let upstream = MockUpstream::start().await;
    let root = tempdir().unwrap();

    // A previous instance left three undelivered files behind.
    let parking = root.path().join("eml-parking");
    std::fs::create_dir_all(&parking).unwrap();
    for (stamp, tag) in [("010", "t1"), ("020", "t2"), ("030", "t3")] {
        std::fs::write(
            parking.join(format!("20240101000000{stamp}_{tag}_a-b-c_d-e-f.eml")),
            format!("Subject: recovered {tag}\r\nFrom: a@b.c\r\nTo: d@e.f\r\n\r\nbody {tag}\r\n"),
        )
        .unwrap();
    }

    let harness = Harness::start(root.path(), upstream.addr(), 100, true).await;

    upstream.wait_for_count(3, Duration::from_secs(5)).await;

    let bodies = upstream.messages();
    assert!(bodies[0].contains("recovered t1"));
    assert!(bodies[1].contains("recovered t2"));
    assert!(bodies[2].contains("recovered t3"));

    harness.stop();
}
