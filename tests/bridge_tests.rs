//! End-to-end bridge tests over real TCP connections.
//!
//! A full bridge runs on ephemeral ports; fake judges and frontend
//! clients speak the framed protocol against it and the recording
//! service captures what the bridge reported.


use std::time::Duration;

use serde_json::json;

use judge_bridge::service::SubmissionStatus;
use test_harness::{wait_until, FakeJudge, FrontendClient, TestBridge};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn judge_handshake_and_heartbeat() {
    let bridge = TestBridge::start().await;

    let mut judge = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;
    assert_eq!(bridge.dispatcher.judge_names(), vec!["j1"]);
    assert_eq!(
        bridge.service.connected.lock().unwrap().as_slice(),
        ["j1".to_string()]
    );

    // Pings start right after authentication and carry a timestamp.
    let ping = judge.expect("ping").await;
    assert!(ping["when"].as_f64().is_some());

    bridge.shutdown().await;
}

#[tokio::test]
async fn judge_with_a_bad_key_is_rejected() {
    let bridge = TestBridge::start().await;

    let mut judge = FakeJudge::connect_raw(bridge.judge_addr).await;
    judge
        .send(json!({
            "name": "handshake",
            "id": "j1",
            "key": "bm90LXRoZS1rZXk=",
            "problems": ["aplusb"],
            "executors": ["PY3"],
        }))
        .await;

    assert!(judge.wait_closed().await);
    assert!(bridge.dispatcher.judge_names().is_empty());
    assert!(bridge.service.connected.lock().unwrap().is_empty());

    bridge.shutdown().await;
}

#[tokio::test]
async fn early_traffic_before_handshake_is_a_soft_error() {
    let bridge = TestBridge::start().await;

    let mut judge = FakeJudge::connect_raw(bridge.judge_addr).await;
    judge
        .send(json!({"name": "ping-response", "when": 0.0}))
        .await;
    judge.send(json!({"this is": "not a packet"})).await;

    // The connection survives the noise and can still authenticate.
    judge
        .send(json!({
            "name": "handshake",
            "id": "j1",
            "key": TestBridge::key_for("j1"),
            "problems": ["aplusb"],
            "executors": ["PY3"],
        }))
        .await;
    judge.expect("handshake-success").await;
    assert_eq!(bridge.dispatcher.judge_names(), vec!["j1"]);

    bridge.shutdown().await;
}

#[tokio::test]
async fn grading_lifecycle_end_to_end() {
    let bridge = TestBridge::start().await;
    let mut judge = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;
    let mut frontend = FrontendClient::connect(bridge.control_addr).await;

    let reply = frontend
        .request(json!({
            "name": "submission-request",
            "submission-id": 7,
            "problem-id": "aplusb",
            "language": "PY3",
            "source": "print(sum(map(int, input().split())))",
            "priority": 0,
        }))
        .await;
    assert_eq!(reply["name"], "submission-received");
    assert_eq!(reply["submission-id"], 7);

    let request = judge.expect("submission-request").await;
    assert_eq!(request["submission-id"], 7);
    assert_eq!(request["problem-id"], "aplusb");
    assert_eq!(request["language"], "PY3");

    judge
        .send(json!({"name": "grading-begin", "submission-id": 7}))
        .await;
    assert!(
        bridge
            .service
            .wait_for_status(7, SubmissionStatus::Grading, WAIT)
            .await
    );

    judge
        .send(json!({
            "name": "test-case-status",
            "submission-id": 7,
            "cases": [
                {"case": 1, "status": "AC", "time": 0.01},
                {"case": 2, "status": "AC", "time": 0.02},
            ],
        }))
        .await;
    judge
        .send(json!({
            "name": "grading-end",
            "submission-id": 7,
            "result": "AC",
            "score": 100.0,
        }))
        .await;

    assert!(
        bridge
            .service
            .wait_for_status(7, SubmissionStatus::Graded, WAIT)
            .await
    );
    assert_eq!(bridge.service.test_case_count(7), 2);
    assert!(bridge.dispatcher.assigned_to(7).is_none());
    assert_eq!(bridge.dispatcher.is_working("j1"), Some(false));

    let kinds = bridge.service.event_kinds(7);
    assert!(kinds.contains(&"grading-begin".to_string()));
    assert!(kinds.contains(&"grading-end".to_string()));

    bridge.shutdown().await;
}

#[tokio::test]
async fn abort_round_trip() {
    let bridge = TestBridge::start().await;
    let mut judge = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;
    let mut frontend = FrontendClient::connect(bridge.control_addr).await;

    frontend
        .request(json!({
            "name": "submission-request",
            "submission-id": 9,
            "problem-id": "aplusb",
            "language": "PY3",
            "source": "while True: pass",
            "priority": 0,
        }))
        .await;
    judge.expect("submission-request").await;

    let reply = frontend
        .request(json!({"name": "terminate-submission", "submission-id": 9}))
        .await;
    assert_eq!(reply["name"], "submission-received");
    assert_eq!(reply["judge-aborted"], true);

    let terminate = judge.expect("terminate-submission").await;
    assert_eq!(terminate["submission-id"], 9);
    judge
        .send(json!({"name": "submission-terminated", "submission-id": 9}))
        .await;

    assert!(
        bridge
            .service
            .wait_for_status(9, SubmissionStatus::Aborted, WAIT)
            .await
    );
    assert!(bridge.dispatcher.assigned_to(9).is_none());

    bridge.shutdown().await;
}

#[tokio::test]
async fn terminating_a_queued_submission_just_drops_it() {
    let bridge = TestBridge::start().await;
    let mut frontend = FrontendClient::connect(bridge.control_addr).await;

    frontend
        .request(json!({
            "name": "submission-request",
            "submission-id": 11,
            "problem-id": "nobody-has-this",
            "language": "PY3",
            "source": "pass",
            "priority": 0,
        }))
        .await;
    assert!(bridge.dispatcher.is_queued(11));

    let reply = frontend
        .request(json!({"name": "terminate-submission", "submission-id": 11}))
        .await;
    assert_eq!(reply["judge-aborted"], false);
    assert!(!bridge.dispatcher.is_queued(11));

    bridge.shutdown().await;
}

#[tokio::test]
async fn judge_death_mid_grade_terminates_the_submission() {
    let bridge = TestBridge::start().await;
    let mut judge = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;
    let mut frontend = FrontendClient::connect(bridge.control_addr).await;

    frontend
        .request(json!({
            "name": "submission-request",
            "submission-id": 5,
            "problem-id": "aplusb",
            "language": "PY3",
            "source": "pass",
            "priority": 0,
        }))
        .await;
    judge.expect("submission-request").await;

    // The judge dies before it even confirms grading-begin.
    drop(judge);

    assert!(
        bridge
            .service
            .wait_for_status(5, SubmissionStatus::InternalError, WAIT)
            .await
    );
    // Exactly one terminal record, no spurious grading state.
    assert_eq!(
        bridge.service.statuses_for(5),
        vec![SubmissionStatus::InternalError]
    );

    let dispatcher = bridge.dispatcher.clone();
    assert!(wait_until(WAIT, || dispatcher.judge_names().is_empty()).await);
    assert_eq!(
        bridge.service.disconnected.lock().unwrap().as_slice(),
        ["j1".to_string()]
    );

    bridge.shutdown().await;
}

#[tokio::test]
async fn reconnecting_judge_replaces_the_old_session() {
    let bridge = TestBridge::start().await;

    let mut first = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;
    let _second = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;

    assert!(first.wait_closed().await);
    assert_eq!(bridge.dispatcher.judge_names(), vec!["j1"]);

    bridge.shutdown().await;
}

#[tokio::test]
async fn control_channel_rejects_bad_requests() {
    let bridge = TestBridge::start().await;
    let mut frontend = FrontendClient::connect(bridge.control_addr).await;

    let reply = frontend
        .request(json!({
            "name": "submission-request",
            "submission-id": 1,
            "problem-id": "aplusb",
            "language": "PY3",
            "source": "pass",
            "priority": 9,
        }))
        .await;
    assert_eq!(reply["name"], "bad-request");
    assert!(!bridge.dispatcher.is_queued(1));

    let reply = frontend.request(json!({"name": "no-such-request"})).await;
    assert_eq!(reply["name"], "bad-request");

    bridge.shutdown().await;
}

#[tokio::test]
async fn disable_judge_holds_work_until_reenabled() {
    let bridge = TestBridge::start().await;
    let mut judge = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;
    let mut frontend = FrontendClient::connect(bridge.control_addr).await;

    // Requests on one control connection are handled in order, so the
    // disable is applied before the submission arrives.
    frontend
        .send(json!({"name": "disable-judge", "judge-id": "j1", "is-disabled": true}))
        .await;
    frontend
        .request(json!({
            "name": "submission-request",
            "submission-id": 21,
            "problem-id": "aplusb",
            "language": "PY3",
            "source": "pass",
            "priority": 0,
        }))
        .await;
    assert!(bridge.dispatcher.is_queued(21));

    frontend
        .send(json!({"name": "disable-judge", "judge-id": "j1", "is-disabled": false}))
        .await;

    let dispatcher = bridge.dispatcher.clone();
    assert!(wait_until(WAIT, || dispatcher.assigned_to(21).is_some()).await);
    let request = judge.expect("submission-request").await;
    assert_eq!(request["submission-id"], 21);

    bridge.shutdown().await;
}

#[tokio::test]
async fn disconnect_judge_waits_for_the_current_submission() {
    let bridge = TestBridge::start().await;
    let mut judge = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;
    let mut frontend = FrontendClient::connect(bridge.control_addr).await;

    frontend
        .request(json!({
            "name": "submission-request",
            "submission-id": 3,
            "problem-id": "aplusb",
            "language": "PY3",
            "source": "pass",
            "priority": 0,
        }))
        .await;
    judge.expect("submission-request").await;
    judge
        .send(json!({"name": "grading-begin", "submission-id": 3}))
        .await;

    frontend
        .send(json!({"name": "disconnect-judge", "judge-id": "j1"}))
        .await;

    // Still connected while grading; the disconnect lands at grading-end.
    judge.expect("ping").await;
    assert_eq!(bridge.dispatcher.judge_names(), vec!["j1"]);

    judge
        .send(json!({
            "name": "grading-end",
            "submission-id": 3,
            "result": "AC",
        }))
        .await;
    assert!(judge.wait_closed().await);

    let dispatcher = bridge.dispatcher.clone();
    assert!(wait_until(WAIT, || dispatcher.judge_names().is_empty()).await);
    assert!(
        bridge
            .service
            .wait_for_status(3, SubmissionStatus::Graded, WAIT)
            .await
    );

    bridge.shutdown().await;
}

#[tokio::test]
async fn draining_judge_leaves_queued_work_for_the_next_one() {
    let bridge = TestBridge::start().await;
    let mut judge = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;
    let mut frontend = FrontendClient::connect(bridge.control_addr).await;

    frontend
        .request(json!({
            "name": "submission-request",
            "submission-id": 1,
            "problem-id": "aplusb",
            "language": "PY3",
            "source": "pass",
            "priority": 0,
        }))
        .await;
    judge.expect("submission-request").await;
    judge
        .send(json!({"name": "grading-begin", "submission-id": 1}))
        .await;

    // A second submission queues behind the busy judge, then a non-force
    // disconnect arrives.
    frontend
        .request(json!({
            "name": "submission-request",
            "submission-id": 2,
            "problem-id": "aplusb",
            "language": "PY3",
            "source": "pass",
            "priority": 0,
        }))
        .await;
    assert!(bridge.dispatcher.is_queued(2));
    frontend
        .send(json!({"name": "disconnect-judge", "judge-id": "j1"}))
        .await;
    // Same-connection round trip: once this reply arrives the disconnect
    // has reached the dispatcher, and the next ping means the judge's
    // connection loop has drained its command channel.
    frontend
        .request(json!({"name": "terminate-submission", "submission-id": 999}))
        .await;
    judge.expect("ping").await;

    judge
        .send(json!({
            "name": "grading-end",
            "submission-id": 1,
            "result": "AC",
        }))
        .await;
    assert!(judge.wait_closed().await);

    // The draining judge must not take the queued submission with it.
    let dispatcher = bridge.dispatcher.clone();
    assert!(wait_until(WAIT, || dispatcher.judge_names().is_empty()).await);
    assert!(bridge.dispatcher.is_queued(2));
    assert!(bridge.service.statuses_for(2).is_empty());

    let mut replacement = FakeJudge::connect(bridge.judge_addr, "j2", &["aplusb"]).await;
    let request = replacement.expect("submission-request").await;
    assert_eq!(request["submission-id"], 2);

    bridge.shutdown().await;
}

#[tokio::test]
async fn wrong_protocol_connections_are_dropped() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let bridge = TestBridge::start().await;

    let mut stream = tokio::net::TcpStream::connect(bridge.judge_addr)
        .await
        .unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(WAIT, stream.read(&mut buf)).await;
    assert_eq!(read.expect("bridge should close the socket").unwrap(), 0);

    bridge.shutdown().await;
}

#[tokio::test]
async fn shutdown_disconnects_connected_judges() {
    let bridge = TestBridge::start().await;
    let mut judge = FakeJudge::connect(bridge.judge_addr, "j1", &["aplusb"]).await;

    bridge.shutdown().await;
    assert!(judge.wait_closed().await);
}
