//! Command correlation: matching asynchronous replies to outstanding
//! requests, deadline handling, and the documented same-name keying
//! limitation.

mod common;

use std::time::Duration;

use common::{connected_link, connected_link_with, test_options};
use devlink::{LinkError, Response};
use tokio_test::assert_ok;

#[tokio::test]
async fn ping_resolves_with_the_pong_payload() {
    let (link, _net) = connected_link().await;
    match link.send_command("ping", None).await.expect("ping") {
        Response::Pong { timestamp, uptime } => {
            assert_eq!(timestamp, 42);
            assert_eq!(uptime, 1000);
        }
        other => panic!("expected pong, got {:?}", other),
    }
    link.disconnect().await;
}

#[tokio::test]
async fn unanswered_command_times_out_and_removes_its_entry() {
    // No handler: the device stays silent.
    let (link, net) = connected_link_with(test_options()).await;
    let err = link
        .send_command_with_timeout("ping", None, Duration::from_millis(80))
        .await
        .expect_err("should time out");
    assert!(
        matches!(err, LinkError::CommandTimeout { ref command, .. } if command == "ping"),
        "got {:?}",
        err
    );
    assert_eq!(link.get_status().pending_commands, 0);

    // A late pong is merely unconsumed: no crash, still broadcast.
    let mut responses = link.subscribe_responses();
    net.inject(r#"{"type":"pong","timestamp":7,"uptime":9}"#);
    let late = tokio::time::timeout(Duration::from_millis(500), responses.recv())
        .await
        .expect("broadcast arrives")
        .expect("channel open");
    assert!(matches!(late, Response::Pong { .. }));
    assert_eq!(link.get_status().pending_commands, 0);
    link.disconnect().await;
}

#[tokio::test]
async fn second_same_name_call_replaces_the_first_pending_entry() {
    let (link, net) = connected_link_with(test_options()).await;
    let first_link = link.clone();
    let first = tokio::spawn(async move {
        first_link
            .send_command_with_timeout("ping", None, Duration::from_millis(500))
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let second_link = link.clone();
    let second = tokio::spawn(async move {
        second_link
            .send_command_with_timeout("ping", None, Duration::from_millis(500))
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    net.inject(r#"{"type":"pong","timestamp":1,"uptime":2}"#);

    let second_result = second.await.unwrap();
    assert!(second_result.is_ok(), "replacement call gets the reply");
    let first_result = first.await.unwrap();
    assert!(
        matches!(first_result, Err(LinkError::CommandTimeout { .. })),
        "clobbered call surfaces a timeout, got {:?}",
        first_result
    );
    link.disconnect().await;
}

#[tokio::test]
async fn commands_while_disconnected_are_rejected_immediately() {
    let net = common::MockNet::new();
    let link = devlink::DeviceLink::new(
        test_options(),
        std::sync::Arc::new(common::MockTransport(net)),
    );
    let err = link.send_command("ping", None).await.expect_err("not connected");
    assert!(matches!(err, LinkError::Disconnected));
}

#[tokio::test]
async fn wifi_scan_gets_its_extended_default_deadline_reply() {
    let (link, _net) = connected_link().await;
    let reply = assert_ok!(link.send_command("wifi_scan", None).await);
    match reply {
        Response::WifiScan { networks, count } => {
            assert_eq!(count, 1);
            assert_eq!(networks[0].ssid, "lab");
        }
        other => panic!("expected wifi_scan, got {:?}", other),
    }
    link.disconnect().await;
}
