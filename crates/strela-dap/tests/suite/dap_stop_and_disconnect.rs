use serde_json::json;
use strela_config::DebuggeeConfig;
use strela_wire::mock::MockDebuggeeConfig;
use strela_wire::Command;
use tokio::time::timeout;

use super::{is_event, start, LaunchBehavior, MockLauncher, TIMEOUT};

#[tokio::test]
async fn breakpoint_hit_becomes_a_stopped_event() {
    let config = MockDebuggeeConfig {
        hit_on_start: true,
        ..MockDebuggeeConfig::default()
    };
    let (launcher, mut debuggees) = MockLauncher::new(LaunchBehavior::Connect(config), Vec::new());
    let (mut client, _server) = start(DebuggeeConfig::default(), launcher);
    let _mock = client.launch(&mut debuggees).await;

    client.request("configurationDone", json!({})).await;
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["threadId"], 0);

    // The stack is still answered after the stop.
    let stack = client.request("stackTrace", json!({ "threadId": 0 })).await;
    assert_eq!(stack["success"], true);
}

#[tokio::test]
async fn step_followed_by_hit_answers_then_stops() {
    let config = MockDebuggeeConfig {
        hit_after_step: true,
        chunk_size: Some(2),
        ..MockDebuggeeConfig::default()
    };
    let (launcher, mut debuggees) = MockLauncher::new(LaunchBehavior::Connect(config), Vec::new());
    let (mut client, _server) = start(DebuggeeConfig::default(), launcher);
    let _mock = client.launch(&mut debuggees).await;

    let next = client.request("next", json!({ "threadId": 0 })).await;
    assert_eq!(next["success"], true);
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
}

#[tokio::test]
async fn disconnect_detaches_and_ends_the_session() {
    let (launcher, mut debuggees) =
        MockLauncher::new(LaunchBehavior::Connect(MockDebuggeeConfig::default()), Vec::new());
    let (mut client, server) = start(DebuggeeConfig::default(), launcher);
    let mock = client.launch(&mut debuggees).await;

    let resp = client.request("disconnect", json!({})).await;
    assert_eq!(resp["success"], true);
    client.event("terminated").await;

    timeout(TIMEOUT, mock.finished()).await.unwrap();
    assert_eq!(mock.commands().await, vec![Command::Disconnect]);

    timeout(TIMEOUT, server).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn terminated_is_sent_once() {
    let (launcher, mut debuggees) =
        MockLauncher::new(LaunchBehavior::Connect(MockDebuggeeConfig::default()), Vec::new());
    let (mut client, server) = start(DebuggeeConfig::default(), launcher);
    let _mock = client.launch(&mut debuggees).await;

    let resp = client.request("disconnect", json!({})).await;
    assert_eq!(resp["success"], true);
    let server_result = timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert!(server_result.is_ok());

    let terminated = client
        .drain()
        .await
        .iter()
        .filter(|msg| is_event(msg, "terminated"))
        .count();
    assert_eq!(terminated, 1);
}

#[tokio::test]
async fn debuggee_exit_terminates_the_session() {
    let (launcher, mut debuggees) =
        MockLauncher::new(LaunchBehavior::Connect(MockDebuggeeConfig::default()), Vec::new());
    let (mut client, _server) = start(DebuggeeConfig::default(), launcher);
    let mock = client.launch(&mut debuggees).await;

    mock.close().await.unwrap();
    client.event("terminated").await;

    let stack = client.request("stackTrace", json!({ "threadId": 0 })).await;
    assert_eq!(stack["success"], false);
}
