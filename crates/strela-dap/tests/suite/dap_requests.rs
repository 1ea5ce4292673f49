use serde_json::json;
use strela_config::DebuggeeConfig;
use strela_wire::mock::MockDebuggeeConfig;
use strela_wire::Command;

use super::{start, wait_for_commands, LaunchBehavior, MockLauncher};

#[tokio::test]
async fn stack_trace_scopes_and_variables_round_trip() {
    let (launcher, mut debuggees) =
        MockLauncher::new(LaunchBehavior::Connect(MockDebuggeeConfig::default()), Vec::new());
    let (mut client, _server) = start(DebuggeeConfig::default(), launcher);
    let _mock = client.launch(&mut debuggees).await;

    let stack = client.request("stackTrace", json!({ "threadId": 0 })).await;
    assert_eq!(stack["success"], true, "{stack}");
    assert_eq!(stack["body"]["totalFrames"], 2);
    let frames = stack["body"]["stackFrames"].as_array().unwrap();
    assert_eq!(frames[0]["id"], 0);
    assert_eq!(frames[0]["name"], "main");
    assert_eq!(frames[0]["line"], 3);
    assert_eq!(frames[0]["column"], 0);
    assert_eq!(frames[0]["source"]["path"], "main.strela");
    assert_eq!(frames[1]["id"], 1);
    assert_eq!(frames[1]["source"]["name"], "lib.strela");

    let scopes = client.request("scopes", json!({ "frameId": 0 })).await;
    assert_eq!(scopes["body"]["scopes"][0]["name"], "Locals");
    assert_eq!(scopes["body"]["scopes"][0]["variablesReference"], 1);

    let vars = client
        .request("variables", json!({ "variablesReference": 1 }))
        .await;
    assert_eq!(
        vars["body"]["variables"],
        json!([{
            "name": "x",
            "type": "int",
            "presentationHint": { "kind": "data" },
            "value": "42",
            "variablesReference": 0,
        }])
    );
}

#[tokio::test]
async fn execution_control_round_trips_in_request_order() {
    let (launcher, mut debuggees) =
        MockLauncher::new(LaunchBehavior::Connect(MockDebuggeeConfig::default()), Vec::new());
    let (mut client, _server) = start(DebuggeeConfig::default(), launcher);
    let mock = client.launch(&mut debuggees).await;

    // Fire every request before reading any response.
    let mut seqs = Vec::new();
    for command in ["pause", "continue", "next", "stepIn", "stepOut"] {
        seqs.push(client.send(command, json!({ "threadId": 0 })).await);
    }
    for seq in seqs {
        let resp = client.response(seq).await;
        assert_eq!(resp["success"], true, "{resp}");
    }

    assert_eq!(
        wait_for_commands(&mock, 5).await,
        vec![
            Command::Pause,
            Command::Continue,
            Command::Step,
            Command::StepIn,
            Command::StepOut,
        ]
    );
}

#[tokio::test]
async fn threads_default_to_a_single_main_thread() {
    let (launcher, mut debuggees) =
        MockLauncher::new(LaunchBehavior::Connect(MockDebuggeeConfig::default()), Vec::new());
    let (mut client, _server) = start(DebuggeeConfig::default(), launcher);
    let mock = client.launch(&mut debuggees).await;

    let threads = client.request("threads", json!({})).await;
    assert_eq!(
        threads["body"]["threads"],
        json!([{ "id": 0, "name": "Main Thread" }])
    );
    assert!(mock.commands().await.is_empty());
}

#[tokio::test]
async fn threads_can_be_queried_from_the_debuggee() {
    let config = MockDebuggeeConfig {
        threads: vec!["main".to_string(), String::new()],
        ..MockDebuggeeConfig::default()
    };
    let (launcher, mut debuggees) = MockLauncher::new(LaunchBehavior::Connect(config), Vec::new());
    let adapter_config = DebuggeeConfig {
        query_threads: true,
        ..DebuggeeConfig::default()
    };
    let (mut client, _server) = start(adapter_config, launcher);
    let _mock = client.launch(&mut debuggees).await;

    let threads = client.request("threads", json!({})).await;
    assert_eq!(
        threads["body"]["threads"],
        json!([{ "id": 0, "name": "main" }, { "id": 1, "name": "Thread #2" }])
    );
}

#[tokio::test]
async fn requests_needing_the_debuggee_fail_before_launch() {
    let (launcher, _debuggees) =
        MockLauncher::new(LaunchBehavior::Connect(MockDebuggeeConfig::default()), Vec::new());
    let (mut client, _server) = start(DebuggeeConfig::default(), launcher);

    let stack = client.request("stackTrace", json!({ "threadId": 0 })).await;
    assert_eq!(stack["success"], false);
    assert_eq!(stack["message"], "debuggee is not connected");
}

#[tokio::test]
async fn evaluate_and_unknown_requests_succeed_without_effect() {
    let (launcher, _debuggees) =
        MockLauncher::new(LaunchBehavior::Connect(MockDebuggeeConfig::default()), Vec::new());
    let (mut client, _server) = start(DebuggeeConfig::default(), launcher);

    let eval = client.request("evaluate", json!({ "expression": "x" })).await;
    assert_eq!(eval["success"], true);

    let unknown = client.request("restartFrame", json!({})).await;
    assert_eq!(unknown["success"], true);
    assert!(unknown["message"]
        .as_str()
        .unwrap()
        .contains("unhandled request"));
}
