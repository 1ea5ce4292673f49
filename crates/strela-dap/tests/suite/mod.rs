mod dap_requests;
mod dap_stop_and_disconnect;

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{json, Value};
use strela_config::DebuggeeConfig;
use strela_dap::{
    dap_tokio::{DapReader, DapWriter},
    launch::{DebuggeeOutput, LaunchSpec, Launcher, SpawnedDebuggee},
    server,
};
use strela_wire::mock::{MockDebuggee, MockDebuggeeConfig};
use tokio::{
    io::{DuplexStream, ReadHalf, WriteHalf},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

pub(crate) const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub(crate) enum LaunchBehavior {
    /// Dial the adapter with a mock debuggee.
    Connect(MockDebuggeeConfig),
    /// Exit with this code without ever connecting.
    ExitWithoutConnecting(i32),
}

/// A [`Launcher`] that runs a [`MockDebuggee`] in-process instead of a
/// Strela runtime.
pub(crate) struct MockLauncher {
    behavior: LaunchBehavior,
    stderr: Vec<String>,
    specs: Mutex<Vec<LaunchSpec>>,
    debuggees: mpsc::UnboundedSender<MockDebuggee>,
}

impl MockLauncher {
    pub(crate) fn new(
        behavior: LaunchBehavior,
        stderr: Vec<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MockDebuggee>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let launcher = Arc::new(Self {
            behavior,
            stderr,
            specs: Mutex::new(Vec::new()),
            debuggees: tx,
        });
        (launcher, rx)
    }

    pub(crate) fn specs(&self) -> Vec<LaunchSpec> {
        self.specs.lock().unwrap().clone()
    }
}

impl Launcher for MockLauncher {
    fn launch(&self, spec: &LaunchSpec) -> strela_wire::Result<SpawnedDebuggee> {
        self.specs.lock().unwrap().push(spec.clone());

        let (output_tx, output) = mpsc::unbounded_channel();
        for line in &self.stderr {
            let _ = output_tx.send(DebuggeeOutput::Stderr(line.clone()));
        }
        let (exit_tx, exited) = oneshot::channel();

        match &self.behavior {
            LaunchBehavior::Connect(config) => {
                let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, spec.port));
                let config = config.clone();
                let debuggees = self.debuggees.clone();
                tokio::spawn(async move {
                    let mock = MockDebuggee::connect_with_config(addr, config)
                        .await
                        .expect("mock debuggee connects");
                    let _ = debuggees.send(mock);
                    // Keep the process "alive" for the rest of the test.
                    let _keep = (output_tx, exit_tx);
                    std::future::pending::<()>().await;
                });
            }
            LaunchBehavior::ExitWithoutConnecting(code) => {
                let _ = exit_tx.send(Some(*code));
            }
        }

        Ok(SpawnedDebuggee { output, exited })
    }
}

pub(crate) type ServerTask = JoinHandle<strela_dap::Result<()>>;

/// Editor side of a DAP session against an in-process adapter.
pub(crate) struct DapClient {
    reader: DapReader<ReadHalf<DuplexStream>>,
    writer: DapWriter<WriteHalf<DuplexStream>>,
    next_seq: i64,
    /// Messages read while waiting for something else.
    seen: Vec<Value>,
}

pub(crate) fn start(config: DebuggeeConfig, launcher: Arc<dyn Launcher>) -> (DapClient, ServerTask) {
    let (client, server_stream) = tokio::io::duplex(256 * 1024);
    let (server_read, server_write) = tokio::io::split(server_stream);
    let task = tokio::spawn(server::run_with_launcher(
        server_read,
        server_write,
        config,
        launcher,
    ));

    let (client_read, client_write) = tokio::io::split(client);
    let client = DapClient {
        reader: DapReader::new(client_read),
        writer: DapWriter::new(client_write),
        next_seq: 1,
        seen: Vec::new(),
    };
    (client, task)
}

pub(crate) fn is_event(msg: &Value, name: &str) -> bool {
    msg.get("type").and_then(Value::as_str) == Some("event")
        && msg.get("event").and_then(Value::as_str) == Some(name)
}

fn is_response_to(msg: &Value, seq: i64) -> bool {
    msg.get("type").and_then(Value::as_str) == Some("response")
        && msg.get("request_seq").and_then(Value::as_i64) == Some(seq)
}

impl DapClient {
    pub(crate) async fn send(&mut self, command: &str, arguments: Value) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let msg = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.writer.write_value(&msg).await.unwrap();
        seq
    }

    async fn read_next(&mut self) -> Value {
        timeout(TIMEOUT, self.reader.read_value())
            .await
            .expect("timed out waiting for the adapter")
            .unwrap()
            .expect("adapter closed the stream")
    }

    async fn wait_for(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        if let Some(pos) = self.seen.iter().position(&pred) {
            return self.seen.remove(pos);
        }
        loop {
            let msg = self.read_next().await;
            if pred(&msg) {
                return msg;
            }
            self.seen.push(msg);
        }
    }

    pub(crate) async fn response(&mut self, seq: i64) -> Value {
        self.wait_for(|msg| is_response_to(msg, seq)).await
    }

    pub(crate) async fn request(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.send(command, arguments).await;
        self.response(seq).await
    }

    pub(crate) async fn event(&mut self, name: &str) -> Value {
        self.wait_for(|msg| is_event(msg, name)).await
    }

    /// Everything not consumed yet, up to the end of the stream.
    pub(crate) async fn drain(mut self) -> Vec<Value> {
        let mut rest = std::mem::take(&mut self.seen);
        while let Ok(Ok(Some(msg))) = timeout(TIMEOUT, self.reader.read_value()).await {
            rest.push(msg);
        }
        rest
    }

    /// `initialize` + `launch`, returning the connected mock debuggee.
    pub(crate) async fn launch(
        &mut self,
        debuggees: &mut mpsc::UnboundedReceiver<MockDebuggee>,
    ) -> MockDebuggee {
        let init = self.request("initialize", json!({ "adapterID": "strela" })).await;
        assert_eq!(init["success"], true);

        let launch = self
            .request("launch", json!({ "program": "main.strela", "args": ["--fast"] }))
            .await;
        assert_eq!(launch["success"], true, "{launch}");
        self.event("initialized").await;

        timeout(TIMEOUT, debuggees.recv())
            .await
            .expect("timed out waiting for the mock debuggee")
            .expect("mock debuggee")
    }
}

/// Poll until the debuggee has received at least `n` commands.
pub(crate) async fn wait_for_commands(mock: &MockDebuggee, n: usize) -> Vec<strela_wire::Command> {
    timeout(TIMEOUT, async {
        loop {
            let commands = mock.commands().await;
            if commands.len() >= n {
                return commands;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for debuggee commands")
}
