use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
};

use serde_json::{json, Value};
use strela_config::DebuggeeConfig;
use strela_wire::{
    BreakpointRequest, ClientConfig, Command, ConnectionState, DebuggeeClient, DebuggeeEvent,
    DebuggeeListener, DebuggeeSession, PendingReply, Reply, WireError, MAIN_THREAD_ID,
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    dap_tokio::{make_event, make_response, DapReader, DapWriter, Request},
    launch::{LaunchSpec, Launcher, ProcessLauncher},
    Result, ServerError,
};

/// Message shown when the debuggee never connects.
pub const LAUNCH_FAILED_MESSAGE: &str = "Error launching program.";

/// Run the adapter over stdio.
pub async fn run_stdio(config: DebuggeeConfig) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run(stdin, stdout, config).await.map_err(anyhow::Error::from)
}

/// Serve one debug session, launching debuggees as real processes.
pub async fn run<R, W>(reader: R, writer: W, config: DebuggeeConfig) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let launcher = Arc::new(ProcessLauncher::from_config(&config));
    run_with_launcher(reader, writer, config, launcher).await
}

/// Serve one debug session with a custom [`Launcher`].
pub async fn run_with_launcher<R, W>(
    reader: R,
    writer: W,
    config: DebuggeeConfig,
    launcher: Arc<dyn Launcher>,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let out = DapOutput::new(out_tx);

    let writer_task = tokio::spawn(async move {
        let mut writer = DapWriter::new(writer);
        while let Some(msg) = out_rx.recv().await {
            if let Err(err) = writer.write_value(&msg).await {
                tracing::warn!(target: "strela.dap", error = %err, "failed to write DAP message");
                break;
            }
        }
    });

    // Requests are read on their own task so the loop below can also react to
    // the debuggee without cancelling a half-read message.
    let (req_tx, mut req_rx) = mpsc::unbounded_channel();
    let reader_trace = out.trace.clone();
    let reader_task = tokio::spawn(async move {
        let mut reader = DapReader::new(reader);
        loop {
            let next = reader.read_request().await;
            if let Ok(Some(request)) = &next {
                if reader_trace.load(Ordering::Relaxed) {
                    tracing::debug!(
                        target: "strela.dap.protocol",
                        seq = request.seq,
                        command = %request.command,
                        arguments = %request.arguments,
                        "<- request"
                    );
                }
            }
            let done = !matches!(next, Ok(Some(_)));
            if req_tx.send(next).is_err() || done {
                break;
            }
        }
    });

    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel();
    let mut server = Server {
        config,
        launcher,
        out: out.clone(),
        session: DebuggeeSession::new(),
        launch: None,
        internal: internal_tx,
        shutdown: CancellationToken::new(),
    };

    let result = loop {
        tokio::select! {
            next = req_rx.recv() => match next {
                Some(Ok(Some(request))) => {
                    if request.message_type != "request" {
                        continue;
                    }
                    if server.handle_request(request).await == Flow::Stop {
                        break Ok(());
                    }
                }
                Some(Ok(None)) | None => break Ok(()),
                Some(Err(err)) => break Err(ServerError::from(err)),
            },
            Some(internal) = internal_rx.recv() => server.handle_internal(internal).await,
        }
    };

    server.finish().await;
    reader_task.abort();
    drop(server);
    drop(out);
    let _ = writer_task.await;
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Progress of a launch request, reported back to the request loop.
#[derive(Debug)]
enum Internal {
    Accepted(std::result::Result<TcpStream, WireError>),
    Exited(Option<i32>),
}

struct PendingLaunch {
    request: Request,
    accept_task: JoinHandle<()>,
}

struct Server {
    config: DebuggeeConfig,
    launcher: Arc<dyn Launcher>,
    out: DapOutput,
    session: DebuggeeSession,
    /// Set while a launch request waits for the debuggee to connect.
    launch: Option<PendingLaunch>,
    internal: mpsc::UnboundedSender<Internal>,
    shutdown: CancellationToken,
}

impl Server {
    async fn handle_request(&mut self, request: Request) -> Flow {
        tracing::debug!(target: "strela.dap", command = %request.command, seq = request.seq, "request");
        let command = request.command.clone();
        match command.as_str() {
            "initialize" => {
                let body = json!({
                    "supportsConfigurationDoneRequest": true,
                    "supportsEvaluateForHovers": false,
                    "supportsStepBack": false,
                });
                self.out.respond(&request, true, Some(body), None);
            }
            "launch" => self.launch(request).await,
            "setBreakpoints" => self.set_breakpoints(request).await,
            "configurationDone" => match self.session.begin_execution().await {
                Ok(()) => self.out.respond(&request, true, None, None),
                Err(err) => self.out.fail(&request, err),
            },
            "threads" => {
                if self.config.query_threads {
                    self.forward(request, Command::Threads, |reply| match reply {
                        Reply::Threads(threads) => {
                            let threads: Vec<Value> = threads
                                .into_iter()
                                .enumerate()
                                .map(|(id, thread)| json!({ "id": id, "name": thread.name }))
                                .collect();
                            Some(json!({ "threads": threads }))
                        }
                        _ => None,
                    })
                    .await;
                } else {
                    let body = json!({
                        "threads": [{ "id": MAIN_THREAD_ID, "name": self.config.main_thread_name }],
                    });
                    self.out.respond(&request, true, Some(body), None);
                }
            }
            "stackTrace" => {
                self.forward(request, Command::Stack, |reply| match reply {
                    Reply::Stack(frames) => {
                        let total = frames.len();
                        let frames: Vec<Value> = frames
                            .into_iter()
                            .enumerate()
                            .map(|(id, frame)| {
                                json!({
                                    "id": id,
                                    "name": frame.name,
                                    "source": { "name": frame.file, "path": frame.file },
                                    "line": frame.line,
                                    "column": 0,
                                })
                            })
                            .collect();
                        Some(json!({ "stackFrames": frames, "totalFrames": total }))
                    }
                    _ => None,
                })
                .await;
            }
            "scopes" => {
                let frame_id = request
                    .arguments
                    .get("frameId")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let body = json!({
                    "scopes": [{
                        "name": "Locals",
                        "variablesReference": frame_id.saturating_add(1),
                        "expensive": false,
                    }],
                });
                self.out.respond(&request, true, Some(body), None);
            }
            "variables" => {
                let reference = request
                    .arguments
                    .get("variablesReference")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                self.forward(request, Command::Variables { reference }, |reply| match reply {
                    Reply::Variables(vars) => {
                        let vars: Vec<Value> = vars
                            .into_iter()
                            .map(|var| {
                                json!({
                                    "name": var.name,
                                    "type": var.type_name,
                                    "presentationHint": { "kind": var.kind },
                                    "value": var.value,
                                    "variablesReference": var.reference,
                                })
                            })
                            .collect();
                        Some(json!({ "variables": vars }))
                    }
                    _ => None,
                })
                .await;
            }
            "pause" => self.forward(request, Command::Pause, |_| None).await,
            "continue" => self.forward(request, Command::Continue, |_| None).await,
            "next" => self.forward(request, Command::Step, |_| None).await,
            "stepIn" => self.forward(request, Command::StepIn, |_| None).await,
            "stepOut" => self.forward(request, Command::StepOut, |_| None).await,
            "evaluate" => self.out.respond(&request, true, None, None),
            "disconnect" => {
                if let Err(err) = self.session.disconnect().await {
                    tracing::warn!(target: "strela.dap", error = %err, "disconnect failed");
                }
                self.out.respond(&request, true, None, None);
                self.out.terminated();
                return Flow::Stop;
            }
            _ => {
                self.out.respond(
                    &request,
                    true,
                    None,
                    Some(format!("unhandled request {}", request.command)),
                );
            }
        }
        Flow::Continue
    }

    async fn launch(&mut self, request: Request) {
        if self.launch.is_some() || self.session.state() != ConnectionState::Unconnected {
            self.out.respond(&request, false, None, Some("already launched".to_string()));
            return;
        }

        let args = &request.arguments;
        let Some(program) = args.get("program").and_then(Value::as_str) else {
            let err = ServerError::InvalidRequest("launch.program is required".to_string());
            self.out.respond(&request, false, None, Some(err.to_string()));
            return;
        };
        let program_args: Vec<String> = args
            .get("args")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|arg| arg.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        if args.get("stopOnEntry").and_then(Value::as_bool) == Some(true) {
            tracing::debug!(target: "strela.dap", "stopOnEntry requested; the debuggee has no entry stop");
        }
        if args.get("trace").and_then(Value::as_bool) == Some(true) {
            self.out.trace.store(true, Ordering::Relaxed);
        }

        let listener = match self.bind_listener().await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(target: "strela.dap", error = %err, "failed to bind debuggee listener");
                self.out.respond(&request, false, None, Some(LAUNCH_FAILED_MESSAGE.to_string()));
                return;
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(err) => {
                tracing::warn!(target: "strela.dap", error = %err, "debuggee listener has no address");
                self.out.respond(&request, false, None, Some(LAUNCH_FAILED_MESSAGE.to_string()));
                return;
            }
        };

        let spec = LaunchSpec {
            program: program.to_owned(),
            args: program_args,
            port,
        };
        let spawned = match self.launcher.launch(&spec) {
            Ok(spawned) => spawned,
            Err(err) => {
                tracing::warn!(target: "strela.dap", error = %err, "launch failed");
                self.out.respond(&request, false, None, Some(LAUNCH_FAILED_MESSAGE.to_string()));
                return;
            }
        };

        let mut output = spawned.output;
        let out = self.out.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = output.recv() => next,
                };
                let Some(line) = next else { break };
                out.output(line.category(), line.text());
            }
        });

        let internal = self.internal.clone();
        let exited = spawned.exited;
        tokio::spawn(async move {
            if let Ok(code) = exited.await {
                let _ = internal.send(Internal::Exited(code));
            }
        });

        let internal = self.internal.clone();
        let timeout = self.config.connect_timeout();
        let accept_task = tokio::spawn(async move {
            let accepted = listener.accept(timeout).await;
            let _ = internal.send(Internal::Accepted(accepted));
        });

        self.launch = Some(PendingLaunch {
            request,
            accept_task,
        });
    }

    async fn bind_listener(&self) -> strela_wire::Result<DebuggeeListener> {
        let host: IpAddr = self
            .config
            .bind_host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        DebuggeeListener::bind(SocketAddr::new(host, 0)).await
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Accepted(Ok(stream)) => {
                let Some(launch) = self.launch.take() else {
                    tracing::warn!(target: "strela.dap", "unexpected debuggee connection; dropping it");
                    return;
                };
                let client = DebuggeeClient::from_tcp(
                    stream,
                    ClientConfig {
                        reply_timeout: self.config.reply_timeout(),
                        ..ClientConfig::default()
                    },
                );
                // Subscribe before any command goes out so no stop is missed.
                spawn_event_task(client.subscribe_events(), self.out.clone(), self.shutdown.clone());

                match self.session.connect(client).await {
                    Ok(()) => {
                        tracing::info!(target: "strela.dap", "debuggee connected");
                        self.out.respond(&launch.request, true, None, None);
                        self.out.event("initialized", None);
                    }
                    Err(err) => {
                        tracing::warn!(target: "strela.dap", error = %err, "failed to attach debuggee");
                        self.out.respond(
                            &launch.request,
                            false,
                            None,
                            Some(LAUNCH_FAILED_MESSAGE.to_string()),
                        );
                    }
                }
            }
            Internal::Accepted(Err(err)) => {
                if let Some(launch) = self.launch.take() {
                    tracing::warn!(target: "strela.dap", error = %err, "debuggee did not connect");
                    self.out.respond(
                        &launch.request,
                        false,
                        None,
                        Some(LAUNCH_FAILED_MESSAGE.to_string()),
                    );
                }
            }
            Internal::Exited(code) => {
                if let Some(launch) = self.launch.take() {
                    tracing::warn!(target: "strela.dap", ?code, "debuggee exited before connecting");
                    launch.accept_task.abort();
                    self.out.respond(
                        &launch.request,
                        false,
                        Some(json!({ "exitCode": code })),
                        Some(LAUNCH_FAILED_MESSAGE.to_string()),
                    );
                } else {
                    tracing::debug!(target: "strela.dap", ?code, "debuggee process exited");
                }
            }
        }
    }

    async fn set_breakpoints(&mut self, request: Request) {
        let path = request
            .arguments
            .get("source")
            .and_then(|source| source.get("path"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();
        let lines: Vec<i64> = request
            .arguments
            .get("breakpoints")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|bp| bp.get("line").and_then(Value::as_i64))
                    .collect()
            })
            .unwrap_or_default();

        match self.session.set_breakpoints(path, lines).await {
            Ok(BreakpointRequest::Staged(lines)) => {
                let breakpoints: Vec<Value> = lines
                    .into_iter()
                    .map(|line| json!({ "verified": false, "line": line, "message": "pending" }))
                    .collect();
                self.out
                    .respond(&request, true, Some(json!({ "breakpoints": breakpoints })), None);
            }
            Ok(BreakpointRequest::Pending(pending)) => {
                self.await_reply(request, pending, |reply| match reply {
                    Reply::Breakpoints(accepted) => {
                        let breakpoints: Vec<Value> = accepted
                            .into_iter()
                            .map(|line| json!({ "verified": true, "line": line }))
                            .collect();
                        Some(json!({ "breakpoints": breakpoints }))
                    }
                    _ => None,
                });
            }
            Err(err) => self.out.fail(&request, err),
        }
    }

    /// Write `command` now and answer `request` once its reply arrives.
    ///
    /// The write happens inline so commands reach the debuggee in request
    /// order; only the wait runs in the background.
    async fn forward<F>(&self, request: Request, command: Command, render: F)
    where
        F: FnOnce(Reply) -> Option<Value> + Send + 'static,
    {
        match self.session.issue(command).await {
            Ok(Some(pending)) => self.await_reply(request, pending, render),
            Ok(None) => self.out.respond(&request, true, None, None),
            Err(err) => self.out.fail(&request, err),
        }
    }

    fn await_reply<F>(&self, request: Request, pending: PendingReply, render: F)
    where
        F: FnOnce(Reply) -> Option<Value> + Send + 'static,
    {
        let out = self.out.clone();
        tokio::spawn(async move {
            match pending.wait().await {
                Ok(reply) => {
                    let body = render(reply);
                    out.respond(&request, true, body, None);
                }
                Err(err) => out.fail(&request, err),
            }
        });
    }

    async fn finish(&mut self) {
        if let Some(launch) = self.launch.take() {
            launch.accept_task.abort();
        }
        if let Err(err) = self.session.disconnect().await {
            tracing::debug!(target: "strela.dap", error = %err, "disconnect on shutdown failed");
        }
        self.shutdown.cancel();
    }
}

fn spawn_event_task(
    mut events: broadcast::Receiver<DebuggeeEvent>,
    out: DapOutput,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Ok(DebuggeeEvent::Stopped { reason, thread_id }) => out.event(
                    "stopped",
                    Some(json!({
                        "reason": reason.as_dap_reason(),
                        "threadId": thread_id,
                        "allThreadsStopped": true,
                    })),
                ),
                Ok(DebuggeeEvent::ProtocolError(message)) => {
                    out.output("console", &format!("strela-dap: {message}\n"));
                }
                Ok(DebuggeeEvent::Terminated) | Err(broadcast::error::RecvError::Closed) => {
                    out.terminated();
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "strela.dap", skipped, "dropped debuggee events");
                }
            }
        }
    });
}

/// Outgoing half of the DAP connection, shared by the request loop and the
/// background tasks.
#[derive(Clone)]
struct DapOutput {
    tx: mpsc::UnboundedSender<Value>,
    seq: Arc<AtomicI64>,
    trace: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
}

impl DapOutput {
    fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            tx,
            seq: Arc::new(AtomicI64::new(1)),
            trace: Arc::new(AtomicBool::new(false)),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, value: Value) {
        if self.trace.load(Ordering::Relaxed) {
            tracing::debug!(target: "strela.dap.protocol", message = %value, "-> message");
        }
        let _ = self.tx.send(value);
    }

    fn respond(&self, request: &Request, success: bool, body: Option<Value>, message: Option<String>) {
        let response = make_response(self.next_seq(), request, success, body, message);
        self.send(serde_json::to_value(response).unwrap_or_else(|_| json!({})));
    }

    fn fail(&self, request: &Request, err: WireError) {
        tracing::debug!(target: "strela.dap", command = %request.command, error = %err, "request failed");
        self.respond(request, false, None, Some(err.to_string()));
    }

    fn event(&self, event: &str, body: Option<Value>) {
        let event = make_event(self.next_seq(), event, body);
        self.send(serde_json::to_value(event).unwrap_or_else(|_| json!({})));
    }

    fn output(&self, category: &str, text: &str) {
        self.event("output", Some(json!({ "category": category, "output": text })));
    }

    /// Send `terminated` unless it has been sent already.
    fn terminated(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            self.event("terminated", None);
        }
    }
}
