use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::Arc,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use crate::{
    command::Command,
    types::{StackEntry, VariableEntry},
};

/// Canned debuggee behaviour.
#[derive(Clone, Debug)]
pub struct MockDebuggeeConfig {
    /// Answer to every `STACK`.
    pub stack: Vec<StackEntry>,
    /// Answer to `VARIABLES <reference>`, keyed by reference. Unknown
    /// references answer with no variables.
    pub variables: HashMap<i64, Vec<VariableEntry>>,
    /// Thread names for `THREADS`. Empty names are sent as-is.
    pub threads: Vec<String>,
    /// Emit `HIT` right after `START`.
    pub hit_on_start: bool,
    /// Emit `HIT` after each step acknowledgement.
    pub hit_after_step: bool,
    /// Write every outgoing message in chunks of this many bytes, to exercise
    /// reassembly on the reading side.
    pub chunk_size: Option<usize>,
    /// When false, commands are only recorded; replies must be scripted with
    /// [`MockDebuggee::send_raw`].
    pub auto_reply: bool,
}

impl Default for MockDebuggeeConfig {
    fn default() -> Self {
        Self {
            stack: vec![
                StackEntry {
                    file: "main.strela".to_string(),
                    line: 3,
                    name: "main".to_string(),
                },
                StackEntry {
                    file: "lib.strela".to_string(),
                    line: 12,
                    name: "helper".to_string(),
                },
            ],
            variables: HashMap::from([(
                1,
                vec![VariableEntry {
                    name: "x".to_string(),
                    type_name: "int".to_string(),
                    kind: "data".to_string(),
                    value: "42".to_string(),
                    reference: 0,
                }],
            )]),
            threads: vec!["main".to_string()],
            hit_on_start: false,
            hit_after_step: false,
            chunk_size: None,
            auto_reply: true,
        }
    }
}

/// A scripted stand-in for the Strela runtime.
///
/// Like the real runtime it dials the adapter's listener, then parses every
/// command it receives, records it and answers from [`MockDebuggeeConfig`].
pub struct MockDebuggee {
    state: Arc<State>,
    finished: CancellationToken,
}

struct State {
    writer: Mutex<OwnedWriteHalf>,
    commands: Mutex<Vec<Command>>,
    config: MockDebuggeeConfig,
}

impl MockDebuggee {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        Self::connect_with_config(addr, MockDebuggeeConfig::default()).await
    }

    pub async fn connect_with_config(
        addr: SocketAddr,
        config: MockDebuggeeConfig,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let state = Arc::new(State {
            writer: Mutex::new(writer),
            commands: Mutex::new(Vec::new()),
            config,
        });
        let finished = CancellationToken::new();

        tokio::spawn(serve(reader, state.clone(), finished.clone()));

        Ok(Self { state, finished })
    }

    /// Every command received so far, in arrival order.
    pub async fn commands(&self) -> Vec<Command> {
        self.state.commands.lock().await.clone()
    }

    /// Write bytes to the adapter verbatim.
    pub async fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        self.state.write(bytes).await
    }

    /// Close the debuggee's side of the stream, as if the process exited.
    pub async fn close(&self) -> io::Result<()> {
        self.state.writer.lock().await.shutdown().await
    }

    /// Resolves once the adapter sent `DISCONNECT` or closed the stream.
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }
}

impl State {
    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        match self.config.chunk_size {
            Some(size) => {
                for chunk in bytes.chunks(size.max(1)) {
                    writer.write_all(chunk).await?;
                    writer.flush().await?;
                    tokio::task::yield_now().await;
                }
            }
            None => writer.write_all(bytes).await?,
        }
        writer.flush().await
    }

    fn reply_to(&self, command: &Command) -> String {
        let config = &self.config;
        let mut out = String::new();
        if !config.auto_reply {
            return out;
        }
        match command {
            Command::AddAllStart { .. } | Command::Disconnect => {}
            Command::Start => {
                if config.hit_on_start {
                    out.push_str("HIT\n");
                }
            }
            Command::AddAll { lines, .. } => {
                out.push_str(&format!("ACK_ADD_ALL\n{}\n", lines.len()));
                for line in lines {
                    out.push_str(&format!("{line}\n"));
                }
            }
            Command::Add { .. } => out.push_str("ACK_ADD\n"),
            Command::Remove { .. } => out.push_str("ACK_REMOVE\n"),
            Command::Threads => {
                out.push_str(&format!("ACK_THREADS\n{}\n", config.threads.len()));
                for name in &config.threads {
                    out.push_str(&format!("{name}\n"));
                }
            }
            Command::Stack => {
                out.push_str(&format!("ACK_STACK\n{}\n", config.stack.len()));
                for frame in &config.stack {
                    out.push_str(&format!("{}\n{}\n{}\n", frame.file, frame.line, frame.name));
                }
            }
            Command::Variables { reference } => {
                let vars = config
                    .variables
                    .get(reference)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                out.push_str(&format!("ACK_VARIABLES\n{}\n", vars.len()));
                for var in vars {
                    out.push_str(&format!(
                        "{}\n{}\n{}\n{}\n{}\n",
                        var.name, var.type_name, var.kind, var.value, var.reference
                    ));
                }
            }
            Command::Pause => out.push_str("ACK_PAUSE\n"),
            Command::Continue => out.push_str("ACK_CONTINUE\n"),
            Command::Step | Command::StepIn | Command::StepOut => {
                out.push_str(match command {
                    Command::StepIn => "ACK_STEPIN\n",
                    Command::StepOut => "ACK_STEPOUT\n",
                    _ => "ACK_STEP\n",
                });
                if config.hit_after_step {
                    out.push_str("HIT\n");
                }
            }
        }
        out
    }
}

async fn serve(reader: OwnedReadHalf, state: Arc<State>, finished: CancellationToken) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let command = match read_command(&mut lines).await {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(target: "strela.wire", error = %err, "mock debuggee stopped reading");
                break;
            }
        };

        state.commands.lock().await.push(command.clone());
        let reply = state.reply_to(&command);
        if !reply.is_empty() && state.write(reply.as_bytes()).await.is_err() {
            break;
        }
        if command == Command::Disconnect {
            break;
        }
    }
    finished.cancel();
}

async fn read_command(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> io::Result<Option<Command>> {
    let Some(keyword) = lines.next_line().await? else {
        return Ok(None);
    };

    let command = match keyword.as_str() {
        "ADD_ALL_START" | "ADD_ALL" => {
            let count: usize = parse(&field(lines).await?)?;
            let path = field(lines).await?;
            let mut bp_lines = Vec::with_capacity(count);
            for _ in 0..count {
                bp_lines.push(parse(&field(lines).await?)?);
            }
            if keyword == "ADD_ALL" {
                Command::AddAll {
                    path,
                    lines: bp_lines,
                }
            } else {
                Command::AddAllStart {
                    path,
                    lines: bp_lines,
                }
            }
        }
        "ADD" | "REMOVE" => {
            let path = field(lines).await?;
            let line = parse(&field(lines).await?)?;
            if keyword == "ADD" {
                Command::Add { path, line }
            } else {
                Command::Remove { path, line }
            }
        }
        "VARIABLES" => Command::Variables {
            reference: parse(&field(lines).await?)?,
        },
        "START" => Command::Start,
        "THREADS" => Command::Threads,
        "STACK" => Command::Stack,
        "PAUSE" => Command::Pause,
        "CONTINUE" => Command::Continue,
        "STEP" => Command::Step,
        "STEPIN" => Command::StepIn,
        "STEPOUT" => Command::StepOut,
        "DISCONNECT" => Command::Disconnect,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown command {other:?}"),
            ))
        }
    };
    Ok(Some(command))
}

async fn field(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> io::Result<String> {
    lines
        .next_line()
        .await?
        .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
}

fn parse<T: std::str::FromStr>(field: &str) -> io::Result<T> {
    field
        .trim()
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("bad number {field:?}")))
}
