//! Starting the debuggee process.

use std::process::Stdio;

use strela_config::DebuggeeConfig;
use strela_wire::{Result, WireError};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::{mpsc, oneshot},
};

/// What to run and where it should connect back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Loopback port the adapter is listening on.
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggeeOutput {
    Stdout(String),
    Stderr(String),
}

impl DebuggeeOutput {
    /// DAP `output` event category.
    pub fn category(&self) -> &'static str {
        match self {
            DebuggeeOutput::Stdout(_) => "stdout",
            DebuggeeOutput::Stderr(_) => "stderr",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            DebuggeeOutput::Stdout(text) | DebuggeeOutput::Stderr(text) => text,
        }
    }
}

/// A started debuggee. Both channels close when the process goes away.
#[derive(Debug)]
pub struct SpawnedDebuggee {
    /// Console output, one message per line (newline included).
    pub output: mpsc::UnboundedReceiver<DebuggeeOutput>,
    /// Resolves with the exit code once the process ends (`None` when killed
    /// by a signal).
    pub exited: oneshot::Receiver<Option<i32>>,
}

/// Starts debuggee processes.
pub trait Launcher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<SpawnedDebuggee>;
}

/// Runs `<executable> <debug_flag> <port> <program> <args...>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: String,
    debug_flag: String,
}

impl ProcessLauncher {
    pub fn new(executable: impl Into<String>, debug_flag: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            debug_flag: debug_flag.into(),
        }
    }

    pub fn from_config(config: &DebuggeeConfig) -> Self {
        Self::new(config.executable.clone(), config.debug_flag.clone())
    }

    pub fn command_line(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut argv = vec![
            self.executable.clone(),
            self.debug_flag.clone(),
            spec.port.to_string(),
            spec.program.clone(),
        ];
        argv.extend(spec.args.iter().cloned());
        argv
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<SpawnedDebuggee> {
        let argv = self.command_line(spec);
        tracing::info!(target: "strela.dap", command = ?argv, "launching debuggee");

        // stdout must never be inherited: it carries the DAP stream.
        let mut child = Command::new(&self.executable)
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                WireError::Launch(format!("failed to spawn {}: {err}", self.executable))
            })?;

        let (output_tx, output) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, output_tx.clone(), DebuggeeOutput::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, output_tx, DebuggeeOutput::Stderr));
        }

        let (exit_tx, exited) = oneshot::channel();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(err) => {
                    tracing::warn!(target: "strela.dap", error = %err, "failed to wait for debuggee");
                    None
                }
            };
            tracing::info!(target: "strela.dap", ?code, "debuggee exited");
            let _ = exit_tx.send(code);
        });

        Ok(SpawnedDebuggee { output, exited })
    }
}

async fn forward_lines<R>(
    stream: R,
    tx: mpsc::UnboundedSender<DebuggeeOutput>,
    wrap: fn(String) -> DebuggeeOutput,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(wrap(format!("{line}\n"))).is_err() {
            break;
        }
    }
}
