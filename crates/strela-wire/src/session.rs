use crate::{
    client::{DebuggeeClient, PendingReply},
    command::Command,
    staging::BreakpointStaging,
    Result, WireError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

/// Outcome of [`DebuggeeSession::set_breakpoints`].
#[derive(Debug)]
pub enum BreakpointRequest {
    /// No debuggee yet; the lines are held and sent on connect.
    Staged(Vec<i64>),
    /// Sent as `ADD_ALL`; resolves to the accepted lines.
    Pending(PendingReply),
}

#[derive(Debug)]
enum State {
    Unconnected(BreakpointStaging),
    Connected(DebuggeeClient),
    Closed,
}

/// Connection lifecycle of one debug session.
///
/// `Unconnected -> Connected -> Closed`, each transition taken at most once.
/// Breakpoints set before the debuggee connects are staged and flushed ahead
/// of `START`.
#[derive(Debug)]
pub struct DebuggeeSession {
    state: State,
    execution_requested: bool,
    started: bool,
}

impl Default for DebuggeeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DebuggeeSession {
    pub fn new() -> Self {
        Self {
            state: State::Unconnected(BreakpointStaging::new()),
            execution_requested: false,
            started: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match &self.state {
            State::Unconnected(_) => ConnectionState::Unconnected,
            State::Connected(client) if client.is_closed() => ConnectionState::Closed,
            State::Connected(_) => ConnectionState::Connected,
            State::Closed => ConnectionState::Closed,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub async fn set_breakpoints(
        &mut self,
        path: impl Into<String>,
        lines: Vec<i64>,
    ) -> Result<BreakpointRequest> {
        match &mut self.state {
            State::Unconnected(staging) => {
                staging.stage(path, lines.clone());
                Ok(BreakpointRequest::Staged(lines))
            }
            State::Connected(client) => {
                let command = Command::AddAll {
                    path: path.into(),
                    lines,
                };
                match client.issue(command).await? {
                    Some(pending) => Ok(BreakpointRequest::Pending(pending)),
                    None => Err(WireError::ConnectionClosed),
                }
            }
            State::Closed => Err(WireError::NotConnected),
        }
    }

    /// Attach the debuggee and flush everything staged so far.
    ///
    /// Each staged path goes out once as `ADD_ALL_START`, in the order the
    /// paths were first staged. If execution was requested while unconnected,
    /// `START` follows the flush.
    pub async fn connect(&mut self, client: DebuggeeClient) -> Result<()> {
        let mut staging = match std::mem::replace(&mut self.state, State::Closed) {
            State::Unconnected(staging) => staging,
            other => {
                self.state = other;
                return Err(WireError::AlreadyConnected);
            }
        };

        let staged = staging.len();
        for (path, lines) in staging.drain() {
            client.add_all_start(path, lines).await?;
        }
        tracing::debug!(target: "strela.wire", staged, "flushed staged breakpoints");

        if self.execution_requested && !self.started {
            client.start().await?;
            self.started = true;
        }

        self.state = State::Connected(client);
        Ok(())
    }

    /// Let the debuggee run. Sends `START` at most once per session; before
    /// connect the request is remembered and honoured by [`Self::connect`].
    pub async fn begin_execution(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        match &self.state {
            State::Unconnected(_) => {
                self.execution_requested = true;
                Ok(())
            }
            State::Connected(client) => {
                client.start().await?;
                self.started = true;
                Ok(())
            }
            State::Closed => Err(WireError::NotConnected),
        }
    }

    pub async fn issue(&self, command: Command) -> Result<Option<PendingReply>> {
        match &self.state {
            State::Connected(client) => client.issue(command).await,
            State::Unconnected(_) | State::Closed => Err(WireError::NotConnected),
        }
    }

    /// Detach from the debuggee. Safe to call repeatedly.
    pub async fn disconnect(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Connected(client) if !client.is_closed() => client.disconnect().await,
            _ => Ok(()),
        }
    }
}
