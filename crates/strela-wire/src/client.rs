use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::{broadcast, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{Decoded, LineBuffer},
    command::Command,
    correlator::Correlator,
    poison::lock,
    types::{
        DebuggeeEvent, Frame, Reply, StackEntry, StopReason, Tag, ThreadEntry, VariableEntry,
        MAIN_THREAD_ID,
    },
    Result, WireError,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on how long a caller waits for a reply. `None` waits until
    /// the reply arrives or the stream closes.
    ///
    /// A timeout only abandons the wait; the request keeps its queue slot so
    /// that its late reply is still paired with it and not with a newer one.
    pub reply_timeout: Option<Duration>,
    pub event_channel_size: usize,
    pub read_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reply_timeout: None,
            event_channel_size: 64,
            read_chunk_size: 8 * 1024,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Inner {
    writer: Mutex<BoxedWriter>,
    pending: StdMutex<Correlator>,
    events: broadcast::Sender<DebuggeeEvent>,
    shutdown: CancellationToken,
    /// Set (under the `pending` lock) once the stream has ended; no request
    /// may be enqueued afterwards.
    closed: AtomicBool,
    config: ClientConfig,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to a connected debuggee.
///
/// Cheap to clone; every clone shares the same stream and reply queue.
#[derive(Clone, Debug)]
pub struct DebuggeeClient {
    inner: Arc<Inner>,
}

/// A reply that has been requested but not yet received.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Reply>>,
    timeout: Option<Duration>,
}

impl PendingReply {
    pub async fn wait(self) -> Result<Reply> {
        let rx = self.rx;
        let recv = async move {
            match rx.await {
                Ok(result) => result,
                Err(_closed) => Err(WireError::ConnectionClosed),
            }
        };
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, recv)
                .await
                .map_err(|_| WireError::Timeout)?,
            None => recv.await,
        }
    }
}

impl DebuggeeClient {
    /// Start serving an established debuggee stream.
    ///
    /// Spawns the read loop onto the current tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, config: ClientConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (events, _) = broadcast::channel(config.event_channel_size.max(1));
        let inner = Arc::new(Inner {
            writer: Mutex::new(Box::new(writer)),
            pending: StdMutex::new(Correlator::new()),
            events,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone()));

        Self { inner }
    }

    pub fn from_tcp(stream: TcpStream, config: ClientConfig) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, config)
    }

    /// Stop the read loop. Pending requests fail with
    /// [`WireError::ConnectionClosed`] and a [`DebuggeeEvent::Terminated`] is
    /// broadcast.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// A token that is cancelled once the client shuts down, explicitly or
    /// because the debuggee closed the stream.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DebuggeeEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.pending, "DebuggeeClient::pending_requests").len()
    }

    /// Write `command`. For commands the debuggee answers, the returned
    /// [`PendingReply`] resolves with that answer; fire-and-forget commands
    /// return `None`.
    pub async fn issue(&self, command: Command) -> Result<Option<PendingReply>> {
        let expected = command.expected_reply();
        let encoded = command.encode();

        // The queue slot is taken while the writer is held so that queue order
        // is exactly write order, even with concurrent callers.
        let mut writer = self.inner.writer.lock().await;
        let rx = {
            let mut pending = lock(&self.inner.pending, "DebuggeeClient::issue");
            if self.is_closed() {
                return Err(WireError::ConnectionClosed);
            }
            expected.map(|tag| pending.enqueue(tag))
        };

        tracing::trace!(
            target: "strela.wire",
            command = command.keyword(),
            bytes = encoded.len(),
            "-> debuggee"
        );
        let written = async {
            writer.write_all(encoded.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            tracing::warn!(target: "strela.wire", error = %err, "write to debuggee failed");
            // A half-written command leaves the stream unusable.
            self.inner.shutdown.cancel();
            return Err(err.into());
        }

        Ok(rx.map(|rx| PendingReply {
            rx,
            timeout: self.inner.config.reply_timeout,
        }))
    }

    async fn request(&self, command: Command) -> Result<Reply> {
        let keyword = command.keyword();
        match self.issue(command).await? {
            Some(pending) => pending.wait().await,
            None => {
                tracing::error!(target: "strela.wire", command = keyword, "command has no reply");
                Err(WireError::ConnectionClosed)
            }
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.issue(command).await.map(|_| ())
    }

    pub async fn stack(&self) -> Result<Vec<StackEntry>> {
        match self.request(Command::Stack).await? {
            Reply::Stack(frames) => Ok(frames),
            other => Err(unexpected(Tag::Stack, &other)),
        }
    }

    pub async fn threads(&self) -> Result<Vec<ThreadEntry>> {
        match self.request(Command::Threads).await? {
            Reply::Threads(threads) => Ok(threads),
            other => Err(unexpected(Tag::Threads, &other)),
        }
    }

    pub async fn variables(&self, reference: i64) -> Result<Vec<VariableEntry>> {
        match self.request(Command::Variables { reference }).await? {
            Reply::Variables(vars) => Ok(vars),
            other => Err(unexpected(Tag::Variables, &other)),
        }
    }

    /// Replace the breakpoints of `path`; resolves to the accepted lines.
    pub async fn add_all(&self, path: impl Into<String>, lines: Vec<i64>) -> Result<Vec<i64>> {
        let command = Command::AddAll {
            path: path.into(),
            lines,
        };
        match self.request(command).await? {
            Reply::Breakpoints(accepted) => Ok(accepted),
            other => Err(unexpected(Tag::AddAll, &other)),
        }
    }

    pub async fn add(&self, path: impl Into<String>, line: i64) -> Result<()> {
        let command = Command::Add {
            path: path.into(),
            line,
        };
        self.request(command).await.map(|_| ())
    }

    pub async fn remove(&self, path: impl Into<String>, line: i64) -> Result<()> {
        let command = Command::Remove {
            path: path.into(),
            line,
        };
        self.request(command).await.map(|_| ())
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await.map(|_| ())
    }

    pub async fn continue_(&self) -> Result<()> {
        self.request(Command::Continue).await.map(|_| ())
    }

    pub async fn step(&self) -> Result<()> {
        self.request(Command::Step).await.map(|_| ())
    }

    pub async fn step_in(&self) -> Result<()> {
        self.request(Command::StepIn).await.map(|_| ())
    }

    pub async fn step_out(&self) -> Result<()> {
        self.request(Command::StepOut).await.map(|_| ())
    }

    pub async fn add_all_start(&self, path: impl Into<String>, lines: Vec<i64>) -> Result<()> {
        self.send(Command::AddAllStart {
            path: path.into(),
            lines,
        })
        .await
    }

    pub async fn start(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    /// Tell the debuggee to detach, then close our side of the stream.
    pub async fn disconnect(&self) -> Result<()> {
        let sent = self.send(Command::Disconnect).await;
        {
            let mut writer = self.inner.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        self.shutdown();
        sent
    }
}

fn unexpected(expected: Tag, reply: &Reply) -> WireError {
    WireError::UnexpectedReply {
        expected,
        actual: reply.tag(),
    }
}

async fn read_loop<R>(mut reader: R, inner: Arc<Inner>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineBuffer::new();
    let mut buf = vec![0u8; inner.config.read_chunk_size.max(1)];

    loop {
        let read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read(&mut buf) => res,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(target: "strela.wire", error = %err, "debuggee read failed");
                break;
            }
        };

        // Lines completed before a failure are already committed and still
        // get dispatched.
        let fed = lines.feed(&buf[..n]);
        dispatch_frames(&inner, &mut lines);
        if let Err(err) = fed {
            tracing::error!(target: "strela.wire", error = %err, "dropping debuggee stream");
            break;
        }
    }

    close(&inner);
}

fn dispatch_frames(inner: &Inner, lines: &mut LineBuffer) {
    loop {
        match lines.next_frame() {
            Decoded::NeedMoreData => break,
            Decoded::Frame(Frame::Hit) => {
                tracing::debug!(target: "strela.wire", "breakpoint hit");
                let _ = inner.events.send(DebuggeeEvent::Stopped {
                    reason: StopReason::Breakpoint,
                    thread_id: MAIN_THREAD_ID,
                });
            }
            Decoded::Frame(Frame::Reply(reply)) => {
                tracing::trace!(target: "strela.wire", tag = %reply.tag(), "<- debuggee");
                let completed = lock(&inner.pending, "read_loop").complete(reply);
                if let Err(err) = completed {
                    tracing::warn!(target: "strela.wire", error = %err, "dropping reply");
                    let _ = inner.events.send(DebuggeeEvent::ProtocolError(err.to_string()));
                }
            }
            Decoded::Unrecognized(line) => {
                tracing::warn!(target: "strela.wire", line = %line, "unrecognized debuggee message");
                let _ = inner.events.send(DebuggeeEvent::ProtocolError(format!(
                    "unrecognized debuggee message: {line:?}"
                )));
            }
        }
    }
}

fn close(inner: &Inner) {
    let failed = {
        let mut pending = lock(&inner.pending, "read_loop::close");
        inner.closed.store(true, Ordering::Release);
        pending.fail_all()
    };
    inner.shutdown.cancel();
    tracing::debug!(target: "strela.wire", failed, "debuggee stream closed");
    let _ = inner.events.send(DebuggeeEvent::Terminated);
}
