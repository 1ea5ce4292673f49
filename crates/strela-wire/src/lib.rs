//! Strela debug wire protocol.
//!
//! The Strela runtime, when started with `--debug <port>`, connects back to the
//! adapter over TCP and speaks a newline-delimited text protocol: one field per
//! line, no length prefixes and no request identifiers. This crate turns that
//! stream into typed frames and pairs replies with the requests that caused
//! them purely by arrival order.
//!
//! Layers, leaves first:
//! - [`LineBuffer`] splits arbitrary byte chunks into complete lines.
//! - [`FrameDecoder`] claims whole messages from the line backlog.
//! - [`Correlator`] hands each reply to the oldest pending request.
//! - [`Command`] encodes outgoing operations.
//! - [`BreakpointStaging`] holds breakpoints set before the debuggee connects.
//! - [`DebuggeeListener`] accepts the single inbound debuggee connection.
//! - [`DebuggeeClient`] ties the above to a live stream (async, tokio).
//! - [`DebuggeeSession`] owns the connection lifecycle.

mod client;
mod codec;
mod command;
mod correlator;
mod poison;
mod session;
mod staging;
mod transport;
mod types;

// The mock debuggee is only needed for tests and downstream integration suites.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;

use std::io;

use thiserror::Error;

pub use client::{ClientConfig, DebuggeeClient, PendingReply};
pub use codec::{Decoded, FrameDecoder, LineBuffer};
pub use command::Command;
pub use correlator::{CorrelationError, Correlator};
pub use session::{BreakpointRequest, ConnectionState, DebuggeeSession};
pub use staging::BreakpointStaging;
pub use transport::DebuggeeListener;
pub use types::{
    AckKind, DebuggeeEvent, Frame, Reply, StackEntry, StopReason, Tag, ThreadEntry,
    VariableEntry, MAIN_THREAD_ID,
};

/// Upper bound for a single unterminated line held in the carry buffer.
///
/// The protocol has no framing besides newlines, so a peer that never sends
/// one would otherwise grow the buffer without limit.
pub const MAX_LINE_BYTES: usize = 1024 * 1024; // 1 MiB

/// Upper bound for complete lines waiting in the backlog.
///
/// Only an unfinished message keeps lines there, so this also bounds the
/// record count a reply may announce.
pub const MAX_BACKLOG_LINES: usize = 1024 * 1024;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("debuggee is not connected")]
    NotConnected,
    #[error("debuggee is already connected")]
    AlreadyConnected,
    #[error("debuggee connection closed")]
    ConnectionClosed,
    #[error("timed out waiting for the debuggee")]
    Timeout,
    #[error("debuggee line exceeds maximum size ({limit} bytes)")]
    LineTooLong { limit: usize },
    #[error("debuggee message exceeds maximum size ({limit} lines)")]
    BacklogFull { limit: usize },
    #[error("expected {expected} reply, debuggee sent {actual}")]
    UnexpectedReply { expected: Tag, actual: Tag },
    #[error("launch failed: {0}")]
    Launch(String),
}

/// Feed `input` through the line splitter and drain every decodable frame.
///
/// Used by the fuzz target; the only requirement is that it never panics or
/// loops forever on arbitrary bytes.
#[cfg(feature = "fuzzing")]
pub fn decode_stream_bytes(input: &[u8]) -> usize {
    let mut lines = LineBuffer::new();
    let mut frames = 0;
    for chunk in input.chunks(7) {
        let fed = lines.feed(chunk);
        loop {
            match lines.next_frame() {
                Decoded::NeedMoreData => break,
                Decoded::Frame(_) | Decoded::Unrecognized(_) => frames += 1,
            }
        }
        if fed.is_err() {
            break;
        }
    }
    frames
}
