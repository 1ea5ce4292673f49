use std::collections::VecDeque;

use crate::types::{Frame, Layout, RecordKind, Reply, StackEntry, Tag, ThreadEntry, VariableEntry};
use crate::{Result, WireError, MAX_BACKLOG_LINES, MAX_LINE_BYTES};

/// Accumulates raw bytes and splits them into complete lines.
///
/// Bytes after the last newline stay in the carry buffer until a later chunk
/// terminates them, so a line is reported exactly once and only when whole.
/// Lines are decoded as UTF-8 only after they are complete; a multi-byte
/// character split across two chunks is reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: Vec<u8>,
    backlog: VecDeque<String>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and move every completed line to the backlog.
    ///
    /// Returns the number of lines committed by this call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<usize> {
        let mut committed = 0;
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.check_len(pos)?;
            if self.backlog.len() >= MAX_BACKLOG_LINES {
                return Err(WireError::BacklogFull {
                    limit: MAX_BACKLOG_LINES,
                });
            }
            self.carry.extend_from_slice(&rest[..pos]);
            let line = std::mem::take(&mut self.carry);
            self.backlog.push_back(line_to_string(line));
            committed += 1;
            rest = &rest[pos + 1..];
        }

        self.check_len(rest.len())?;
        self.carry.extend_from_slice(rest);
        Ok(committed)
    }

    fn check_len(&self, extra: usize) -> Result<()> {
        if self.carry.len().saturating_add(extra) > MAX_LINE_BYTES {
            return Err(WireError::LineTooLong {
                limit: MAX_LINE_BYTES,
            });
        }
        Ok(())
    }

    /// Lines received but not yet claimed by the decoder.
    pub fn backlog(&self) -> &VecDeque<String> {
        &self.backlog
    }

    /// Bytes of the current, still unterminated line.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    /// Try to claim the next complete message from the backlog.
    pub fn next_frame(&mut self) -> Decoded {
        FrameDecoder::try_decode(&mut self.backlog)
    }
}

fn line_to_string(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    match String::from_utf8(line) {
        Ok(line) => line,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The backlog does not yet hold a whole message; nothing was claimed.
    NeedMoreData,
    Frame(Frame),
    /// The head line was not a known tag. Exactly that one line was claimed.
    Unrecognized(String),
}

/// Claims whole messages from a line backlog.
///
/// The decoder keeps no state between calls: a message whose lines are not
/// all present is left untouched and re-examined from its tag on the next
/// attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn try_decode(backlog: &mut VecDeque<String>) -> Decoded {
        let Some(head) = backlog.front() else {
            return Decoded::NeedMoreData;
        };

        let Some(layout) = Tag::parse(head).layout() else {
            // Only the tag line is dropped. If the unknown message had trailing lines
            // they will be read as tags next; there is no resynchronisation point.
            let line = backlog.pop_front().unwrap_or_default();
            return Decoded::Unrecognized(line);
        };

        match layout {
            Layout::Ack(kind) => {
                backlog.pop_front();
                Decoded::Frame(Frame::Reply(Reply::Ack(kind)))
            }
            Layout::Hit => {
                backlog.pop_front();
                Decoded::Frame(Frame::Hit)
            }
            Layout::Records(kind) => {
                let Some(count_line) = backlog.get(1) else {
                    return Decoded::NeedMoreData;
                };
                let count = parse_count(count_line);
                let needed = count.saturating_mul(kind.width()).saturating_add(2);
                if backlog.len() < needed {
                    return Decoded::NeedMoreData;
                }

                let mut fields = backlog.drain(..needed).skip(2);
                Decoded::Frame(Frame::Reply(decode_records(kind, count, &mut fields)))
            }
        }
    }
}

fn decode_records(
    kind: RecordKind,
    count: usize,
    fields: &mut impl Iterator<Item = String>,
) -> Reply {
    let mut next = || fields.next().unwrap_or_default();
    match kind {
        RecordKind::Stack => Reply::Stack(
            (0..count)
                .map(|_| StackEntry {
                    file: next(),
                    line: parse_int(&next()),
                    name: next(),
                })
                .collect(),
        ),
        RecordKind::Thread => Reply::Threads(
            (0..count)
                .map(|i| {
                    let name = next();
                    ThreadEntry {
                        name: if name.is_empty() {
                            format!("Thread #{}", i + 1)
                        } else {
                            name
                        },
                    }
                })
                .collect(),
        ),
        RecordKind::Breakpoint => Reply::Breakpoints((0..count).map(|_| parse_int(&next())).collect()),
        RecordKind::Variable => Reply::Variables(
            (0..count)
                .map(|_| VariableEntry {
                    name: next(),
                    type_name: next(),
                    kind: next(),
                    value: next(),
                    reference: parse_int(&next()),
                })
                .collect(),
        ),
    }
}

/// Numeric fields never fail a frame; anything unparsable reads as zero.
fn parse_int(field: &str) -> i64 {
    field.trim().parse().unwrap_or(0)
}

fn parse_count(field: &str) -> usize {
    field.trim().parse().unwrap_or(0)
}
