use std::fmt;

/// The protocol models a single thread of execution; every stop reports it.
pub const MAIN_THREAD_ID: i64 = 0;

/// Leading keyword of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Stack,
    Threads,
    AddAll,
    Add,
    Remove,
    Step,
    StepIn,
    StepOut,
    Pause,
    Continue,
    Variables,
    Hit,
    Unknown,
}

/// Line layout of a message, following its tag line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layout {
    Ack(AckKind),
    Hit,
    /// A count line followed by `count * kind.width()` lines.
    Records(RecordKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordKind {
    /// file, line, name
    Stack,
    /// name
    Thread,
    /// accepted line number
    Breakpoint,
    /// name, type, presentation kind, value, reference id
    Variable,
}

impl RecordKind {
    pub(crate) fn width(self) -> usize {
        match self {
            RecordKind::Stack => 3,
            RecordKind::Thread | RecordKind::Breakpoint => 1,
            RecordKind::Variable => 5,
        }
    }
}

impl Tag {
    pub fn parse(line: &str) -> Tag {
        match line {
            "ACK_STACK" => Tag::Stack,
            "ACK_THREADS" => Tag::Threads,
            "ACK_ADD_ALL" => Tag::AddAll,
            "ACK_ADD" => Tag::Add,
            "ACK_REMOVE" => Tag::Remove,
            "ACK_STEP" => Tag::Step,
            "ACK_STEPIN" => Tag::StepIn,
            "ACK_STEPOUT" => Tag::StepOut,
            "ACK_PAUSE" => Tag::Pause,
            "ACK_CONTINUE" => Tag::Continue,
            "ACK_VARIABLES" => Tag::Variables,
            "HIT" => Tag::Hit,
            _ => Tag::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Stack => "ACK_STACK",
            Tag::Threads => "ACK_THREADS",
            Tag::AddAll => "ACK_ADD_ALL",
            Tag::Add => "ACK_ADD",
            Tag::Remove => "ACK_REMOVE",
            Tag::Step => "ACK_STEP",
            Tag::StepIn => "ACK_STEPIN",
            Tag::StepOut => "ACK_STEPOUT",
            Tag::Pause => "ACK_PAUSE",
            Tag::Continue => "ACK_CONTINUE",
            Tag::Variables => "ACK_VARIABLES",
            Tag::Hit => "HIT",
            Tag::Unknown => "<unknown>",
        }
    }

    pub(crate) fn layout(self) -> Option<Layout> {
        let layout = match self {
            Tag::Stack => Layout::Records(RecordKind::Stack),
            Tag::Threads => Layout::Records(RecordKind::Thread),
            Tag::AddAll => Layout::Records(RecordKind::Breakpoint),
            Tag::Variables => Layout::Records(RecordKind::Variable),
            Tag::Add => Layout::Ack(AckKind::Add),
            Tag::Remove => Layout::Ack(AckKind::Remove),
            Tag::Step => Layout::Ack(AckKind::Step),
            Tag::StepIn => Layout::Ack(AckKind::StepIn),
            Tag::StepOut => Layout::Ack(AckKind::StepOut),
            Tag::Pause => Layout::Ack(AckKind::Pause),
            Tag::Continue => Layout::Ack(AckKind::Continue),
            Tag::Hit => Layout::Hit,
            Tag::Unknown => return None,
        };
        Some(layout)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub file: String,
    pub line: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableEntry {
    pub name: String,
    pub type_name: String,
    /// Presentation hint kind, passed through verbatim (`none`, `data`, ...).
    pub kind: String,
    pub value: String,
    /// Non-zero when the variable has children that can be requested with
    /// `VARIABLES <reference>`.
    pub reference: i64,
}

/// Replies that carry no payload beyond their tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Add,
    Remove,
    Step,
    StepIn,
    StepOut,
    Pause,
    Continue,
}

impl AckKind {
    pub fn tag(self) -> Tag {
        match self {
            AckKind::Add => Tag::Add,
            AckKind::Remove => Tag::Remove,
            AckKind::Step => Tag::Step,
            AckKind::StepIn => Tag::StepIn,
            AckKind::StepOut => Tag::StepOut,
            AckKind::Pause => Tag::Pause,
            AckKind::Continue => Tag::Continue,
        }
    }
}

/// A decoded, solicited reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Stack(Vec<StackEntry>),
    Threads(Vec<ThreadEntry>),
    /// Line numbers the debuggee accepted for an `ADD_ALL`.
    Breakpoints(Vec<i64>),
    Variables(Vec<VariableEntry>),
    Ack(AckKind),
}

impl Reply {
    pub fn tag(&self) -> Tag {
        match self {
            Reply::Stack(_) => Tag::Stack,
            Reply::Threads(_) => Tag::Threads,
            Reply::Breakpoints(_) => Tag::AddAll,
            Reply::Variables(_) => Tag::Variables,
            Reply::Ack(kind) => kind.tag(),
        }
    }
}

/// A complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Reply(Reply),
    /// Unsolicited breakpoint hit.
    Hit,
}

impl Frame {
    pub fn tag(&self) -> Tag {
        match self {
            Frame::Reply(reply) => reply.tag(),
            Frame::Hit => Tag::Hit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
}

impl StopReason {
    pub fn as_dap_reason(self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggeeEvent {
    Stopped { reason: StopReason, thread_id: i64 },
    /// Something on the wire could not be attributed (unknown tag, reply
    /// with nothing pending). The session keeps running.
    ProtocolError(String),
    /// The debuggee stream ended.
    Terminated,
}
