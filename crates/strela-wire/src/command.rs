use std::fmt::Write as _;

use crate::types::Tag;

/// An outgoing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Breakpoints staged before the debuggee connected. Sent once per path,
    /// ahead of [`Command::Start`]; the debuggee does not answer it.
    AddAllStart { path: String, lines: Vec<i64> },
    Start,
    AddAll { path: String, lines: Vec<i64> },
    Add { path: String, line: i64 },
    Remove { path: String, line: i64 },
    Threads,
    Stack,
    Variables { reference: i64 },
    Pause,
    Continue,
    Step,
    StepIn,
    StepOut,
    Disconnect,
}

impl Command {
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::AddAllStart { .. } => "ADD_ALL_START",
            Command::Start => "START",
            Command::AddAll { .. } => "ADD_ALL",
            Command::Add { .. } => "ADD",
            Command::Remove { .. } => "REMOVE",
            Command::Threads => "THREADS",
            Command::Stack => "STACK",
            Command::Variables { .. } => "VARIABLES",
            Command::Pause => "PAUSE",
            Command::Continue => "CONTINUE",
            Command::Step => "STEP",
            Command::StepIn => "STEPIN",
            Command::StepOut => "STEPOUT",
            Command::Disconnect => "DISCONNECT",
        }
    }

    /// The reply tag this command is answered with, or `None` for
    /// fire-and-forget commands that must not occupy a correlator slot.
    pub fn expected_reply(&self) -> Option<Tag> {
        match self {
            Command::AddAllStart { .. } | Command::Start | Command::Disconnect => None,
            Command::AddAll { .. } => Some(Tag::AddAll),
            Command::Add { .. } => Some(Tag::Add),
            Command::Remove { .. } => Some(Tag::Remove),
            Command::Threads => Some(Tag::Threads),
            Command::Stack => Some(Tag::Stack),
            Command::Variables { .. } => Some(Tag::Variables),
            Command::Pause => Some(Tag::Pause),
            Command::Continue => Some(Tag::Continue),
            Command::Step => Some(Tag::Step),
            Command::StepIn => Some(Tag::StepIn),
            Command::StepOut => Some(Tag::StepOut),
        }
    }

    /// Wire form: one field per line, every line newline-terminated.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        // Writing into a `String` cannot fail.
        let _ = writeln!(out, "{}", self.keyword());
        match self {
            Command::AddAllStart { path, lines } | Command::AddAll { path, lines } => {
                let _ = writeln!(out, "{}", lines.len());
                let _ = writeln!(out, "{path}");
                for line in lines {
                    let _ = writeln!(out, "{line}");
                }
            }
            Command::Add { path, line } | Command::Remove { path, line } => {
                let _ = writeln!(out, "{path}");
                let _ = writeln!(out, "{line}");
            }
            Command::Variables { reference } => {
                let _ = writeln!(out, "{reference}");
            }
            Command::Start
            | Command::Threads
            | Command::Stack
            | Command::Pause
            | Command::Continue
            | Command::Step
            | Command::StepIn
            | Command::StepOut
            | Command::Disconnect => {}
        }
        out
    }
}
