use std::collections::VecDeque;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::types::{Reply, Tag};
use crate::{Result, WireError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// A reply arrived while no request was waiting for one.
    #[error("{tag} reply received with no pending request")]
    Unmatched { tag: Tag },
}

#[derive(Debug)]
struct PendingRequest {
    expected: Tag,
    reply: oneshot::Sender<Result<Reply>>,
}

/// Pairs replies with requests by arrival order.
///
/// The wire carries no request ids, so the only correlation available is
/// position: the debuggee answers in the order it was asked. Contexts must
/// therefore be enqueued in exactly the order their commands are written.
#[derive(Debug, Default)]
pub struct Correlator {
    queue: VecDeque<PendingRequest>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request that expects a reply tagged `expected`.
    pub fn enqueue(&mut self, expected: Tag) -> oneshot::Receiver<Result<Reply>> {
        let (tx, rx) = oneshot::channel();
        self.queue.push_back(PendingRequest {
            expected,
            reply: tx,
        });
        rx
    }

    /// Hand `reply` to the oldest pending request.
    ///
    /// A tag mismatch still consumes the oldest context (it receives
    /// [`WireError::UnexpectedReply`]) so later replies stay aligned with
    /// later requests.
    pub fn complete(&mut self, reply: Reply) -> std::result::Result<(), CorrelationError> {
        let Some(pending) = self.queue.pop_front() else {
            return Err(CorrelationError::Unmatched { tag: reply.tag() });
        };

        let actual = reply.tag();
        let outcome = if actual == pending.expected {
            Ok(reply)
        } else {
            tracing::warn!(
                target: "strela.wire",
                expected = %pending.expected,
                actual = %actual,
                "reply tag does not match the oldest pending request"
            );
            Err(WireError::UnexpectedReply {
                expected: pending.expected,
                actual,
            })
        };

        // The requester may have timed out or gone away; the slot is consumed
        // either way.
        let _ = pending.reply.send(outcome);
        Ok(())
    }

    /// Fail every pending request with [`WireError::ConnectionClosed`].
    pub fn fail_all(&mut self) -> usize {
        let failed = self.queue.len();
        for pending in self.queue.drain(..) {
            let _ = pending.reply.send(Err(WireError::ConnectionClosed));
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
