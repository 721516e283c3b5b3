// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-identity FIFO request queue.
//!
//! Any intake task may push; only the owning worker takes from the head.
//! The head request is moved into an [`InFlight`] guard while the worker
//! processes it, and counts toward [`DisbursementQueue::depth`] until the
//! guard is dropped.

use crate::DispatchError;
use crate::base::{AssetId, OperationRef, QueueIndex, Recipient};
use crossbeam::queue::SegQueue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// Result delivered through a [`CompletionHandle`].
pub type Outcome = Result<Disbursement, DispatchError>;

/// Record of a completed disbursement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disbursement {
    pub recipient: Recipient,
    pub queue: QueueIndex,
    pub transfers: Vec<TransferReceipt>,
}

/// One confirmed transfer within a disbursement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransferReceipt {
    pub asset: AssetId,
    pub amount: Decimal,
    pub operation: OperationRef,
}

/// Settle-once outcome sender carried by every [`Request`].
///
/// Settling consumes the handle. Dropping it unsettled makes the waiting
/// [`Ticket`] report [`DispatchError::Abandoned`].
#[derive(Debug)]
pub struct CompletionHandle {
    sender: oneshot::Sender<Outcome>,
}

impl CompletionHandle {
    /// Creates a handle and the receiver its outcome is delivered to.
    pub fn channel() -> (Self, oneshot::Receiver<Outcome>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    pub fn settle(self, outcome: Outcome) {
        // The caller may have stopped waiting; the outcome is still final.
        let _ = self.sender.send(outcome);
    }
}

/// A queued disbursement request.
#[derive(Debug)]
pub struct Request {
    pub recipient: Recipient,
    pub completion: CompletionHandle,
}

impl Request {
    /// Builds a request and the receiver for its outcome.
    pub fn new(recipient: Recipient) -> (Self, oneshot::Receiver<Outcome>) {
        let (completion, receiver) = CompletionHandle::channel();
        (
            Self {
                recipient,
                completion,
            },
            receiver,
        )
    }
}

/// Caller-side view of an accepted request.
#[derive(Debug)]
pub struct Ticket {
    queue: QueueIndex,
    receiver: oneshot::Receiver<Outcome>,
}

impl Ticket {
    pub(crate) fn new(queue: QueueIndex, receiver: oneshot::Receiver<Outcome>) -> Self {
        Self { queue, receiver }
    }

    /// Queue the request was routed to.
    pub fn queue(&self) -> QueueIndex {
        self.queue
    }

    /// Waits for the request to settle.
    pub async fn wait(self) -> Outcome {
        self.receiver.await.unwrap_or(Err(DispatchError::Abandoned))
    }
}

/// Lock-free FIFO of pending requests bound to one funding identity.
#[derive(Debug)]
pub struct DisbursementQueue {
    index: QueueIndex,
    pending: SegQueue<Request>,
    in_flight: AtomicUsize,
}

impl DisbursementQueue {
    pub fn new(index: QueueIndex) -> Self {
        Self {
            index,
            pending: SegQueue::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn index(&self) -> QueueIndex {
        self.index
    }

    /// Appends a request to the tail.
    pub fn push(&self, request: Request) {
        self.pending.push(request);
    }

    /// Takes the head request for processing.
    ///
    /// Only the owning worker calls this, so at most one [`InFlight`] guard
    /// exists per queue.
    pub fn begin(&self) -> Option<InFlight<'_>> {
        let request = self.pending.pop()?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(InFlight {
            queue: self,
            recipient: request.recipient,
            completion: Some(request.completion),
        })
    }

    /// Requests waiting behind the head.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Pending plus in-flight requests.
    pub fn depth(&self) -> usize {
        self.pending.len() + self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }
}

/// The request currently being processed by a worker.
///
/// Dropping the guard removes the request from the queue's depth whether or
/// not it was settled.
#[derive(Debug)]
pub struct InFlight<'a> {
    queue: &'a DisbursementQueue,
    recipient: Recipient,
    completion: Option<CompletionHandle>,
}

impl InFlight<'_> {
    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    /// Removes the request from the queue, then delivers the outcome.
    pub fn settle(mut self, outcome: Outcome) {
        let completion = self.completion.take();
        drop(self);
        if let Some(completion) = completion {
            completion.settle(outcome);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
