//! Queued requests and the per-direction wait queues.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Condvar;

use crate::cancel::CancelToken;
use crate::ledger::Hold;
use crate::types::VehicleId;

/// Identifies one queued request for the lifetime of the facility.
pub(crate) type Ticket = u64;

/// Decision the monitor records for a queued request before waking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Resources and slot are reserved; the owner may proceed.
    Granted,
    /// The request can never be served; the owner must give up.
    Aborted,
}

/// A request that could not be served on arrival.
///
/// The owning agent blocks on `signal` until the monitor stores a verdict for
/// its ticket. Only the monitor, under the lock, moves it out of the queue.
pub(crate) struct PendingRequest {
    pub ticket: Ticket,
    pub vehicle: VehicleId,
    pub hold: Hold,
    pub signal: Arc<Condvar>,
    pub cancel: Option<CancelToken>,
    /// Issued by a member of the population that relieves this queue.
    pub from_reliever: bool,
    pub enqueued_at: Instant,
}

impl PendingRequest {
    /// Check whether this request waits with `token`.
    pub fn waits_with(&self, token: &CancelToken) -> bool {
        self.cancel.as_ref().is_some_and(|own| own.same_as(token))
    }
}

/// Arrival-ordered queue of pending requests of one direction.
#[derive(Default)]
pub(crate) struct WaitQueue {
    entries: VecDeque<PendingRequest>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append at the tail, returning the 1-based position.
    pub fn push(&mut self, request: PendingRequest) -> usize {
        self.entries.push_back(request);
        self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<&PendingRequest> {
        self.entries.get(index)
    }

    pub fn remove_at(&mut self, index: usize) -> Option<PendingRequest> {
        self.entries.remove(index)
    }

    /// Remove the request holding `ticket`, wherever it sits.
    pub fn remove_ticket(&mut self, ticket: Ticket) -> Option<PendingRequest> {
        let index = self.entries.iter().position(|r| r.ticket == ticket)?;
        self.entries.remove(index)
    }

    /// Remove every request matching `predicate`, keeping the order of the rest.
    pub fn remove_where(
        &mut self,
        mut predicate: impl FnMut(&PendingRequest) -> bool,
    ) -> Vec<PendingRequest> {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for request in self.entries.drain(..) {
            if predicate(&request) {
                removed.push(request);
            } else {
                kept.push_back(request);
            }
        }
        self.entries = kept;
        removed
    }

    /// Remove every request.
    pub fn drain_all(&mut self) -> Vec<PendingRequest> {
        self.entries.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.entries.iter()
    }
}
