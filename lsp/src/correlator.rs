//! Pending-request table: matches responses to the callers awaiting them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{RequestError, TerminationReason};
use crate::message::{RequestId, Response};

type Reply = Result<Value, RequestError>;

struct Pending {
    method: String,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingTable {
    next_id: i64,
    entries: HashMap<RequestId, Pending>,
    closed: Option<TerminationReason>,
}

/// What happened to an incoming response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Delivered,
    /// The entry existed but its caller stopped waiting.
    CallerGone,
    /// No pending entry with that id (stray or duplicate).
    Unknown,
}

/// Owns id allocation and the pending table.
///
/// The lock is never held across an await point.
#[derive(Default)]
pub(crate) struct Correlator {
    table: Mutex<PendingTable>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh id and register a pending entry for it.
    pub fn register(
        &self,
        method: &str,
    ) -> Result<(RequestId, oneshot::Receiver<Reply>), RequestError> {
        let mut table = self.lock();
        if let Some(reason) = &table.closed {
            return Err(RequestError::ServerDied(reason.clone()));
        }
        table.next_id += 1;
        let id = RequestId::Number(table.next_id);
        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id.clone(),
            Pending {
                method: method.to_string(),
                tx,
            },
        );
        Ok((id, rx))
    }

    /// Route a response to its waiting caller.
    pub fn resolve(&self, response: Response) -> Resolution {
        let pending = self.lock().entries.remove(&response.id);
        let Some(pending) = pending else {
            tracing::warn!(id = %response.id, "discarding response for unknown request id");
            return Resolution::Unknown;
        };
        let reply = response.outcome.map_err(RequestError::Remote);
        if pending.tx.send(reply).is_ok() {
            Resolution::Delivered
        } else {
            tracing::debug!(
                id = %response.id,
                method = %pending.method,
                "response arrived after the caller stopped waiting"
            );
            Resolution::CallerGone
        }
    }

    /// Drop an entry whose request never reached the wire.
    pub fn forget(&self, id: &RequestId) {
        self.lock().entries.remove(id);
    }

    /// Fail every pending request with `ServerDied` and refuse new ones.
    ///
    /// Returns how many callers were swept; a second call sweeps nothing.
    pub fn close(&self, reason: &TerminationReason) -> usize {
        let drained: Vec<Pending> = {
            let mut table = self.lock();
            if table.closed.is_some() {
                return 0;
            }
            table.closed = Some(reason.clone());
            table.entries.drain().map(|(_, pending)| pending).collect()
        };
        let count = drained.len();
        for pending in drained {
            let _ = pending
                .tx
                .send(Err(RequestError::ServerDied(reason.clone())));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }
}
