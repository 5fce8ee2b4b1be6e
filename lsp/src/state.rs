//! Connection lifecycle state.

use std::fmt;

use tokio::sync::watch;

use crate::error::TerminationReason;

/// Lifecycle of one connection.
///
/// States only move forward: `Created → Starting → Initializing → Ready →
/// ShuttingDown → Terminated`. Intermediate states may be skipped, and
/// `Terminated` is reachable from anywhere and never left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Starting,
    Initializing,
    Ready,
    ShuttingDown,
    Terminated(TerminationReason),
}

impl ConnectionState {
    fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Starting => 1,
            Self::Initializing => 2,
            Self::Ready => 3,
            Self::ShuttingDown => 4,
            Self::Terminated(_) => 5,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }

    #[must_use]
    pub fn termination_reason(&self) -> Option<&TerminationReason> {
        match self {
            Self::Terminated(reason) => Some(reason),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(&self, next: &Self) -> bool {
        !self.is_terminated() && next.rank() > self.rank()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Starting => f.write_str("starting"),
            Self::Initializing => f.write_str("initializing"),
            Self::Ready => f.write_str("ready"),
            Self::ShuttingDown => f.write_str("shutting down"),
            Self::Terminated(reason) => write!(f, "terminated ({reason})"),
        }
    }
}

/// Shared, observable state cell.
///
/// Every transition is a single `send_if_modified` call, so the check and the
/// update happen under the channel's lock.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub fn new(initial: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// Move to `next` if that is a forward transition. Returns whether the
    /// state changed.
    pub fn advance(&self, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.can_advance_to(&next) {
                tracing::debug!(from = %current, to = %next, "connection state");
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Transitions ────────────────────────────────────────────────────

    #[test]
    fn test_forward_transitions_are_accepted() {
        let cell = StateCell::new(ConnectionState::Created);
        assert!(cell.advance(ConnectionState::Starting));
        assert!(cell.advance(ConnectionState::Initializing));
        assert!(cell.advance(ConnectionState::Ready));
        assert!(cell.get().is_ready());
    }

    #[test]
    fn test_backward_transition_is_rejected() {
        let cell = StateCell::new(ConnectionState::Ready);
        assert!(!cell.advance(ConnectionState::Initializing));
        assert_eq!(cell.get(), ConnectionState::Ready);
    }

    #[test]
    fn test_terminated_is_absorbing() {
        let cell = StateCell::new(ConnectionState::Starting);
        assert!(cell.advance(ConnectionState::Terminated(TerminationReason::StreamClosed)));
        assert!(!cell.advance(ConnectionState::Terminated(TerminationReason::Shutdown)));
        assert!(!cell.advance(ConnectionState::Ready));
        assert_eq!(
            cell.get().termination_reason(),
            Some(&TerminationReason::StreamClosed)
        );
    }

    #[test]
    fn test_states_may_be_skipped() {
        let cell = StateCell::new(ConnectionState::Created);
        assert!(cell.advance(ConnectionState::Terminated(TerminationReason::Startup(
            "not found".into()
        ))));
    }

    // ── Observation ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let cell = StateCell::new(ConnectionState::Initializing);
        let mut rx = cell.subscribe();
        cell.advance(ConnectionState::Ready);
        let state = rx.wait_for(ConnectionState::is_ready).await.unwrap();
        assert!(state.is_ready());
    }
}
