//! Cancellation and time-budget checks for sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Cooperative cancellation flag shared between a caller and a session.
///
/// Sessions poll it at row boundaries and once before commit; a transaction
/// that has started always runs to commit or rollback.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Row-boundary checkpoint combining cancellation and the session budget.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint {
    token: CancellationToken,
    started: Instant,
    budget: Option<Duration>,
}

impl Checkpoint {
    pub(crate) fn new(token: CancellationToken, budget: Option<Duration>) -> Self {
        Self {
            token,
            started: Instant::now(),
            budget,
        }
    }

    /// Fails if the session was cancelled or ran past its budget.
    pub(crate) fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.budget {
            Some(budget) if self.started.elapsed() > budget => {
                Err(Error::TimeBudgetExceeded(budget))
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_checkpoint() {
        let token = CancellationToken::new();
        let checkpoint = Checkpoint::new(token.clone(), None);
        assert!(checkpoint.check().is_ok());
        token.cancel();
        assert!(matches!(checkpoint.check(), Err(Error::Cancelled)));

        let expired = Checkpoint::new(CancellationToken::new(), Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(
            expired.check(),
            Err(Error::TimeBudgetExceeded(_))
        ));
    }
}
