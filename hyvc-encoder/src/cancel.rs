//! Cooperative cancellation

use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Why a run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Requested,
    TimedOut,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => f.write_str("cancellation requested"),
            CancelReason::TimedOut => f.write_str("run timed out"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    deadline: OnceLock<Instant>,
}

/// Shared cancellation flag, checked at job-dispatch boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the run to stop; jobs already started still finish
    pub fn cancel(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Arms a whole-run timeout. Only the first call has an effect.
    pub fn arm_timeout(&self, timeout: Duration) {
        let _ = self.inner.deadline.set(Instant::now() + timeout);
    }

    pub fn reason(&self) -> Option<CancelReason> {
        if self.inner.requested.load(Ordering::SeqCst) {
            return Some(CancelReason::Requested);
        }
        match self.inner.deadline.get() {
            Some(deadline) if Instant::now() >= *deadline => Some(CancelReason::TimedOut),
            _ => None,
        }
    }

    /// `Err(Cancelled)` once cancellation was requested or the deadline passed
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(Error::Cancelled(reason)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(observer.check().is_ok());

        token.cancel();
        assert!(matches!(
            observer.check(),
            Err(Error::Cancelled(CancelReason::Requested))
        ));
    }

    #[test]
    fn test_expired_deadline_reports_timeout() {
        let token = CancelToken::new();
        token.arm_timeout(Duration::ZERO);
        assert_eq!(token.reason(), Some(CancelReason::TimedOut));
    }
}
