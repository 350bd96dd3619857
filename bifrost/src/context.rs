//! Per-call cancellation and deadline context.
//!
//! A [`Context`] travels with every operation. The transport races each
//! network call against it and stream tasks check it at both the read and
//! the send boundary, so cancelling it stops all work tied to the call.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Why a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// The caller cancelled the context.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
}

/// Cancellation and deadline scope for a single gateway call.
///
/// Cloning a context shares its cancellation token; [`Context::child`]
/// creates a scope that is cancelled with its parent but can also be
/// cancelled on its own.
#[derive(Debug, Clone)]
pub struct Context {
    request_id: Uuid,
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Create a context bound to an existing cancellation token.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::new()
        }
    }

    /// Bound the context by a timeout measured from now.
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bound the context by an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Derive a child scope sharing this context's request id and deadline.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id,
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Identifier used to correlate log records of one call.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The underlying cancellation token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Reason the context is finished, or `None` while it is live.
    #[must_use]
    pub fn err(&self) -> Option<DoneReason> {
        if self.token.is_cancelled() {
            Some(DoneReason::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(DoneReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DoneReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.token.cancelled() => DoneReason::Cancelled,
                () = tokio::time::sleep_until(deadline) => DoneReason::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DoneReason::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_resolves_done() {
        let ctx = Context::new();
        assert_eq!(ctx.err(), None);
        let child = ctx.child();
        ctx.cancel();
        assert_eq!(child.done().await, DoneReason::Cancelled);
        assert_eq!(child.err(), Some(DoneReason::Cancelled));
        assert_eq!(child.request_id(), ctx.request_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_resolves_done() {
        let ctx = Context::new().with_timeout(Duration::from_millis(50));
        assert_eq!(ctx.done().await, DoneReason::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(DoneReason::DeadlineExceeded));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::new()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
