// Author: Jacques Murray

//! The ambient context every API call runs under.
//!
//! A [`CallContext`] carries a cancellation token, an optional deadline and
//! an optional request id. Remote calls and re-authentication are raced
//! against it, and an interrupted call is never treated as retryable.

use std::future::Future;
use std::pin::pin;
use std::time::{Duration, Instant};

use futures::future::{select, Either};
use tokio_util::sync::CancellationToken;

use crate::sleep;

/// Why a call stopped before its operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupt {
    /// The context's cancellation token fired.
    #[error("call cancelled")]
    Cancelled,
    /// The context's deadline passed.
    #[error("call deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation, deadline and tagging for one logical call.
///
/// Cloning is cheap and clones share the same cancellation state, so a clone
/// can be handed to another task to cancel the call from outside.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    request_id: Option<String>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the context to an existing cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Tags log entries emitted under this context.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Reports an interrupt that has already happened, without waiting.
    pub fn interrupted(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        self.wait_interrupt().await;
    }

    async fn wait_interrupt(&self) -> Interrupt {
        let cancelled = pin!(self.cancel.cancelled());
        let Some(deadline) = self.deadline else {
            cancelled.await;
            return Interrupt::Cancelled;
        };

        let expired = pin!(sleep::sleep(deadline.saturating_duration_since(Instant::now())));
        match select(cancelled, expired).await {
            Either::Left(_) => Interrupt::Cancelled,
            Either::Right(_) => Interrupt::DeadlineExceeded,
        }
    }

    /// Runs `future` to completion unless the context is interrupted first.
    ///
    /// The future is polled before the interrupt on every wake-up, so a
    /// result that is already available wins over a simultaneous cancel.
    pub async fn guard<F: Future>(&self, future: F) -> Result<F::Output, Interrupt> {
        if let Some(interrupt) = self.interrupted() {
            return Err(interrupt);
        }

        let future = pin!(future);
        let interrupt = pin!(self.wait_interrupt());
        match select(future, interrupt).await {
            Either::Left((output, _)) => Ok(output),
            Either::Right((interrupt, _)) => Err(interrupt),
        }
    }
}

#[cfg(all(test, feature = "tokio-timer"))]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_is_not_interrupted() {
        assert_eq!(CallContext::new().interrupted(), None);
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let context = CallContext::new().with_request_id("req-1");
        let clone = context.clone();
        clone.cancel();
        assert_eq!(context.interrupted(), Some(Interrupt::Cancelled));
        assert_eq!(context.request_id(), Some("req-1"));
    }

    #[test]
    fn test_elapsed_deadline_is_reported() {
        let context = CallContext::new().with_deadline(Instant::now());
        assert_eq!(context.interrupted(), Some(Interrupt::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_guard_returns_output() {
        let context = CallContext::new().with_timeout(Duration::from_secs(5));
        assert_eq!(context.guard(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_guard_stops_at_deadline() {
        let context = CallContext::new().with_timeout(Duration::from_millis(20));
        let result = context
            .guard(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(Interrupt::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_guard_refuses_to_start_when_cancelled() {
        let context = CallContext::new();
        context.cancel();
        let result = context.guard(async { 1 }).await;
        assert_eq!(result, Err(Interrupt::Cancelled));
    }
}
