// Author: Jacques Murray

//! # bca-api
//!
//! A client for the BCA corporate banking API that survives expired sessions.
//!
//! BCA answers a call made with a stale access token with the error code
//! `ESB-14-009`. When that happens the client re-authenticates and tries the
//! call again, a bounded number of times. Every other failure is returned to
//! the caller straight away.
//!
//! ## Goals
//!
//! * Retry only the one recoverable error, and re-authenticate before each retry.
//! * Tag every log entry with the session it was produced under.
//! * Let callers tell "gave up after N retries" apart from "failed at once".
//! * Keep the retry engine runtime-agnostic (Tokio or async-std timers).
//!
//! **Note:** You *must* enable a timer feature for this crate:
//! `features = ["tokio-timer"]` (the default) or `features = ["async-std-timer"]`.
//! The async-std timer only serves the bare [`Retry`] engine: [`Client`]
//! talks HTTP through reqwest and must run inside a Tokio runtime.
//!
//! ### Example: Client
//!
//! ```rust,no_run
//! use bca_api::{CallContext, Client, Config};
//!
//! # async fn demo(config: Config) -> Result<(), bca_api::Error> {
//! let client = Client::new(config)?;
//! let ctx = CallContext::new().with_request_id("balance-check");
//!
//! let balance = client
//!     .balance_information(&ctx, "BCAAPI2016", &["0201245680"])
//!     .await?;
//! println!("{balance:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ### Example: Bare retry engine
//!
//! ```rust,no_run
//! use bca_api::{backoff::FixedDelay, Retry, RetryError};
//!
//! #[derive(Debug)]
//! enum MyError {
//!     StaleSession,
//!     Rejected,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! async fn call_api() -> Result<String, MyError> {
//!     Err(MyError::StaleSession)
//! }
//!
//! async fn refresh_session() -> Result<(), MyError> {
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let result = Retry::new(FixedDelay::immediate(), || call_api())
//!         .with_condition(|e: &MyError| matches!(e, MyError::StaleSession))
//!         .with_recovery(|_attempt: u32, _e: &MyError| refresh_session())
//!         .await;
//!
//!     if let Err(RetryError::Exhausted { attempts, .. }) = result {
//!         println!("gave up after {attempts} attempts");
//!     }
//! }
//! ```

pub mod backoff;
pub mod classify;
pub mod client;
pub mod config;
pub mod context;
pub mod dto;
pub mod error;
pub mod session;
pub mod session_log;
pub mod signature;
pub mod sink;
mod sleep;

pub use backoff::{Backoff, ExponentialBackoff, FixedDelay};
pub use classify::{ErrorClassifier, ErrorCode, INVALID_TOKEN_CODE};
pub use client::Client;
pub use config::{Config, LogConfig, RetryConfig};
pub use context::{CallContext, Interrupt};
pub use error::{Error, RemoteError, RetryError};
pub use session::{Session, SessionId};
pub use session_log::{LogContext, LogRecord, MemoryLogger, SessionLog, SessionLogger, TracingLogger};

#[cfg(feature = "jitter")]
pub use backoff::Jitter;

use std::convert::Infallible;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;

/// How many times a call is retried after the recoverable error.
/// The call is attempted at most `MAX_RETRY_ATTEMPTS + 1` times.
pub const MAX_RETRY_ATTEMPTS: u32 = 2;

/// Decides whether a failed attempt may be retried.
pub trait Condition<E> {
    fn should_retry(&mut self, error: &E) -> bool;
}

impl<E, F> Condition<E> for F
where
    F: FnMut(&E) -> bool,
{
    fn should_retry(&mut self, error: &E) -> bool {
        self(error)
    }
}

/// Condition used until [`Retry::with_condition`] is called: every error is
/// retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAll;

impl<E> Condition<E> for RetryAll {
    fn should_retry(&mut self, _: &E) -> bool {
        true
    }
}

/// The step run between a failed attempt and the next one.
///
/// `attempt` is the number of the attempt that just failed (1-based) and
/// `error` is its error. A recovery that fails is logged and the loop goes
/// on; its error never replaces the operation's.
pub trait Recovery<E> {
    type Output;
    type Error: fmt::Display;
    type Future: Future<Output = Result<Self::Output, Self::Error>>;

    fn recover(&mut self, attempt: u32, error: &E) -> Self::Future;
}

impl<E, F, Fut, T, RE> Recovery<E> for F
where
    F: FnMut(u32, &E) -> Fut,
    Fut: Future<Output = Result<T, RE>>,
    RE: fmt::Display,
{
    type Output = T;
    type Error = RE;
    type Future = Fut;

    fn recover(&mut self, attempt: u32, error: &E) -> Self::Future {
        self(attempt, error)
    }
}

/// Recovery used until [`Retry::with_recovery`] is called.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecovery;

impl<E> Recovery<E> for NoRecovery {
    type Output = ();
    type Error = Infallible;
    type Future = std::future::Ready<Result<(), Infallible>>;

    fn recover(&mut self, _: u32, _: &E) -> Self::Future {
        std::future::ready(Ok(()))
    }
}

/// What to do after an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// Recover and attempt again.
    Retry,
    /// The error is not recoverable: return it untouched.
    Reject,
    /// The error is recoverable but the retry budget is spent.
    Exhaust,
}

fn decide(attempt: u32, max_retries: u32, recoverable: bool) -> Decision {
    if !recoverable {
        Decision::Reject
    } else if attempt > max_retries {
        Decision::Exhaust
    } else {
        Decision::Retry
    }
}

/// A retryable operation.
///
/// Created by [`Retry::new()`] and configured with the builder methods
/// [`with_condition()`](Retry::with_condition),
/// [`with_recovery()`](Retry::with_recovery),
/// [`with_max_retries()`](Retry::with_max_retries) and
/// [`with_context()`](Retry::with_context).
///
/// Run it with [`run()`](Retry::run), or `.await` it directly when every
/// part is `'static`.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Retry<S, O, C, R>
where
    S: Backoff,
{
    strategy: S,
    operation: O,
    condition: C,
    recovery: R,
    max_retries: u32,
    context: Option<CallContext>,
}

impl<S, O> Retry<S, O, RetryAll, NoRecovery>
where
    S: Backoff,
{
    /// Creates a new `Retry`.
    ///
    /// - `strategy`: delays between attempts (e.g., [`ExponentialBackoff`]).
    ///   When it runs dry the loop gives up.
    /// - `operation`: a closure returning a `Future` (e.g., `|| async { ... }`).
    ///
    /// By default every error is retried, nothing runs between attempts and
    /// at most [`MAX_RETRY_ATTEMPTS`] retries are made.
    pub fn new(strategy: S, operation: O) -> Self {
        Self {
            strategy,
            operation,
            condition: RetryAll,
            recovery: NoRecovery,
            max_retries: MAX_RETRY_ATTEMPTS,
            context: None,
        }
    }
}

impl<S, O, C, R> Retry<S, O, C, R>
where
    S: Backoff,
{
    /// Sets the predicate deciding which errors are retried.
    ///
    /// Any error for which it returns `false` is handed back at once as
    /// [`RetryError::Rejected`].
    pub fn with_condition<NewC>(self, condition: NewC) -> Retry<S, O, NewC, R> {
        Retry {
            strategy: self.strategy,
            operation: self.operation,
            condition,
            recovery: self.recovery,
            max_retries: self.max_retries,
            context: self.context,
        }
    }

    /// Sets the step that runs before every retry, typically a
    /// re-authentication that refreshes the state the error invalidated.
    pub fn with_recovery<NewR>(self, recovery: NewR) -> Retry<S, O, C, NewR> {
        Retry {
            strategy: self.strategy,
            operation: self.operation,
            condition: self.condition,
            recovery,
            max_retries: self.max_retries,
            context: self.context,
        }
    }

    /// Sets how many retries follow the first attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Binds the loop to a call context. Cancellation or an elapsed deadline
    /// ends the loop with [`RetryError::Interrupted`], whatever budget is left.
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Drives the retry loop to completion.
    pub async fn run<F, T, E>(mut self) -> Result<T, RetryError<E>>
    where
        O: FnMut() -> F,
        F: Future<Output = Result<T, E>>,
        C: Condition<E>,
        R: Recovery<E>,
        E: fmt::Display,
    {
        let context = self.context.take().unwrap_or_default();
        let mut last: Option<E> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let error = match context.guard((self.operation)()).await {
                Ok(Ok(value)) => {
                    #[cfg(feature = "logging")]
                    log::trace!("Operation succeeded on attempt {}", attempt);
                    return Ok(value);
                }
                Ok(Err(error)) => error,
                Err(interrupt) => {
                    return Err(RetryError::Interrupted {
                        attempt,
                        interrupt,
                        last,
                    })
                }
            };

            #[cfg(feature = "logging")]
            log::warn!("Operation failed on attempt {} with error: {}", attempt, error);

            let recoverable = self.condition.should_retry(&error);
            match decide(attempt, self.max_retries, recoverable) {
                Decision::Retry => {}
                Decision::Reject => {
                    #[cfg(feature = "logging")]
                    log::error!("Retry failed: error is not retryable.");
                    return Err(RetryError::Rejected { attempt, error });
                }
                Decision::Exhaust => {
                    #[cfg(feature = "logging")]
                    log::error!("Retry failed: budget exhausted after {} attempts.", attempt);
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
            }

            let Some(delay) = self.strategy.next() else {
                #[cfg(feature = "logging")]
                log::error!("Retry failed: backoff strategy exhausted after {} attempts.", attempt);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    error,
                });
            };

            match context.guard(self.recovery.recover(attempt, &error)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_recovery_error)) => {
                    #[cfg(feature = "logging")]
                    log::error!("Recovery before retry {} failed: {}", attempt, _recovery_error);
                }
                Err(interrupt) => {
                    return Err(RetryError::Interrupted {
                        attempt,
                        interrupt,
                        last: Some(error),
                    })
                }
            }

            #[cfg(feature = "logging")]
            log::trace!("Retrying after delay of {:?}", delay);
            if let Err(interrupt) = sleep::pause(delay, &context).await {
                return Err(RetryError::Interrupted {
                    attempt,
                    interrupt,
                    last: Some(error),
                });
            }

            last = Some(error);
        }
    }
}

/// Lets a fully owned `Retry` be `.await`ed directly.
impl<S, O, C, R, F, T, E> IntoFuture for Retry<S, O, C, R>
where
    S: Backoff + Send + 'static,
    O: FnMut() -> F + Send + 'static,
    C: Condition<E> + Send + 'static,
    R: Recovery<E> + Send + 'static,
    R::Future: Send,
    R::Output: Send,
    R::Error: Send,
    F: Future<Output = Result<T, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
    T: Send + 'static,
{
    type Output = Result<T, RetryError<E>>;

    // We box the future to avoid complex type signatures in the return.
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send + 'static>>;

    fn into_future(self) -> <Retry<S, O, C, R> as IntoFuture>::IntoFuture {
        Box::pin(self.run())
    }
}
