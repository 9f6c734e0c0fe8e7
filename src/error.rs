// Author: Jacques Murray

//! Error types for the client and the retry engine.

use std::fmt;

use thiserror::Error;

use crate::classify::ErrorCode;
use crate::context::Interrupt;
use crate::dto::ErrorEnvelope;

/// An application error reported by the BCA API in its error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// HTTP status of the response.
    pub status: u16,
    /// `ErrorCode` from the envelope, e.g. `ESB-14-009`. Empty when the body
    /// was not an envelope.
    pub code: String,
    /// English error message, or the raw body when it could not be decoded.
    pub message: String,
}

impl RemoteError {
    /// Builds the error from a non-success response body.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => Self {
                status,
                code: envelope.error_code,
                message: envelope.error_message.english,
            },
            Err(_) => Self {
                status,
                code: String::new(),
                message: String::from_utf8_lossy(body).into_owned(),
            },
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_empty() {
            write!(f, "HTTP {}: {}", self.status, self.message)
        } else {
            write!(f, "{} (HTTP {}): {}", self.code, self.status, self.message)
        }
    }
}

/// Errors returned by [`Client`](crate::Client).
#[derive(Debug, Error)]
pub enum Error {
    /// The API answered with an error envelope.
    #[error("BCA API error {0}")]
    Remote(RemoteError),

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A success response whose body did not match the expected shape.
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The call context was cancelled or ran past its deadline.
    #[error("{interrupt}")]
    Interrupted {
        interrupt: Interrupt,
        /// The error of the last completed attempt, if any.
        #[source]
        last: Option<Box<Error>>,
    },

    /// Every allowed attempt failed with the recoverable session error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    /// A business call was made before any session existed.
    #[error("no session: authenticate first")]
    NotAuthenticated,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("log sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn interrupted(interrupt: Interrupt) -> Self {
        Self::Interrupted {
            interrupt,
            last: None,
        }
    }

    /// The remote error code behind this error, looking through
    /// [`Error::Exhausted`] and the last attempt of [`Error::Interrupted`].
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Remote(remote) if !remote.code.is_empty() => Some(&remote.code),
            Self::Exhausted { last, .. } => last.code(),
            Self::Interrupted {
                last: Some(last), ..
            } => last.code(),
            _ => None,
        }
    }

    /// `true` when the call gave up after spending its whole retry budget.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// `true` when the call context stopped the call.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

impl ErrorCode for Error {
    fn error_code(&self) -> Option<&str> {
        match self {
            Self::Remote(remote) => Some(&remote.code),
            _ => None,
        }
    }
}

impl From<RetryError<Error>> for Error {
    fn from(err: RetryError<Error>) -> Self {
        match err {
            RetryError::Rejected { error, .. } => error,
            RetryError::Exhausted { attempts, error } => Self::Exhausted {
                attempts,
                last: Box::new(error),
            },
            RetryError::Interrupted {
                interrupt, last, ..
            } => Self::Interrupted {
                interrupt,
                last: last.map(Box::new),
            },
        }
    }
}

/// Why [`Retry`](crate::Retry) stopped without a value.
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// The error was not retryable. Returned on the attempt that produced it.
    Rejected { attempt: u32, error: E },
    /// The error was retryable but no attempts were left.
    Exhausted { attempts: u32, error: E },
    /// The call context was cancelled or its deadline passed.
    Interrupted {
        attempt: u32,
        interrupt: Interrupt,
        /// The error of the last attempt that completed before the interrupt.
        last: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts that were started.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Rejected { attempt, .. } | Self::Interrupted { attempt, .. } => *attempt,
            Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The last error the operation returned.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Rejected { error, .. } | Self::Exhausted { error, .. } => Some(error),
            Self::Interrupted { last, .. } => last.as_ref(),
        }
    }

    /// Unwraps the last error the operation returned.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Rejected { error, .. } | Self::Exhausted { error, .. } => Some(error),
            Self::Interrupted { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { error, .. } => write!(f, "{error}"),
            Self::Exhausted { attempts, error } => {
                write!(f, "gave up after {attempts} attempts: {error}")
            }
            Self::Interrupted {
                attempt, interrupt, ..
            } => write!(f, "{interrupt} during attempt {attempt}"),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error().map(|e| e as &(dyn std::error::Error + 'static))
    }
}
