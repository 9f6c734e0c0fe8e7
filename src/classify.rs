// Author: Jacques Murray

//! Decides which remote errors are worth a re-authentication.

/// The code BCA returns when the access token is invalid or expired.
pub const INVALID_TOKEN_CODE: &str = "ESB-14-009";

/// Errors that may carry a machine-readable remote error code.
pub trait ErrorCode {
    /// The code from the remote error envelope, if this error has one.
    fn error_code(&self) -> Option<&str>;
}

/// Matches errors against the one code that signals a stale session.
///
/// Matching is exact string equality. Errors without a code (transport
/// failures, undecodable responses, cancellations) never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    sentinel: String,
}

impl ErrorClassifier {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    pub fn is_recoverable_code(&self, code: &str) -> bool {
        code == self.sentinel
    }

    pub fn is_recoverable<E>(&self, error: &E) -> bool
    where
        E: ErrorCode + ?Sized,
    {
        error
            .error_code()
            .is_some_and(|code| self.is_recoverable_code(code))
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(INVALID_TOKEN_CODE)
    }
}
