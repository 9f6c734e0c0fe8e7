// Author: Jacques Murray

//! The authenticated session held by a client.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::dto::AuthToken;

/// Identifies one authenticated session in log entries.
///
/// Minted locally on every successful authentication so logs never carry
/// the access token itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An access token issued by the API, tagged with a [`SessionId`].
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    access_token: String,
    token_type: String,
    expires_in: Duration,
    issued_at: Instant,
}

impl Session {
    pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            id: SessionId::generate(),
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            expires_in,
            issued_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Whether the lifetime the API announced for the token has run out.
    /// The API may still reject the token earlier.
    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() >= self.expires_in
    }
}

impl From<AuthToken> for Session {
    fn from(token: AuthToken) -> Self {
        Self {
            token_type: token.token_type,
            ..Self::new(token.access_token, Duration::from_secs(token.expires_in))
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// The client's current session.
///
/// Replacing is a single pointer swap under a write lock, so concurrent
/// re-authentications resolve as last writer wins and readers always see a
/// whole session.
#[derive(Debug, Default)]
pub(crate) struct SessionStore {
    current: RwLock<Option<Arc<Session>>>,
}

impl SessionStore {
    pub(crate) fn current(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    pub(crate) fn current_id(&self) -> Option<SessionId> {
        self.current.read().as_ref().map(|session| session.id.clone())
    }

    pub(crate) fn replace(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        *self.current.write() = Some(session.clone());
        session
    }
}
