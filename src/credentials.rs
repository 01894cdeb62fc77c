//! Credential source collaborator.
//!
//! The multiplexer never invents, refreshes or validates credentials. It asks
//! a [`CredentialSource`] for the current [`Credentials`] before every
//! connection attempt and reports explicit rejections back to it through
//! [`CredentialSource::authentication_failed`], so that whoever issues tokens
//! can re-issue them and restart the feed.

use std::fmt;
use std::sync::RwLock;

use crate::error::{FeedError, Result};

/// Identity used to open the upstream connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The Dhan client ID.
    pub client_id: String,
    /// Access token (JWT).
    pub token: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            token: token.into(),
        }
    }

    /// Read `DHAN_CLIENT_ID` and `DHAN_ACCESS_TOKEN` from the environment.
    pub fn from_env() -> Result<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| FeedError::Config(format!("{name} is not set")))
        };
        Ok(Self::new(read("DHAN_CLIENT_ID")?, read("DHAN_ACCESS_TOKEN")?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Supplies credentials on demand and receives rejection notices.
pub trait CredentialSource: Send + Sync + 'static {
    /// Current credentials. Called before every connection attempt.
    fn credentials(&self) -> Credentials;

    /// Called once when the provider explicitly rejects the credentials.
    fn authentication_failed(&self, reason: &str) {
        let _ = reason;
    }
}

impl<T: CredentialSource> CredentialSource for std::sync::Arc<T> {
    fn credentials(&self) -> Credentials {
        (**self).credentials()
    }

    fn authentication_failed(&self, reason: &str) {
        (**self).authentication_failed(reason);
    }
}

/// Fixed credentials.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    pub fn new(client_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self(Credentials::new(client_id, token))
    }
}

impl From<Credentials> for StaticCredentials {
    fn from(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&self) -> Credentials {
        self.0.clone()
    }

    fn authentication_failed(&self, reason: &str) {
        tracing::error!(
            client_id = %self.0.client_id,
            reason,
            "Static credentials rejected by upstream"
        );
    }
}

/// Credentials whose token can be replaced after a rejection.
#[derive(Debug)]
pub struct SharedCredentials {
    inner: RwLock<Credentials>,
}

impl SharedCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: RwLock::new(credentials),
        }
    }

    /// Replace the access token (e.g. after renewal).
    pub fn set_token(&self, token: impl Into<String>) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.token = token.into();
    }
}

impl CredentialSource for SharedCredentials {
    fn credentials(&self) -> Credentials {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn authentication_failed(&self, reason: &str) {
        tracing::warn!(reason, "Shared credentials rejected; awaiting a new token");
    }
}
