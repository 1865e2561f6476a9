//! Access token type.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;

/// Bearer token issued by a credential source.
///
/// The secret is only reachable through [`AccessToken::secret`]; `Debug`
/// and logs carry issuance metadata only.
#[derive(Clone)]
pub struct AccessToken {
    token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>, scopes: Vec<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at,
            scopes,
        }
    }

    /// Token valid for `lifetime` from now.
    pub fn expiring_in(token: impl Into<String>, lifetime: Duration, scopes: Vec<String>) -> Self {
        Self::new(token, Utc::now() + lifetime, scopes)
    }

    pub fn secret(&self) -> &SecretString {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check if token needs refresh (within 5 minutes of expiry).
    pub fn needs_refresh(&self) -> bool {
        Utc::now() >= self.expires_at - Duration::minutes(5)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}
