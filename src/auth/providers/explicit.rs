//! Explicit credential provider.

use async_trait::async_trait;

use crate::auth::provider::log_outcome;
use crate::auth::{AccessToken, CredentialProvider, SourceKind, TokenRequest};
use crate::diagnostics::DiagnosticLog;
use crate::{Error, Result};

/// Provider with an explicitly set token.
#[derive(Debug)]
pub struct ExplicitProvider {
    name: String,
    token: AccessToken,
}

impl ExplicitProvider {
    pub fn new(token: AccessToken) -> Self {
        Self {
            name: SourceKind::Explicit.as_str().to_string(),
            token,
        }
    }

    /// Token valid for one hour.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new(AccessToken::expiring_in(
            token,
            chrono::Duration::hours(1),
            Vec::new(),
        ))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl CredentialProvider for ExplicitProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Explicit
    }

    async fn get_token(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken> {
        let result = if self.token.is_expired() {
            Err(Error::unavailable(&self.name, "configured token has expired"))
        } else {
            let mut token = self.token.clone();
            token.scopes = request.scopes().to_vec();
            Ok(token)
        };
        log_outcome(log, &self.name, std::time::Duration::ZERO, &result);
        result
    }
}
