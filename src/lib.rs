//! # azure-credential-chain
//!
//! Credential resolution for Azure workloads.
//!
//! A [`ChainProvider`] walks an ordered list of credential sources (environment
//! service principal, workload identity, managed identity, developer tools) and
//! remembers the first one that issues a token. Managed identity is guarded by a
//! single-shot probe so hosts without an instance metadata endpoint pay for one
//! short attempt, not a retry storm.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use azure_credential_chain::{ChainConfig, ChainProvider, TokenRequest};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), azure_credential_chain::Error> {
//!     let config = ChainConfig::from_env()?;
//!     let chain = ChainProvider::default_chain(&config)?;
//!
//!     let request = TokenRequest::new(["https://management.azure.com/.default"])
//!         .with_timeout(Duration::from_secs(30));
//!     let token = chain.get_token(&request).await?;
//!
//!     println!("token expires at {}", token.expires_at);
//!     if let Some(source) = chain.selected_source() {
//!         println!("selected: {}", source.name);
//!     }
//!     for entry in chain.diagnostic_log() {
//!         println!("{}", entry);
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod auth;
pub mod config;
pub mod diagnostics;
pub mod prelude;
pub mod resilience;

use std::fmt;

pub use auth::{
    AccessToken, AttemptOutcome, ChainProvider, CredentialProvider, EnvironmentProvider,
    ExplicitProvider, ManagedIdentityEndpoint, ManagedIdentityProvider, SourceAttempt,
    SourceDescriptor, SourceKind, TokenRequest, WorkloadIdentityProvider,
};
#[cfg(feature = "developer-tools")]
pub use auth::{AzureCliProvider, AzureDeveloperCliProvider};
pub use config::{ChainConfig, ManagedIdentityConfig, SourceSelection};
#[cfg(feature = "tracing-layer")]
pub use diagnostics::DiagnosticLayer;
pub use diagnostics::{DiagnosticLog, LogEntry, LogLevel};
pub use resilience::{Admission, ProbeAwarePolicy, ProbeGate, ProbeState, RetryPolicy};

/// Error type for credential resolution.
///
/// Every variant produced by a credential source names the source, so an
/// [`AggregateError`] can tell an operator which mechanism almost worked.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The mechanism does not apply in this environment. Never retried.
    #[error("{credential} is unavailable: {reason}")]
    Unavailable { credential: String, reason: String },

    /// The identity provider rejected the credentials.
    #[error("{credential} authentication failed (HTTP {code}): {message}", code = http_status(.status))]
    Unauthorized {
        credential: String,
        status: Option<u16>,
        message: String,
    },

    /// Deadline exceeded or the request was cancelled.
    #[error("{credential} timed out: {message}")]
    Timeout { credential: String, message: String },

    /// Token endpoint answered with a transient status (5xx, 429, 410).
    #[error("{credential} service error (HTTP {status}): {message}")]
    Service {
        credential: String,
        status: u16,
        message: String,
    },

    /// Connection could not be established or was reset.
    #[error("{credential} network request failed: {message}")]
    Network { credential: String, message: String },

    /// Every source in the chain failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// File system or process operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn http_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "n/a".to_string(), |s| s.to_string())
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Mechanism structurally inapplicable here
    Unavailable,
    /// Credentials rejected (401, 403, invalid client)
    Authorization,
    /// Timeouts, 5xx and connection failures that may succeed on retry
    Transient,
    /// Bad scopes, tenant ids or environment values
    Configuration,
    /// Parse, IO and aggregate failures
    Internal,
}

impl Error {
    pub fn unavailable(credential: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Unavailable {
            credential: credential.into(),
            reason: reason.into(),
        }
    }

    pub fn unauthorized(
        credential: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Error::Unauthorized {
            credential: credential.into(),
            status,
            message: message.into(),
        }
    }

    pub fn timeout(credential: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Timeout {
            credential: credential.into(),
            message: message.into(),
        }
    }

    pub fn service(credential: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Error::Service {
            credential: credential.into(),
            status,
            message: message.into(),
        }
    }

    pub fn network(credential: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Network {
            credential: credential.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unavailable { .. } => ErrorCategory::Unavailable,
            Error::Unauthorized { .. } => ErrorCategory::Authorization,
            Error::Timeout { .. } | Error::Service { .. } | Error::Network { .. } => {
                ErrorCategory::Transient
            }
            Error::Config(_) => ErrorCategory::Configuration,
            Error::Aggregate(_) | Error::Json(_) | Error::Io(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn is_unavailable(&self) -> bool {
        self.category() == ErrorCategory::Unavailable
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Unauthorized { status, .. } => *status,
            Error::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Name of the credential source that produced this error, if any.
    pub fn credential(&self) -> Option<&str> {
        match self {
            Error::Unavailable { credential, .. }
            | Error::Unauthorized { credential, .. }
            | Error::Timeout { credential, .. }
            | Error::Service { credential, .. }
            | Error::Network { credential, .. } => Some(credential),
            _ => None,
        }
    }
}

/// One source's failure inside an [`AggregateError`].
#[derive(Debug)]
pub struct SourceFailure {
    pub credential: String,
    pub error: Error,
}

/// Failure of a whole chain scan, in source priority order.
#[derive(Debug, Default)]
pub struct AggregateError {
    failures: Vec<SourceFailure>,
}

impl AggregateError {
    pub fn new(failures: Vec<SourceFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[SourceFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when every source reported itself structurally unavailable.
    pub fn all_unavailable(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(|f| f.error.is_unavailable())
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "No credential sources are configured");
        }
        write!(f, "No credential source produced a token. Tried:")?;
        for failure in &self.failures {
            write!(f, "\n- {}: {}", failure.credential, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unauthorized("environment", Some(401), "invalid_client");
        assert!(err.to_string().contains("HTTP 401"));
        assert!(err.to_string().contains("invalid_client"));

        let err = Error::unauthorized("azure_cli", None, "expired refresh token");
        assert!(err.to_string().contains("HTTP n/a"));
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::service("managed_identity", 503, "busy").is_retryable());
        assert!(Error::timeout("managed_identity", "deadline exceeded").is_retryable());
        assert!(Error::network("managed_identity", "connection reset").is_retryable());

        assert!(!Error::unauthorized("environment", Some(403), "forbidden").is_retryable());
        assert!(!Error::unavailable("azure_cli", "not installed").is_retryable());
        assert!(!Error::config("bad scope").is_retryable());
    }

    #[test]
    fn test_error_credential_and_status() {
        let err = Error::service("managed_identity", 500, "oops");
        assert_eq!(err.credential(), Some("managed_identity"));
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(Error::config("x").credential(), None);
    }

    #[test]
    fn test_aggregate_display_lists_every_source() {
        let aggregate = AggregateError::new(vec![
            SourceFailure {
                credential: "environment".into(),
                error: Error::unavailable("environment", "AZURE_TENANT_ID not set"),
            },
            SourceFailure {
                credential: "managed_identity".into(),
                error: Error::timeout("managed_identity", "probe timed out"),
            },
        ]);

        let text = Error::from(aggregate).to_string();
        let env_pos = text.find("- environment").unwrap();
        let mi_pos = text.find("- managed_identity").unwrap();
        assert!(env_pos < mi_pos);
        assert!(text.contains("AZURE_TENANT_ID not set"));
    }

    #[test]
    fn test_aggregate_all_unavailable() {
        let aggregate = AggregateError::new(vec![SourceFailure {
            credential: "azure_cli".into(),
            error: Error::unavailable("azure_cli", "not installed"),
        }]);
        assert!(aggregate.all_unavailable());
        assert!(!AggregateError::default().all_unavailable());
    }
}
