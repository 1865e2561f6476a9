//! Credential provider trait.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::{AccessToken, TokenRequest};
use crate::Result;
use crate::diagnostics::{DiagnosticLog, LogLevel};

/// Mechanism family a provider belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Environment,
    WorkloadIdentity,
    ManagedIdentity,
    AzureCli,
    AzureDeveloperCli,
    Explicit,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Environment => "environment",
            SourceKind::WorkloadIdentity => "workload_identity",
            SourceKind::ManagedIdentity => "managed_identity",
            SourceKind::AzureCli => "azure_cli",
            SourceKind::AzureDeveloperCli => "azure_developer_cli",
            SourceKind::Explicit => "explicit",
        }
    }

    /// Sources backed by a developer's interactive login.
    pub fn is_developer_tool(&self) -> bool {
        matches!(self, SourceKind::AzureCli | SourceKind::AzureDeveloperCli)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a provider inside a chain, for viewers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Position in the chain's priority order.
    pub index: usize,
    pub name: String,
    pub kind: SourceKind,
}

/// Trait for obtaining tokens from one mechanism.
///
/// Implementations are immutable once built; per-instance state such as a
/// probe gate uses interior synchronisation. Each call appends at least one
/// entry to `log` describing its outcome.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Provider name for debugging.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Obtain a token for `request`.
    async fn get_token(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken>;
}

/// Append the outcome of one provider call. Never records the token itself.
pub(crate) fn log_outcome(
    log: &DiagnosticLog,
    credential: &str,
    elapsed: Duration,
    result: &Result<AccessToken>,
) {
    match result {
        Ok(token) => {
            tracing::info!(
                credential,
                elapsed_ms = elapsed.as_millis() as u64,
                expires_at = %token.expires_at,
                "token issued"
            );
            log.append_with_level(
                LogLevel::Info,
                credential,
                format!(
                    "issued token for [{}] in {}ms, expires {}",
                    token.scopes.join(", "),
                    elapsed.as_millis(),
                    token.expires_at.to_rfc3339()
                ),
            );
        }
        Err(error) => {
            let level = if error.is_unavailable() {
                LogLevel::Info
            } else {
                LogLevel::Warning
            };
            tracing::debug!(credential, elapsed_ms = elapsed.as_millis() as u64, %error, "no token");
            log.append_with_level(
                level,
                credential,
                format!("failed after {}ms: {}", elapsed.as_millis(), error),
            );
        }
    }
}
