//! Token request: scopes plus the caller's deadline and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

const DEFAULT_SUFFIX: &str = "/.default";

/// A request for a token covering `scopes`.
///
/// Every network call made on behalf of the request is bounded by its deadline
/// and aborted when its cancellation token fires.
#[derive(Clone, Debug)]
pub struct TokenRequest {
    scopes: Vec<String>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl TokenRequest {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Single-resource form of the scopes, as IMDS and the Azure CLI expect.
    ///
    /// `https://vault.azure.net/.default` becomes `https://vault.azure.net`.
    pub fn resource(&self, credential: &str) -> Result<String> {
        let [scope] = self.scopes.as_slice() else {
            return Err(Error::config(format!(
                "{} requires exactly one scope, got {}",
                credential,
                self.scopes.len()
            )));
        };
        validate_scope(scope)?;
        Ok(scope
            .strip_suffix(DEFAULT_SUFFIX)
            .unwrap_or(scope)
            .to_string())
    }

    /// All scopes, each checked to be safe on a command line.
    pub(crate) fn validated_scopes(&self, credential: &str) -> Result<&[String]> {
        if self.scopes.is_empty() {
            return Err(Error::config(format!("{} requires at least one scope", credential)));
        }
        for scope in &self.scopes {
            validate_scope(scope)?;
        }
        Ok(&self.scopes)
    }

    /// Drive `fut` to completion within the request deadline, an optional
    /// per-call `limit`, and the cancellation token.
    pub(crate) async fn run<T, F>(&self, credential: &str, limit: Option<Duration>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::timeout(credential, "request was cancelled"));
        }

        let limit_deadline = limit.map(|limit| Instant::now() + limit);
        let deadline = match (self.deadline, limit_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let bounded = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut).await.map_err(|_| {
                    let limited = limit_deadline == Some(deadline);
                    match limit {
                        Some(limit) if limited => Error::timeout(
                            credential,
                            format!("no response within {}ms", limit.as_millis()),
                        ),
                        _ => Error::timeout(credential, "request deadline exceeded"),
                    }
                })?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::timeout(credential, "request was cancelled")),
            result = bounded => result,
        }
    }

    /// Sleep for `delay` unless the deadline would pass first.
    pub(crate) async fn sleep(&self, credential: &str, delay: Duration) -> Result<()> {
        if let Some(remaining) = self.remaining()
            && remaining < delay
        {
            return Err(Error::timeout(
                credential,
                format!(
                    "request deadline expires before the next retry ({}ms backoff)",
                    delay.as_millis()
                ),
            ));
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::timeout(credential, "request was cancelled")),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn validate_scope(scope: &str) -> Result<()> {
    let valid = !scope.is_empty()
        && !scope.starts_with('-')
        && scope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '/'));
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!("invalid scope: {:?}", scope)))
    }
}
