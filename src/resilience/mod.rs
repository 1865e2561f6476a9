//! Retry and probe policies for credential discovery.
//!
//! [`RetryPolicy`] is a plain value with a pure delay function. [`ProbeGate`]
//! is the single-shot circuit breaker placed in front of metadata endpoints,
//! and [`ProbeAwarePolicy`] combines the two.

mod backoff;
mod probe;

pub use backoff::RetryPolicy;
pub use probe::{Admission, ProbeAwarePolicy, ProbeGate, ProbeState, ProbeTicket};

use std::future::Future;

use crate::auth::TokenRequest;
use crate::{Error, Result};
use crate::diagnostics::{DiagnosticLog, LogLevel};

impl RetryPolicy {
    /// Run `operation` until it succeeds, fails with a non-transient error, or
    /// the retry budget is spent.
    ///
    /// `operation` receives the zero-based attempt number. Every attempt is
    /// bounded by `attempt_timeout` and the request deadline. Backoff sleeps are
    /// bounded by the deadline and cancellation; a deadline that would expire
    /// mid-sleep ends the loop with a timeout naming the last failure.
    pub async fn execute<T, F, Fut>(
        &self,
        request: &TokenRequest,
        log: &DiagnosticLog,
        credential: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = request
                .run(credential, Some(self.attempt_timeout), operation(attempt))
                .await;
            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.should_retry(attempt, &error) {
                if attempt > 0 && error.is_retryable() {
                    tracing::warn!(credential, attempts = attempt + 1, "retry budget exhausted");
                    log.append_with_level(
                        LogLevel::Warning,
                        credential,
                        format!("giving up after {} attempts: {}", attempt + 1, error),
                    );
                }
                return Err(error);
            }

            let delay = self.delay_for(attempt);
            tracing::debug!(
                credential,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                %error,
                "transient failure, backing off"
            );
            log.append_with_level(
                LogLevel::Warning,
                credential,
                format!(
                    "attempt {} failed: {}; retrying in {}ms",
                    attempt + 1,
                    error,
                    delay.as_millis()
                ),
            );

            if let Err(cut_short) = request.sleep(credential, delay).await {
                let reason = match cut_short {
                    Error::Timeout { message, .. } => message,
                    other => other.to_string(),
                };
                return Err(Error::timeout(
                    credential,
                    format!("{} after attempt {}: {}", reason, attempt + 1, error),
                ));
            }
            attempt += 1;
        }
    }
}
