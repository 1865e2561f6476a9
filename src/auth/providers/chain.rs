//! Chain credential provider.
//!
//! The first call scans the sources in order and remembers the first one that
//! issues a token. Later calls go straight to that source and never fall back,
//! even if it starts failing. [`ChainProvider::reset_selection`] is the manual
//! way out.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::auth::{
    AccessToken, CredentialProvider, EnvironmentProvider, ManagedIdentityProvider,
    SourceDescriptor, SourceKind, TokenRequest, WorkloadIdentityProvider,
};
#[cfg(feature = "developer-tools")]
use crate::auth::{AzureCliProvider, AzureDeveloperCliProvider};
use crate::config::ChainConfig;
use crate::diagnostics::{DiagnosticLog, LogEntry, LogLevel};
use crate::{AggregateError, Error, ErrorCategory, Result, SourceFailure};

const CHAIN: &str = "chain";

/// How one source fared during a scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded { expires_at: DateTime<Utc> },
    Failed { category: ErrorCategory, message: String },
    /// Not called; ruled out as unavailable by an earlier scan.
    Skipped { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceAttempt {
    pub source: SourceDescriptor,
    pub outcome: AttemptOutcome,
}

/// Chain provider that tries multiple providers in order.
pub struct ChainProvider {
    providers: Vec<Arc<dyn CredentialProvider>>,
    selected: RwLock<Option<usize>>,
    /// Sources that reported `Unavailable`, by index, with the reason.
    ruled_out: RwLock<HashMap<usize, String>>,
    last_scan: RwLock<Vec<SourceAttempt>>,
    scan_lock: Mutex<()>,
    log: DiagnosticLog,
}

impl ChainProvider {
    /// Create with specified providers.
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self {
            providers: providers.into_iter().map(Arc::from).collect(),
            selected: RwLock::new(None),
            ruled_out: RwLock::new(HashMap::new()),
            last_scan: RwLock::new(Vec::new()),
            scan_lock: Mutex::new(()),
            log: DiagnosticLog::default(),
        }
    }

    /// Add a provider to the end of the chain.
    pub fn with<P: CredentialProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Use a shared log, e.g. one also fed by a `DiagnosticLayer`.
    pub fn with_log(mut self, log: DiagnosticLog) -> Self {
        self.log = log;
        self
    }

    /// Environment, workload identity, managed identity, then the developer
    /// tools, filtered by `config.selection`.
    pub fn default_chain(config: &ChainConfig) -> Result<Self> {
        let selection = config.selection;
        let mut providers: Vec<Box<dyn CredentialProvider>> = Vec::new();

        if selection.includes(SourceKind::Environment) {
            providers.push(Box::new(EnvironmentProvider::from_config(config)?));
        }
        if selection.includes(SourceKind::WorkloadIdentity) {
            providers.push(Box::new(WorkloadIdentityProvider::from_config(config)?));
        }
        if selection.includes(SourceKind::ManagedIdentity) {
            providers.push(Box::new(ManagedIdentityProvider::from_config(config)?));
        }
        #[cfg(feature = "developer-tools")]
        {
            if selection.includes(SourceKind::AzureCli) {
                providers.push(Box::new(AzureCliProvider::from_config(config)));
            }
            if selection.includes(SourceKind::AzureDeveloperCli) {
                providers.push(Box::new(AzureDeveloperCliProvider::from_config(config)));
            }
        }

        if providers.is_empty() {
            return Err(Error::config(
                "credential selection excludes every available source",
            ));
        }

        tracing::debug!(
            sources = providers.len(),
            "built default credential chain"
        );
        Ok(Self::new(providers).with_log(DiagnosticLog::new(config.diagnostics_capacity)))
    }

    /// Obtain a token, scanning the sources on first use.
    pub async fn get_token(&self, request: &TokenRequest) -> Result<AccessToken> {
        if let Some(index) = self.selected_index() {
            return self.providers[index].get_token(request, &self.log).await;
        }

        let guard = request
            .run(CHAIN, None, async { Ok::<_, Error>(self.scan_lock.lock().await) })
            .await?;

        // Another caller may have finished a scan while we waited.
        if let Some(index) = self.selected_index() {
            drop(guard);
            return self.providers[index].get_token(request, &self.log).await;
        }

        let result = self.scan(request).await;
        drop(guard);
        result
    }

    async fn scan(&self, request: &TokenRequest) -> Result<AccessToken> {
        let mut attempts = Vec::with_capacity(self.providers.len());
        let mut failures = Vec::new();

        for (index, provider) in self.providers.iter().enumerate() {
            let source = self.descriptor(index);

            if let Some(reason) = self.ruled_out_reason(index) {
                tracing::debug!(credential = provider.name(), "skipping unavailable source");
                self.log.append_with_level(
                    LogLevel::Debug,
                    provider.name(),
                    format!("skipped, unavailable in an earlier scan: {}", reason),
                );
                attempts.push(SourceAttempt {
                    source,
                    outcome: AttemptOutcome::Skipped {
                        reason: reason.clone(),
                    },
                });
                failures.push(SourceFailure {
                    credential: provider.name().to_string(),
                    error: Error::unavailable(provider.name(), reason),
                });
                continue;
            }

            match provider.get_token(request, &self.log).await {
                Ok(token) => {
                    attempts.push(SourceAttempt {
                        source,
                        outcome: AttemptOutcome::Succeeded {
                            expires_at: token.expires_at,
                        },
                    });
                    *write(&self.selected) = Some(index);
                    *write(&self.last_scan) = attempts;
                    tracing::info!(
                        credential = provider.name(),
                        index,
                        "selected credential source"
                    );
                    return Ok(token);
                }
                Err(error) => {
                    tracing::debug!(credential = provider.name(), %error, "source failed, trying next");
                    if let Error::Unavailable { reason, .. } = &error {
                        write(&self.ruled_out).insert(index, reason.clone());
                    }
                    attempts.push(SourceAttempt {
                        source,
                        outcome: AttemptOutcome::Failed {
                            category: error.category(),
                            message: error.to_string(),
                        },
                    });
                    failures.push(SourceFailure {
                        credential: provider.name().to_string(),
                        error,
                    });
                }
            }
        }

        *write(&self.last_scan) = attempts;
        let aggregate = AggregateError::new(failures);
        tracing::warn!(sources = self.providers.len(), "no credential source produced a token");
        Err(Error::Aggregate(aggregate))
    }

    fn selected_index(&self) -> Option<usize> {
        *read(&self.selected)
    }

    fn ruled_out_reason(&self, index: usize) -> Option<String> {
        read(&self.ruled_out).get(&index).cloned()
    }

    fn descriptor(&self, index: usize) -> SourceDescriptor {
        let provider = &self.providers[index];
        SourceDescriptor {
            index,
            name: provider.name().to_string(),
            kind: provider.kind(),
        }
    }

    /// The source every call now goes to, if a scan has succeeded.
    pub fn selected_source(&self) -> Option<SourceDescriptor> {
        self.selected_index().map(|index| self.descriptor(index))
    }

    /// All sources in priority order.
    pub fn sources(&self) -> Vec<SourceDescriptor> {
        (0..self.providers.len()).map(|index| self.descriptor(index)).collect()
    }

    /// Per-source outcomes of the most recent scan.
    pub fn last_scan(&self) -> Vec<SourceAttempt> {
        read(&self.last_scan).clone()
    }

    /// Forget the selected source and any sources ruled out as unavailable;
    /// the next call scans again.
    ///
    /// Probe gates belong to their sources and are not reset: an IMDS endpoint
    /// that failed its probe stays closed for the life of the provider.
    pub fn reset_selection(&self) {
        let previous = write(&self.selected).take();
        write(&self.ruled_out).clear();
        if let Some(index) = previous {
            let name = self.providers[index].name();
            tracing::info!(credential = name, "credential selection reset");
            self.log.append_with_level(
                LogLevel::Info,
                CHAIN,
                format!("selection of {} reset by operator", name),
            );
        }
    }

    pub fn log(&self) -> &DiagnosticLog {
        &self.log
    }

    pub fn diagnostic_log(&self) -> Vec<LogEntry> {
        self.log.snapshot()
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }
}

impl std::fmt::Debug for ChainProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainProvider")
            .field("sources", &self.sources())
            .field("selected", &self.selected_index())
            .finish_non_exhaustive()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
