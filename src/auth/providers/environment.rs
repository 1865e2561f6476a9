//! Environment variable (client secret) credential provider.

use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use url::Url;

use super::http;
use crate::auth::provider::log_outcome;
use crate::auth::{AccessToken, CredentialProvider, SourceKind, TokenRequest};
use crate::config::ChainConfig;
use crate::diagnostics::DiagnosticLog;
use crate::resilience::RetryPolicy;
use crate::{Error, Result};

const NAME: &str = "environment";

struct ClientSecret {
    tenant_id: String,
    client_id: String,
    secret: SecretString,
}

/// Service principal credentials from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`
/// and `AZURE_CLIENT_SECRET`.
///
/// A provider built without all three is still valid; it reports itself
/// unavailable so the chain moves on.
pub struct EnvironmentProvider {
    settings: std::result::Result<ClientSecret, Vec<&'static str>>,
    authority_host: Url,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl EnvironmentProvider {
    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        let settings = match (&config.tenant_id, &config.client_id, &config.client_secret) {
            (Some(tenant_id), Some(client_id), Some(secret)) => Ok(ClientSecret {
                tenant_id: tenant_id.clone(),
                client_id: client_id.clone(),
                secret: secret.clone(),
            }),
            (tenant_id, client_id, secret) => {
                let mut missing = Vec::new();
                if tenant_id.is_none() {
                    missing.push("AZURE_TENANT_ID");
                }
                if client_id.is_none() {
                    missing.push("AZURE_CLIENT_ID");
                }
                if secret.is_none() {
                    missing.push("AZURE_CLIENT_SECRET");
                }
                Err(missing)
            }
        };

        Ok(Self {
            settings,
            authority_host: config.authority_url()?,
            retry: config.retry.clone(),
            client: http::default_client()?,
        })
    }

    /// Create provider from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_config(&ChainConfig::from_env()?)
    }

    /// Create with explicit service principal credentials.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self> {
        let config = ChainConfig::default()
            .with_tenant_id(tenant_id)
            .with_client_id(client_id)
            .with_client_secret(secret);
        Self::from_config(&config)
    }

    pub fn with_authority_host(mut self, host: Url) -> Self {
        self.authority_host = host;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.settings.is_ok()
    }

    async fn fetch(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken> {
        let settings = self.settings.as_ref().map_err(|missing| {
            Error::unavailable(
                NAME,
                format!("environment is not configured, missing {}", missing.join(", ")),
            )
        })?;

        self.retry
            .execute(request, log, NAME, |_| async move {
                let form = [
                    ("client_id", settings.client_id.as_str()),
                    ("client_secret", settings.secret.expose_secret()),
                ];
                http::authority_token(
                    NAME,
                    &self.client,
                    &self.authority_host,
                    &settings.tenant_id,
                    &form,
                    request.scopes(),
                )
                .await
            })
            .await
    }
}

impl fmt::Debug for EnvironmentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("EnvironmentProvider");
        match &self.settings {
            Ok(settings) => debug
                .field("tenant_id", &settings.tenant_id)
                .field("client_id", &settings.client_id)
                .field("has_secret", &true),
            Err(missing) => debug.field("missing", missing),
        };
        debug.field("authority_host", &self.authority_host.as_str()).finish()
    }
}

#[async_trait]
impl CredentialProvider for EnvironmentProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Environment
    }

    async fn get_token(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken> {
        let started = Instant::now();
        let result = self.fetch(request, log).await;
        log_outcome(log, NAME, started.elapsed(), &result);
        result
    }
}
