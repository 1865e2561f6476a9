//! Managed identity provider (IMDS and App Service endpoints).
//!
//! The IMDS endpoint is link-local and, off Azure, requests to it hang until
//! the connect timeout. The provider therefore puts IMDS behind a
//! [`ProbeAwarePolicy`]: the first request is a single short attempt, and only
//! if the endpoint answered do later requests use the normal retry schedule.
//! A failed probe makes every later call fail fast without network I/O.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use url::Url;

use super::http::{self, Endpoint};
use crate::auth::provider::log_outcome;
use crate::auth::{AccessToken, CredentialProvider, SourceKind, TokenRequest};
use crate::config::ChainConfig;
use crate::diagnostics::DiagnosticLog;
use crate::resilience::{Admission, ProbeAwarePolicy, ProbeState, RetryPolicy};
use crate::{Error, Result};

const NAME: &str = "managed_identity";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Where the managed identity token comes from.
#[derive(Clone)]
pub enum ManagedIdentityEndpoint {
    /// Instance Metadata Service on VMs, scale sets and AKS nodes.
    Imds { url: Url },
    /// App Service, Functions and Container Apps.
    AppService { url: Url, header: SecretString },
}

impl ManagedIdentityEndpoint {
    pub fn url(&self) -> &Url {
        match self {
            ManagedIdentityEndpoint::Imds { url } | ManagedIdentityEndpoint::AppService { url, .. } => {
                url
            }
        }
    }

    pub fn is_imds(&self) -> bool {
        matches!(self, ManagedIdentityEndpoint::Imds { .. })
    }
}

impl fmt::Debug for ManagedIdentityEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagedIdentityEndpoint::Imds { url } => {
                f.debug_struct("Imds").field("url", &url.as_str()).finish()
            }
            ManagedIdentityEndpoint::AppService { url, .. } => f
                .debug_struct("AppService")
                .field("url", &url.as_str())
                .finish_non_exhaustive(),
        }
    }
}

pub struct ManagedIdentityProvider {
    endpoint: ManagedIdentityEndpoint,
    client_id: Option<String>,
    policy: ProbeAwarePolicy,
    probe_timeout: Duration,
    client: reqwest::Client,
}

impl ManagedIdentityProvider {
    pub fn new(endpoint: ManagedIdentityEndpoint) -> Result<Self> {
        Ok(Self {
            endpoint,
            client_id: None,
            policy: ProbeAwarePolicy::new(RetryPolicy::default()),
            probe_timeout: Duration::from_secs(1),
            client: http::default_client()?,
        })
    }

    /// IMDS provider for the given token endpoint URL.
    pub fn imds(url: Url) -> Result<Self> {
        Self::new(ManagedIdentityEndpoint::Imds { url })
    }

    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        let mi = &config.managed_identity;
        let endpoint = match (&mi.identity_endpoint, &mi.identity_header) {
            (Some(endpoint), Some(header)) => ManagedIdentityEndpoint::AppService {
                url: Url::parse(endpoint).map_err(|e| {
                    Error::config(format!("Invalid IDENTITY_ENDPOINT {}: {}", endpoint, e))
                })?,
                header: header.clone(),
            },
            _ => ManagedIdentityEndpoint::Imds {
                url: mi.imds_token_url()?,
            },
        };

        let mut provider = Self::new(endpoint)?
            .with_retry(config.retry.clone())
            .with_probe_timeout(mi.probe_timeout);
        provider.client_id = mi.client_id.clone();
        Ok(provider)
    }

    /// Request a user-assigned identity.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Replace the retry policy. Resets the probe gate.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.policy = ProbeAwarePolicy::new(retry);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &ManagedIdentityEndpoint {
        &self.endpoint
    }

    /// Current probe state. App Service endpoints are never probed and stay `Untested`.
    pub fn probe_state(&self) -> ProbeState {
        self.policy.gate().state()
    }

    async fn fetch(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken> {
        let resource = request.resource(NAME)?;
        match &self.endpoint {
            ManagedIdentityEndpoint::Imds { url } => {
                self.imds_token(url, &resource, request, log).await
            }
            ManagedIdentityEndpoint::AppService { url, header } => {
                let resource = resource.as_str();
                self.policy
                    .base()
                    .execute(request, log, NAME, |_| {
                        self.app_service_call(url, header, resource, request.scopes())
                    })
                    .await
            }
        }
    }

    async fn imds_token(
        &self,
        url: &Url,
        resource: &str,
        request: &TokenRequest,
        log: &DiagnosticLog,
    ) -> Result<AccessToken> {
        match self.policy.admit(request, NAME).await? {
            Admission::Closed(reason) => Err(Error::unavailable(
                NAME,
                format!("IMDS endpoint skipped, earlier probe failed: {}", reason),
            )),
            Admission::Probe(ticket) => {
                tracing::debug!(
                    url = %url,
                    timeout_ms = self.probe_timeout.as_millis() as u64,
                    "probing IMDS"
                );
                let result = request
                    .run(
                        NAME,
                        Some(self.probe_timeout),
                        self.imds_call(url, resource, request.scopes()),
                    )
                    .await;

                match &result {
                    Err(e) if !reached_endpoint(e) => ticket.fail(e.to_string()),
                    _ => ticket.succeed(),
                }

                result.map_err(|e| match e {
                    Error::Network { message, .. } => Error::unavailable(
                        NAME,
                        format!("IMDS endpoint unreachable: {}", message),
                    ),
                    other => other,
                })
            }
            admission @ Admission::Open => {
                self.policy
                    .policy_for(&admission)
                    .execute(request, log, NAME, |_| {
                        self.imds_call(url, resource, request.scopes())
                    })
                    .await
            }
        }
    }

    async fn imds_call(&self, url: &Url, resource: &str, scopes: &[String]) -> Result<AccessToken> {
        let mut query = vec![("api-version", IMDS_API_VERSION), ("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let builder = self
            .client
            .get(url.clone())
            .header("Metadata", "true")
            .query(&query);
        let response = http::send(NAME, builder).await?;
        http::read_token(NAME, Endpoint::ManagedIdentity, response, scopes).await
    }

    async fn app_service_call(
        &self,
        url: &Url,
        header: &SecretString,
        resource: &str,
        scopes: &[String],
    ) -> Result<AccessToken> {
        let mut query = vec![("api-version", APP_SERVICE_API_VERSION), ("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let builder = self
            .client
            .get(url.clone())
            .header("X-IDENTITY-HEADER", header.expose_secret())
            .query(&query);
        let response = http::send(NAME, builder).await?;
        http::read_token(NAME, Endpoint::ManagedIdentity, response, scopes).await
    }
}

/// Whether the error proves an HTTP response came back.
fn reached_endpoint(error: &Error) -> bool {
    !matches!(error, Error::Network { .. } | Error::Timeout { .. })
}

impl fmt::Debug for ManagedIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedIdentityProvider")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("probe_state", &self.probe_state())
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for ManagedIdentityProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::ManagedIdentity
    }

    async fn get_token(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken> {
        let started = Instant::now();
        let result = self.fetch(request, log).await;
        log_outcome(log, NAME, started.elapsed(), &result);
        result
    }
}
