//! Workload identity federation (Kubernetes projected service account token).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use super::http;
use crate::auth::provider::log_outcome;
use crate::auth::{AccessToken, CredentialProvider, SourceKind, TokenRequest};
use crate::config::ChainConfig;
use crate::diagnostics::DiagnosticLog;
use crate::resilience::RetryPolicy;
use crate::{Error, Result};

const NAME: &str = "workload_identity";
const JWT_BEARER: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[derive(Debug)]
struct Federation {
    tenant_id: String,
    client_id: String,
    token_file: PathBuf,
}

/// Exchanges a federated assertion file for an Entra ID token.
///
/// The file is re-read on every call; the orchestrator rotates it in place.
#[derive(Debug)]
pub struct WorkloadIdentityProvider {
    settings: std::result::Result<Federation, Vec<&'static str>>,
    authority_host: Url,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl WorkloadIdentityProvider {
    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        let settings = match (
            &config.tenant_id,
            &config.client_id,
            &config.federated_token_file,
        ) {
            (Some(tenant_id), Some(client_id), Some(token_file)) => Ok(Federation {
                tenant_id: tenant_id.clone(),
                client_id: client_id.clone(),
                token_file: token_file.clone(),
            }),
            (tenant_id, client_id, token_file) => Err([
                ("AZURE_TENANT_ID", tenant_id.is_none()),
                ("AZURE_CLIENT_ID", client_id.is_none()),
                ("AZURE_FEDERATED_TOKEN_FILE", token_file.is_none()),
            ]
            .into_iter()
            .filter_map(|(var, missing)| missing.then_some(var))
            .collect()),
        };

        Ok(Self {
            settings,
            authority_host: config.authority_url()?,
            retry: config.retry.clone(),
            client: http::default_client()?,
        })
    }

    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        token_file: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::from_config(
            &ChainConfig::default()
                .with_tenant_id(tenant_id)
                .with_client_id(client_id)
                .with_federated_token_file(token_file),
        )
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

    async fn fetch(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken> {
        let settings = self.settings.as_ref().map_err(|missing| {
            Error::unavailable(
                NAME,
                format!("workload identity is not configured, missing {}", missing.join(", ")),
            )
        })?;
        let assertion = read_assertion(&settings.token_file).await?;

        self.retry
            .execute(request, log, NAME, |_| {
                let assertion = assertion.as_str();
                async move {
                    let form = [
                        ("client_assertion_type", JWT_BEARER),
                        ("client_assertion", assertion),
                        ("client_id", settings.client_id.as_str()),
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
                }
            })
            .await
    }
}

async fn read_assertion(path: &Path) -> Result<String> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::unavailable(
            NAME,
            format!("cannot read federated token file {}: {}", path.display(), e),
        )
    })?;
    let assertion = contents.trim();
    if assertion.is_empty() {
        return Err(Error::unavailable(
            NAME,
            format!("federated token file {} is empty", path.display()),
        ));
    }
    Ok(assertion.to_string())
}

#[async_trait]
impl CredentialProvider for WorkloadIdentityProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::WorkloadIdentity
    }

    async fn get_token(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken> {
        let started = Instant::now();
        let result = self.fetch(request, log).await;
        log_outcome(log, NAME, started.elapsed(), &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> TokenRequest {
        TokenRequest::new(["https://management.azure.com/.default"])
    }

    #[tokio::test]
    async fn test_unconfigured_is_unavailable() {
        let provider = WorkloadIdentityProvider::from_config(
            &ChainConfig::default().with_tenant_id("t").with_client_id("c"),
        )
        .unwrap();
        let err = provider
            .get_token(&request(), &DiagnosticLog::default())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("AZURE_FEDERATED_TOKEN_FILE"));
    }

    #[tokio::test]
    async fn test_missing_token_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let provider =
            WorkloadIdentityProvider::new("t", "c", dir.path().join("absent-token")).unwrap();
        let err = provider
            .get_token(&request(), &DiagnosticLog::default())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("absent-token"));
    }

    #[tokio::test]
    async fn test_exchanges_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .and(body_string_contains("client_assertion=header.payload.signature"))
            .and(body_string_contains("client-assertion-type%3Ajwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"token_type":"Bearer","expires_in":3600,"access_token":"federated"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "header.payload.signature").unwrap();

        let provider = WorkloadIdentityProvider::new("contoso", "app", file.path())
            .unwrap()
            .with_authority_host(Url::parse(&format!("{}/", server.uri())).unwrap());
        let log = DiagnosticLog::new(4);
        let token = provider.get_token(&request(), &log).await.unwrap();

        assert_eq!(token.secret().expose_secret(), "federated");
        assert_eq!(log.len(), 1);
    }
}
