//! Credential chain configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use super::env::{env_opt, env_with_fallbacks, parse_env};
use crate::auth::SourceKind;
use crate::diagnostics::DEFAULT_CAPACITY;
use crate::resilience::RetryPolicy;
use crate::{Error, Result};

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";
pub const DEFAULT_IMDS_HOST: &str = "http://169.254.169.254";
pub const IMDS_TOKEN_PATH: &str = "/metadata/identity/oauth2/token";

#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub federated_token_file: Option<PathBuf>,
    pub authority_host: String,
    pub managed_identity: ManagedIdentityConfig,
    pub retry: RetryPolicy,
    pub selection: SourceSelection,
    /// Upper bound for a single CLI invocation.
    pub developer_tool_timeout: Duration,
    pub diagnostics_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct ManagedIdentityConfig {
    /// User-assigned identity; `None` selects the system-assigned identity.
    pub client_id: Option<String>,
    /// IMDS host, overridable for pod identity and tests.
    pub imds_host: String,
    /// App Service / Functions style endpoint. Takes precedence over IMDS.
    pub identity_endpoint: Option<String>,
    pub identity_header: Option<SecretString>,
    pub probe_timeout: Duration,
}

impl Default for ManagedIdentityConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            imds_host: DEFAULT_IMDS_HOST.to_string(),
            identity_endpoint: None,
            identity_header: None,
            probe_timeout: Duration::from_secs(1),
        }
    }
}

/// Which sources a default chain includes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceSelection {
    pub environment: bool,
    pub workload_identity: bool,
    pub managed_identity: bool,
    pub azure_cli: bool,
    pub azure_developer_cli: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            federated_token_file: None,
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            managed_identity: ManagedIdentityConfig::default(),
            retry: RetryPolicy::default(),
            selection: SourceSelection::all(),
            developer_tool_timeout: Duration::from_secs(13),
            diagnostics_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ChainConfig {
    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let retry = RetryPolicy::new(
            parse_env("AZURE_CREDENTIAL_MAX_RETRIES").unwrap_or(defaults.retry.max_retries),
            parse_env("AZURE_CREDENTIAL_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
            parse_env("AZURE_CREDENTIAL_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
        )
        .with_attempt_timeout(
            parse_env("AZURE_CREDENTIAL_ATTEMPT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.attempt_timeout),
        );

        let selection = match env_opt("AZURE_TOKEN_CREDENTIALS") {
            Some(selector) => SourceSelection::from_selector(&selector)?,
            None => SourceSelection::all(),
        };

        Ok(Self {
            tenant_id: env_opt("AZURE_TENANT_ID"),
            client_id: env_opt("AZURE_CLIENT_ID"),
            client_secret: env_opt("AZURE_CLIENT_SECRET").map(SecretString::from),
            federated_token_file: env_opt("AZURE_FEDERATED_TOKEN_FILE").map(PathBuf::from),
            authority_host: env_opt("AZURE_AUTHORITY_HOST").unwrap_or(defaults.authority_host),
            managed_identity: ManagedIdentityConfig::from_env(),
            retry,
            selection,
            developer_tool_timeout: parse_env("AZURE_CREDENTIAL_DEVELOPER_TOOL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.developer_tool_timeout),
            diagnostics_capacity: parse_env("AZURE_CREDENTIAL_DIAGNOSTICS_CAPACITY")
                .unwrap_or(defaults.diagnostics_capacity),
        })
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_federated_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.federated_token_file = Some(path.into());
        self
    }

    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into();
        self
    }

    pub fn with_imds_host(mut self, host: impl Into<String>) -> Self {
        self.managed_identity.imds_host = host.into();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.managed_identity.probe_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound on each token endpoint round trip, deadline or not.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.retry.attempt_timeout = timeout;
        self
    }

    pub fn with_selection(mut self, selection: SourceSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn exclude(mut self, kind: SourceKind) -> Self {
        self.selection = self.selection.without(kind);
        self
    }

    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }

    /// Authority host as a base URL with a trailing slash.
    pub fn authority_url(&self) -> Result<Url> {
        base_url(&self.authority_host)
    }
}

impl ManagedIdentityConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            client_id: env_with_fallbacks(&["AZURE_MANAGED_IDENTITY_CLIENT_ID", "AZURE_CLIENT_ID"]),
            imds_host: env_opt("AZURE_POD_IDENTITY_AUTHORITY_HOST").unwrap_or(defaults.imds_host),
            identity_endpoint: env_opt("IDENTITY_ENDPOINT"),
            identity_header: env_opt("IDENTITY_HEADER").map(SecretString::from),
            probe_timeout: parse_env("AZURE_CREDENTIAL_PROBE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_timeout),
        }
    }

    /// Full IMDS token endpoint URL.
    pub fn imds_token_url(&self) -> Result<Url> {
        base_url(&self.imds_host)?
            .join(IMDS_TOKEN_PATH.trim_start_matches('/'))
            .map_err(|e| Error::config(format!("Invalid IMDS host {}: {}", self.imds_host, e)))
    }
}

impl SourceSelection {
    pub fn all() -> Self {
        Self {
            environment: true,
            workload_identity: true,
            managed_identity: true,
            azure_cli: true,
            azure_developer_cli: true,
        }
    }

    pub fn none() -> Self {
        Self {
            environment: false,
            workload_identity: false,
            managed_identity: false,
            azure_cli: false,
            azure_developer_cli: false,
        }
    }

    /// Deployed-service sources only.
    pub fn production() -> Self {
        Self {
            azure_cli: false,
            azure_developer_cli: false,
            ..Self::all()
        }
    }

    /// Developer login sources only.
    pub fn developer() -> Self {
        Self {
            azure_cli: true,
            azure_developer_cli: true,
            ..Self::none()
        }
    }

    /// Parse an `AZURE_TOKEN_CREDENTIALS` value: `dev`, `prod`, or one credential name.
    pub fn from_selector(selector: &str) -> Result<Self> {
        let normalized = selector.trim().to_ascii_lowercase().replace('_', "");
        let only = |kind| Self::none().with(kind);
        match normalized.as_str() {
            "dev" => Ok(Self::developer()),
            "prod" => Ok(Self::production()),
            "environmentcredential" | "environment" => Ok(only(SourceKind::Environment)),
            "workloadidentitycredential" | "workloadidentity" => {
                Ok(only(SourceKind::WorkloadIdentity))
            }
            "managedidentitycredential" | "managedidentity" => {
                Ok(only(SourceKind::ManagedIdentity))
            }
            "azureclicredential" | "azurecli" => Ok(only(SourceKind::AzureCli)),
            "azuredeveloperclicredential" | "azuredevelopercli" => {
                Ok(only(SourceKind::AzureDeveloperCli))
            }
            _ => Err(Error::config(format!(
                "Invalid value for AZURE_TOKEN_CREDENTIALS: {:?} (expected dev, prod, or a credential name)",
                selector
            ))),
        }
    }

    pub fn includes(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Environment => self.environment,
            SourceKind::WorkloadIdentity => self.workload_identity,
            SourceKind::ManagedIdentity => self.managed_identity,
            SourceKind::AzureCli => self.azure_cli,
            SourceKind::AzureDeveloperCli => self.azure_developer_cli,
            SourceKind::Explicit => true,
        }
    }

    pub fn with(self, kind: SourceKind) -> Self {
        self.set(kind, true)
    }

    pub fn without(self, kind: SourceKind) -> Self {
        self.set(kind, false)
    }

    fn set(mut self, kind: SourceKind, value: bool) -> Self {
        match kind {
            SourceKind::Environment => self.environment = value,
            SourceKind::WorkloadIdentity => self.workload_identity = value,
            SourceKind::ManagedIdentity => self.managed_identity = value,
            SourceKind::AzureCli => self.azure_cli = value,
            SourceKind::AzureDeveloperCli => self.azure_developer_cli = value,
            SourceKind::Explicit => {}
        }
        self
    }
}

impl Default for SourceSelection {
    fn default() -> Self {
        Self::all()
    }
}

fn base_url(host: &str) -> Result<Url> {
    let normalized = if host.ends_with('/') {
        host.to_string()
    } else {
        format!("{}/", host)
    };
    Url::parse(&normalized).map_err(|e| Error::config(format!("Invalid URL {}: {}", host, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_config_default() {
        let config = ChainConfig::default();
        assert!(config.tenant_id.is_none());
        assert_eq!(config.selection, SourceSelection::all());
        assert_eq!(config.managed_identity.probe_timeout, Duration::from_secs(1));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.attempt_timeout, Duration::from_secs(30));

        let config = config.with_attempt_timeout(Duration::from_secs(5));
        assert_eq!(config.retry.attempt_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!(
            SourceSelection::from_selector("dev").unwrap(),
            SourceSelection::developer()
        );
        assert_eq!(
            SourceSelection::from_selector(" PROD ").unwrap(),
            SourceSelection::production()
        );

        let only_mi = SourceSelection::from_selector("ManagedIdentityCredential").unwrap();
        assert!(only_mi.managed_identity);
        assert!(!only_mi.environment);
        assert!(!only_mi.azure_cli);

        assert!(SourceSelection::from_selector("browser").is_err());
    }

    #[test]
    fn test_exclude() {
        let config = ChainConfig::default().exclude(SourceKind::AzureCli);
        assert!(!config.selection.includes(SourceKind::AzureCli));
        assert!(config.selection.includes(SourceKind::ManagedIdentity));
        assert!(config.selection.includes(SourceKind::Explicit));
    }

    #[test]
    fn test_urls() {
        let config = ChainConfig::default().with_authority_host("https://login.example.com/tenant-root");
        assert_eq!(
            config.authority_url().unwrap().as_str(),
            "https://login.example.com/tenant-root/"
        );

        let mi = ManagedIdentityConfig::default();
        assert_eq!(
            mi.imds_token_url().unwrap().as_str(),
            "http://169.254.169.254/metadata/identity/oauth2/token"
        );

        let config = ChainConfig::default().with_imds_host("http://127.0.0.1:8080");
        assert_eq!(
            config.managed_identity.imds_token_url().unwrap().as_str(),
            "http://127.0.0.1:8080/metadata/identity/oauth2/token"
        );
    }

    #[test]
    fn test_client_secret_is_redacted_in_debug() {
        let config = ChainConfig::default().with_client_secret("hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
