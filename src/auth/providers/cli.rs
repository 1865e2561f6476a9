//! Developer tool providers: Azure CLI (`az`) and Azure Developer CLI (`azd`).
//!
//! Both reuse the developer's existing login by shelling out to the tool and
//! parsing its JSON output. A missing binary or a logged-out tool is reported
//! as unavailable so the chain keeps searching.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::Instant;

use super::http::validate_tenant_id;
use crate::auth::provider::log_outcome;
use crate::auth::{AccessToken, CredentialProvider, SourceKind, TokenRequest};
use crate::config::ChainConfig;
use crate::diagnostics::DiagnosticLog;
use crate::{Error, Result};

const AZ_NAME: &str = "azure_cli";
const AZD_NAME: &str = "azure_developer_cli";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(13);

#[cfg(windows)]
const AZ_PROGRAM: &str = "az.cmd";
#[cfg(not(windows))]
const AZ_PROGRAM: &str = "az";

#[cfg(windows)]
const AZD_PROGRAM: &str = "azd.exe";
#[cfg(not(windows))]
const AZD_PROGRAM: &str = "azd";

/// Tokens from `az account get-access-token`.
#[derive(Clone, Debug)]
pub struct AzureCliProvider {
    program: String,
    tenant_id: Option<String>,
    timeout: Duration,
}

impl AzureCliProvider {
    pub fn new() -> Self {
        Self {
            program: AZ_PROGRAM.to_string(),
            tenant_id: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            tenant_id: config.tenant_id.clone(),
            timeout: config.developer_tool_timeout,
            ..Self::new()
        }
    }

    /// Use a different executable, e.g. an absolute path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch(&self, request: &TokenRequest) -> Result<AccessToken> {
        let resource = request.resource(AZ_NAME)?;
        let mut args = vec![
            "account".to_string(),
            "get-access-token".into(),
            "--output".into(),
            "json".into(),
            "--resource".into(),
            resource,
        ];
        if let Some(tenant_id) = &self.tenant_id {
            validate_tenant_id(tenant_id)?;
            args.extend(["--tenant".into(), tenant_id.clone()]);
        }

        let stdout = request
            .run(
                AZ_NAME,
                Some(self.timeout),
                run_tool(AZ_NAME, &self.program, &args, "az login"),
            )
            .await?;

        let parsed: AzCliToken = serde_json::from_slice(&stdout)?;
        let expires_at = parsed.expires_at()?;
        Ok(AccessToken::new(
            parsed.access_token,
            expires_at,
            request.scopes().to_vec(),
        ))
    }
}

impl Default for AzureCliProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for AzureCliProvider {
    fn name(&self) -> &str {
        AZ_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::AzureCli
    }

    async fn get_token(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken> {
        let started = Instant::now();
        let result = self.fetch(request).await;
        log_outcome(log, AZ_NAME, started.elapsed(), &result);
        result
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzCliToken {
    access_token: String,
    /// Local time, e.g. `2024-05-01 12:34:56.000000`.
    #[serde(default)]
    expires_on: Option<String>,
    /// Unix seconds; present in az 2.54 and later.
    #[serde(default, rename = "expires_on")]
    expires_on_unix: Option<i64>,
}

impl AzCliToken {
    fn expires_at(&self) -> Result<DateTime<Utc>> {
        if let Some(at) = self.expires_on_unix.and_then(|s| DateTime::from_timestamp(s, 0)) {
            return Ok(at);
        }
        let local = self
            .expires_on
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f").ok())
            .and_then(|naive| Local.from_local_datetime(&naive).earliest());
        local
            .map(|at| at.with_timezone(&Utc))
            .ok_or_else(|| unparsable_expiry(AZ_NAME, self.expires_on.as_deref()))
    }
}

/// Tokens from `azd auth token`.
#[derive(Clone, Debug)]
pub struct AzureDeveloperCliProvider {
    program: String,
    tenant_id: Option<String>,
    timeout: Duration,
}

impl AzureDeveloperCliProvider {
    pub fn new() -> Self {
        Self {
            program: AZD_PROGRAM.to_string(),
            tenant_id: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            tenant_id: config.tenant_id.clone(),
            timeout: config.developer_tool_timeout,
            ..Self::new()
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch(&self, request: &TokenRequest) -> Result<AccessToken> {
        let mut args: Vec<String> = ["auth", "token", "--output", "json", "--no-prompt"]
            .into_iter()
            .map(String::from)
            .collect();
        for scope in request.validated_scopes(AZD_NAME)? {
            args.extend(["--scope".into(), scope.clone()]);
        }
        if let Some(tenant_id) = &self.tenant_id {
            validate_tenant_id(tenant_id)?;
            args.extend(["--tenant-id".into(), tenant_id.clone()]);
        }

        let stdout = request
            .run(
                AZD_NAME,
                Some(self.timeout),
                run_tool(AZD_NAME, &self.program, &args, "azd auth login"),
            )
            .await?;

        let parsed: AzdToken = serde_json::from_slice(&stdout)?;
        let expires_at = DateTime::parse_from_rfc3339(parsed.expires_on.trim())
            .map_err(|_| unparsable_expiry(AZD_NAME, Some(&parsed.expires_on)))?
            .with_timezone(&Utc);
        Ok(AccessToken::new(
            parsed.token,
            expires_at,
            request.scopes().to_vec(),
        ))
    }
}

impl Default for AzureDeveloperCliProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for AzureDeveloperCliProvider {
    fn name(&self) -> &str {
        AZD_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::AzureDeveloperCli
    }

    async fn get_token(&self, request: &TokenRequest, log: &DiagnosticLog) -> Result<AccessToken> {
        let started = Instant::now();
        let result = self.fetch(request).await;
        log_outcome(log, AZD_NAME, started.elapsed(), &result);
        result
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzdToken {
    token: String,
    expires_on: String,
}

fn unparsable_expiry(credential: &str, value: Option<&str>) -> Error {
    Error::unauthorized(
        credential,
        None,
        format!("unrecognised token expiry {:?}", value.unwrap_or("<missing>")),
    )
}

/// Run a developer tool and return its stdout.
///
/// The child is killed if the returned future is dropped, which is how the
/// request deadline and cancellation reach it.
async fn run_tool(credential: &str, program: &str, args: &[String], login: &str) -> Result<Vec<u8>> {
    tracing::debug!(credential, program, "invoking developer tool");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::unavailable(
                credential,
                format!("{} was not found on PATH", program),
            ),
            _ => Error::unavailable(credential, format!("failed to start {}: {}", program, e)),
        })?;

    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.contains(login) || stderr.contains("not logged in") {
        return Err(Error::unavailable(
            credential,
            format!("not logged in, run '{}'", login),
        ));
    }

    let message = stderr
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} exited with {}", program, output.status));
    Err(Error::unauthorized(credential, None, message))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn request() -> TokenRequest {
        TokenRequest::new(["https://management.azure.com/.default"])
    }

    #[tokio::test]
    async fn test_az_success() {
        let dir = tempfile::tempdir().unwrap();
        let az = script(
            dir.path(),
            "az",
            r#"echo "$@" > "$(dirname "$0")/args"
echo '{"accessToken":"cli-token","expiresOn":"2030-01-01 00:00:00.000000","expires_on":1893456000,"tokenType":"Bearer"}'"#,
        );

        let provider = AzureCliProvider::new()
            .with_program(az.to_string_lossy())
            .with_tenant_id("contoso");
        let log = DiagnosticLog::new(4);
        let token = provider.get_token(&request(), &log).await.unwrap();

        assert_eq!(token.secret().expose_secret(), "cli-token");
        assert_eq!(token.expires_at.timestamp(), 1_893_456_000);

        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert_eq!(
            args.trim(),
            "account get-access-token --output json --resource https://management.azure.com --tenant contoso"
        );
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_az_local_expiry_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let az = script(
            dir.path(),
            "az",
            r#"echo '{"accessToken":"t","expiresOn":"2030-01-01 00:00:00.000000"}'"#,
        );

        let token = AzureCliProvider::new()
            .with_program(az.to_string_lossy())
            .get_token(&request(), &DiagnosticLog::default())
            .await
            .unwrap();
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let provider = AzureCliProvider::new().with_program("/nonexistent/az");
        let err = provider
            .get_token(&request(), &DiagnosticLog::default())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_logged_out_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let az = script(
            dir.path(),
            "az",
            r#"echo "ERROR: Please run 'az login' to setup account." >&2; exit 1"#,
        );

        let err = AzureCliProvider::new()
            .with_program(az.to_string_lossy())
            .get_token(&request(), &DiagnosticLog::default())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_other_failures_are_not_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let az = script(
            dir.path(),
            "az",
            r#"echo "ERROR: AADSTS50076: MFA required" >&2; exit 1"#,
        );

        let err = AzureCliProvider::new()
            .with_program(az.to_string_lossy())
            .get_token(&request(), &DiagnosticLog::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized { status: None, .. }));
        assert!(err.to_string().contains("AADSTS50076"));
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let az = script(dir.path(), "az", "sleep 5");

        let err = AzureCliProvider::new()
            .with_program(az.to_string_lossy())
            .with_timeout(Duration::from_millis(200))
            .get_token(&request(), &DiagnosticLog::default())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_option_like_scope_never_reaches_tools() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"echo "$@" >> "$(dirname "$0")/args"; echo '{}'"#;
        let az = script(dir.path(), "az", body);
        let azd = script(dir.path(), "azd", body);

        let err = AzureCliProvider::new()
            .with_program(az.to_string_lossy())
            .get_token(&TokenRequest::new(["-x"]), &DiagnosticLog::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = AzureDeveloperCliProvider::new()
            .with_program(azd.to_string_lossy())
            .get_token(
                &TokenRequest::new(["https://management.azure.com/.default", "--debug"]),
                &DiagnosticLog::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(!dir.path().join("args").exists());
    }

    #[tokio::test]
    async fn test_azd_success() {
        let dir = tempfile::tempdir().unwrap();
        let azd = script(
            dir.path(),
            "azd",
            r#"echo "$@" > "$(dirname "$0")/args"
echo '{"token":"azd-token","expiresOn":"2030-01-01T00:00:00Z"}'"#,
        );

        let provider = AzureDeveloperCliProvider::new().with_program(azd.to_string_lossy());
        let token = provider
            .get_token(
                &TokenRequest::new(["https://management.azure.com/.default", "openid"]),
                &DiagnosticLog::default(),
            )
            .await
            .unwrap();

        assert_eq!(token.secret().expose_secret(), "azd-token");
        assert_eq!(token.expires_at.timestamp(), 1_893_456_000);
        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert_eq!(
            args.trim(),
            "auth token --output json --no-prompt --scope https://management.azure.com/.default --scope openid"
        );
    }

    #[tokio::test]
    async fn test_azd_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let azd = script(
            dir.path(),
            "azd",
            r#"echo "ERROR: not logged in, run \`azd auth login\` to login" >&2; exit 1"#,
        );

        let err = AzureDeveloperCliProvider::new()
            .with_program(azd.to_string_lossy())
            .get_token(&request(), &DiagnosticLog::default())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("azd auth login"));
    }
}
