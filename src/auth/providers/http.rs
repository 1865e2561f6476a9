//! HTTP plumbing shared by the token-endpoint providers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::auth::AccessToken;
use crate::{Error, Result};

const USER_AGENT: &str = concat!("azure-credential-chain/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
}

/// Which endpoint family produced a response; IMDS uses 400/404 to say
/// "no identity here" rather than "bad credentials".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Authority,
    ManagedIdentity,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Number(i64),
    Text(String),
}

impl Timestamp {
    fn as_secs(&self) -> Option<i64> {
        match self {
            Timestamp::Number(n) => Some(*n),
            Timestamp::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Timestamp>,
    #[serde(default)]
    expires_on: Option<Timestamp>,
}

impl TokenResponse {
    fn expires_at(&self) -> DateTime<Utc> {
        if let Some(on) = self.expires_on.as_ref().and_then(Timestamp::as_secs)
            && let Some(at) = DateTime::from_timestamp(on, 0)
        {
            return at;
        }
        let lifetime = self
            .expires_in
            .as_ref()
            .and_then(Timestamp::as_secs)
            .unwrap_or(3600);
        Utc::now() + chrono::Duration::seconds(lifetime)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Send a request, mapping transport failures to `Network`/`Timeout`.
pub(crate) async fn send(credential: &str, builder: RequestBuilder) -> Result<Response> {
    builder.send().await.map_err(|e| {
        if e.is_timeout() {
            Error::timeout(credential, format!("HTTP request timed out: {}", e))
        } else {
            Error::network(credential, e.to_string())
        }
    })
}

/// Turn a token endpoint response into a token or a classified error.
pub(crate) async fn read_token(
    credential: &str,
    endpoint: Endpoint,
    response: Response,
    scopes: &[String],
) -> Result<AccessToken> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::network(credential, format!("Failed to read response: {}", e)))?;

    if !status.is_success() {
        return Err(classify_status(credential, endpoint, status, &body));
    }

    let parsed: TokenResponse = serde_json::from_str(&body)?;
    let expires_at = parsed.expires_at();
    Ok(AccessToken::new(parsed.access_token, expires_at, scopes.to_vec()))
}

pub(crate) fn classify_status(
    credential: &str,
    endpoint: Endpoint,
    status: StatusCode,
    body: &str,
) -> Error {
    let message = error_message(body);
    let code = status.as_u16();

    match (endpoint, code) {
        (Endpoint::ManagedIdentity, 400) => Error::unavailable(
            credential,
            format!("the requested identity is not assigned to this resource ({})", message),
        ),
        (Endpoint::ManagedIdentity, 404) => Error::unavailable(
            credential,
            format!("managed identity endpoint not found ({})", message),
        ),
        (_, 410 | 429) | (_, 500..=599) => Error::service(credential, code, message),
        _ => Error::unauthorized(credential, Some(code), message),
    }
}

/// POST a `client_credentials` grant to `{authority}/{tenant}/oauth2/v2.0/token`.
pub(crate) async fn authority_token(
    credential: &str,
    client: &reqwest::Client,
    authority_host: &url::Url,
    tenant_id: &str,
    form: &[(&str, &str)],
    scopes: &[String],
) -> Result<AccessToken> {
    let url = token_url(authority_host, tenant_id)?;
    let scope = scopes.join(" ");

    let mut params: Vec<(&str, &str)> = vec![("grant_type", "client_credentials")];
    params.extend_from_slice(form);
    params.push(("scope", &scope));

    let response = send(credential, client.post(url).form(&params)).await?;
    read_token(credential, Endpoint::Authority, response, scopes).await
}

pub(crate) fn token_url(authority_host: &url::Url, tenant_id: &str) -> Result<url::Url> {
    validate_tenant_id(tenant_id)?;
    authority_host
        .join(&format!("{}/oauth2/v2.0/token", tenant_id))
        .map_err(|e| Error::config(format!("Invalid authority host {}: {}", authority_host, e)))
}

pub(crate) fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    let valid = !tenant_id.is_empty()
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!("Invalid tenant id: {:?}", tenant_id)))
    }
}

fn error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        let code = parsed.error.map(|e| match e {
            serde_json::Value::String(s) => s,
            other => other
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        });
        let detail = parsed.error_description.or(parsed.message);
        match (code, detail) {
            (Some(code), Some(detail)) => return format!("{}: {}", code, first_line(&detail)),
            (Some(code), None) => return code,
            (None, Some(detail)) => return first_line(&detail).to_string(),
            (None, None) => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".into();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
