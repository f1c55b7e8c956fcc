use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Lead time before expiry at which a cached token is renewed.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(300);

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Bearer,
    PersonalAccessToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    /// `None` for tokens that do not expire while the process runs.
    pub expires_on: Option<SystemTime>,
    pub kind: TokenKind,
}

impl AccessToken {
    pub fn bearer(value: impl Into<String>, expires_on: SystemTime) -> Self {
        Self {
            value: value.into(),
            expires_on: Some(expires_on),
            kind: TokenKind::Bearer,
        }
    }

    pub fn personal(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_on: None,
            kind: TokenKind::PersonalAccessToken,
        }
    }

    /// Usable when `now < expires_on - margin`.
    pub fn is_fresh(&self, now: SystemTime, margin: Duration) -> bool {
        match self.expires_on {
            None => true,
            Some(expiry) => expiry.checked_sub(margin).is_some_and(|stale_at| now < stale_at),
        }
    }

    /// Value for the `Authorization` header.
    /// Personal access tokens go over HTTP Basic with an empty user name.
    pub fn authorization_header(&self) -> String {
        match self.kind {
            TokenKind::Bearer => format!("Bearer {}", self.value),
            TokenKind::PersonalAccessToken => {
                format!("Basic {}", STANDARD.encode(format!(":{}", self.value)))
            }
        }
    }
}

pub trait Clock {
    fn now(&self) -> SystemTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

// ---------------------------------------------------------------------------
// Identity backend
// ---------------------------------------------------------------------------

pub trait CredentialSource {
    /// Request a fresh token for `scope`. One remote call, no retry.
    fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

/// Azure managed identity via the instance metadata endpoint.
pub struct ManagedIdentityCredential {
    agent: ureq::Agent,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn new(agent: ureq::Agent, client_id: Option<String>) -> Self {
        Self { agent, client_id }
    }
}

#[derive(Debug, Deserialize)]
struct ImdsToken {
    access_token: String,
    expires_on: serde_json::Value,
}

/// The metadata endpoint takes a resource, not a scope.
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

/// Seconds given either as a JSON number or as a numeric string.
fn json_seconds(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::String(s) => s.parse::<u64>().ok(),
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn parse_imds_token(body: serde_json::Value) -> Result<AccessToken> {
    let token: ImdsToken = serde_json::from_value(body)
        .map_err(|e| Error::Decode(format!("failed to parse identity response: {e}")))?;

    // expires_on arrives as a string of epoch seconds, occasionally as a number
    let secs = json_seconds(&token.expires_on).ok_or_else(|| {
        Error::Decode(format!(
            "invalid expires_on in identity response: {}",
            token.expires_on
        ))
    })?;

    Ok(AccessToken::bearer(
        token.access_token,
        UNIX_EPOCH + Duration::from_secs(secs),
    ))
}

impl CredentialSource for ManagedIdentityCredential {
    fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let mut request = self
            .agent
            .get(IMDS_TOKEN_URL)
            .set("Metadata", "true")
            .query("api-version", IMDS_API_VERSION)
            .query("resource", scope_to_resource(scope));
        if let Some(ref client_id) = self.client_id {
            request = request.query("client_id", client_id);
        }

        let response = request
            .call()
            .map_err(|e| Error::Auth(format!("managed identity token request failed: {e}")))?;
        let body: serde_json::Value = response
            .into_json()
            .map_err(|e| Error::Decode(format!("failed to read identity response: {e}")))?;

        parse_imds_token(body)
    }
}

/// Application (service principal) key, client-credentials grant against the
/// Microsoft identity platform. The id, secret and tenant are read from the
/// named environment variables on every request.
pub struct ClientSecretCredential {
    agent: ureq::Agent,
    client_id_env: String,
    client_secret_env: String,
    tenant_id_env: String,
}

impl ClientSecretCredential {
    pub fn new(
        agent: ureq::Agent,
        client_id_env: impl Into<String>,
        client_secret_env: impl Into<String>,
        tenant_id_env: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            client_id_env: client_id_env.into(),
            client_secret_env: client_secret_env.into(),
            tenant_id_env: tenant_id_env.into(),
        }
    }
}

fn required_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(Error::Auth(format!("${var} is not set"))),
    }
}

#[derive(Debug, Deserialize)]
struct ClientCredentialsToken {
    access_token: String,
    expires_in: serde_json::Value,
}

/// `expires_in` is relative, so the absolute expiry is anchored at `now`.
fn parse_client_credentials_token(body: serde_json::Value, now: SystemTime) -> Result<AccessToken> {
    let token: ClientCredentialsToken = serde_json::from_value(body)
        .map_err(|e| Error::Decode(format!("failed to parse token response: {e}")))?;
    let secs = json_seconds(&token.expires_in).ok_or_else(|| {
        Error::Decode(format!(
            "invalid expires_in in token response: {}",
            token.expires_in
        ))
    })?;

    Ok(AccessToken::bearer(
        token.access_token,
        now + Duration::from_secs(secs),
    ))
}

impl CredentialSource for ClientSecretCredential {
    fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let client_id = required_env(&self.client_id_env)?;
        let client_secret = required_env(&self.client_secret_env)?;
        let tenant_id = required_env(&self.tenant_id_env)?;

        let url = format!("{AUTHORITY_HOST}/{tenant_id}/oauth2/v2.0/token");
        let requested_at = SystemTime::now();
        let response = self
            .agent
            .post(&url)
            .send_form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", scope),
            ])
            .map_err(|e| Error::Auth(format!("client credentials token request failed: {e}")))?;
        let body: serde_json::Value = response
            .into_json()
            .map_err(|e| Error::Decode(format!("failed to read token response: {e}")))?;

        parse_client_credentials_token(body, requested_at)
    }
}

/// Personal access token taken from an environment variable.
pub struct EnvTokenCredential {
    var: String,
}

impl EnvTokenCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialSource for EnvTokenCredential {
    fn get_token(&self, _scope: &str) -> Result<AccessToken> {
        required_env(&self.var).map(AccessToken::personal)
    }
}

// ---------------------------------------------------------------------------
// TokenProvider
// ---------------------------------------------------------------------------

/// Caches one token for one scope and renews it shortly before it expires.
pub struct TokenProvider {
    scope: String,
    resource_uri: String,
    failure_event: &'static str,
    credential: Box<dyn CredentialSource>,
    clock: Box<dyn Clock>,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(
        scope: impl Into<String>,
        resource_uri: impl Into<String>,
        failure_event: &'static str,
        credential: Box<dyn CredentialSource>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            scope: scope.into(),
            resource_uri: resource_uri.into(),
            failure_event,
            credential,
            clock,
            cached: Mutex::new(None),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Return the cached token if still fresh, otherwise ask the identity
    /// backend once. `None` means the caller cannot proceed.
    pub fn get_token(&self) -> Option<AccessToken> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(token) = cached.as_ref()
            && token.is_fresh(self.clock.now(), REFRESH_MARGIN)
        {
            return Some(token.clone());
        }

        match self.credential.get_token(&self.scope) {
            Ok(token) => {
                debug!(scope = %self.scope, "acquired access token");
                *cached = Some(token.clone());
                Some(token)
            }
            Err(e) => {
                warn!(
                    event = self.failure_event,
                    resource_uri = %self.resource_uri,
                    error = %e,
                    retry = "0",
                    "credential acquisition failed"
                );
                None
            }
        }
    }
}
