//! Azure authentication
//!
//! Resolves which access strategy a client instance runs under and owns
//! token acquisition for the two live strategies: a delegated `az` CLI
//! session or non-interactive service-principal credentials. Offline mode
//! carries no credential at all.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::Config;
use super::http::sanitize_for_log;

/// Scope requested for management-plane tokens (service principal flow).
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
/// Resource identifier passed to `az account get-access-token`.
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com";
/// Default token endpoint base for service-principal credentials.
pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

/// CLI probes and token acquisitions never block longer than this.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if the source does not report an expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Access strategy resolved for a client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Fully offline simulation; the provider is never contacted.
    Offline,
    /// Delegated credentials from an interactive `az login` session.
    Delegated,
    /// Non-interactive service-principal credentials.
    NonInteractive,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Offline => "offline",
            AccessMode::Delegated => "delegated",
            AccessMode::NonInteractive => "noninteractive",
        }
    }

    /// True for modes that contact the provider.
    pub fn is_live(&self) -> bool {
        !matches!(self, AccessMode::Offline)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human label for the auth method backing a mode.
pub fn auth_method_label(mode: AccessMode) -> &'static str {
    match mode {
        AccessMode::Offline => "offline simulation",
        AccessMode::Delegated => "Azure CLI session",
        AccessMode::NonInteractive => "service principal",
    }
}

/// Parsed value of the explicit mode override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedMode {
    /// Run auto-detection.
    Auto,
    /// Skip detection and use this mode.
    Mode(AccessMode),
}

impl ForcedMode {
    /// Parse an override literal, case-insensitively. Anything outside the
    /// four accepted literals is `None`, which callers treat as
    /// "fall back to auto-detection".
    pub fn parse(raw: &str) -> Option<ForcedMode> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Some(ForcedMode::Auto),
            "OFFLINE" => Some(ForcedMode::Mode(AccessMode::Offline)),
            "DELEGATED" => Some(ForcedMode::Mode(AccessMode::Delegated)),
            "NONINTERACTIVE" => Some(ForcedMode::Mode(AccessMode::NonInteractive)),
            _ => None,
        }
    }
}

/// Resolve the access mode for a new client instance.
///
/// Detection order: explicit override, then complete service-principal
/// credentials, then a bounded probe for a delegated CLI session, then
/// offline. The CLI probe only runs when nothing earlier decides.
pub async fn resolve_mode(config: &Config) -> AccessMode {
    resolve_mode_with(config, delegated_session_available()).await
}

/// [`resolve_mode`] with the CLI probe injected, so resolution is
/// testable without an `az` binary or any environment reads.
pub(crate) async fn resolve_mode_with(
    config: &Config,
    probe: impl Future<Output = bool>,
) -> AccessMode {
    if let Some(raw) = config.forced_mode.as_deref() {
        match ForcedMode::parse(raw) {
            Some(ForcedMode::Mode(mode)) => {
                tracing::info!("Access mode forced to {}", mode);
                return mode;
            }
            Some(ForcedMode::Auto) => {}
            None => {
                tracing::warn!(
                    "Unrecognized {} value '{}', falling back to auto-detection",
                    crate::config::AUTH_MODE_VAR,
                    raw
                );
            }
        }
    }

    if config.has_service_principal() {
        tracing::info!("Service principal credentials detected");
        return AccessMode::NonInteractive;
    }

    if probe.await {
        tracing::info!("Delegated CLI session detected");
        AccessMode::Delegated
    } else {
        tracing::warn!("No usable credentials found, running offline");
        AccessMode::Offline
    }
}

/// Check for a usable delegated `az` session, bounded by [`PROBE_TIMEOUT`].
///
/// A missing binary, a non-zero exit, and a timeout all count as "no
/// session"; the probe never fails.
pub async fn delegated_session_available() -> bool {
    let probe = tokio::process::Command::new("az")
        .args(["account", "show", "--output", "none"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            tracing::debug!("az CLI probe did not run: {}", e);
            false
        }
        Err(_) => {
            tracing::debug!("az CLI probe timed out");
            false
        }
    }
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    /// Check if this cached token is still valid
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Where management-plane tokens come from for a live mode.
#[derive(Clone)]
enum TokenSource {
    /// Shell out to `az account get-access-token`.
    Cli,
    /// OAuth2 client-credentials flow against the login endpoint.
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

/// Token acquisition for one live access mode, with caching.
///
/// Cloning shares the cache. Re-acquisition always stores a fresh value;
/// cached tokens are never mutated in place.
#[derive(Clone)]
pub struct Credential {
    mode: AccessMode,
    source: TokenSource,
    login_endpoint: String,
    http: reqwest::Client,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

/// Shape of `az account get-access-token --output json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    expires_on: Option<String>,
}

/// Shape of the OAuth2 client-credentials response.
#[derive(Debug, Deserialize)]
struct LoginToken {
    access_token: String,
    expires_in: Option<u64>,
}

impl Credential {
    /// Build the credential for a resolved mode. `None` for offline mode
    /// (offline clients carry no credential) and for a non-interactive
    /// mode whose service-principal fields are incomplete.
    pub fn for_mode(mode: AccessMode, config: &Config) -> Option<Credential> {
        let source = match mode {
            AccessMode::Offline => return None,
            AccessMode::Delegated => TokenSource::Cli,
            AccessMode::NonInteractive => TokenSource::ServicePrincipal {
                tenant_id: config.tenant_id.clone()?,
                client_id: config.client_id.clone()?,
                client_secret: config.client_secret.clone()?,
            },
        };

        Some(Credential {
            mode,
            source,
            login_endpoint: DEFAULT_LOGIN_ENDPOINT.to_string(),
            http: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Point the credential at a different token endpoint base.
    pub fn with_login_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.login_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Get an access token for API calls
    /// Security: Checks token expiry before returning cached token
    pub async fn token(&self) -> Result<String> {
        // Check cache first - but only return if token is still valid
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let fresh = self.acquire().await?;
        let token = fresh.token.clone();

        // Cache it with expiry
        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(fresh);
        }

        Ok(token)
    }

    /// One acquisition attempt used as a liveness check. Bypasses the
    /// cache in both directions so probing never mutates client state.
    pub async fn probe(&self) -> Result<()> {
        self.acquire().await.map(|_| ())
    }

    async fn acquire(&self) -> Result<CachedToken> {
        match &self.source {
            TokenSource::Cli => self.acquire_via_cli().await,
            TokenSource::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            } => {
                self.acquire_via_login(tenant_id, client_id, client_secret)
                    .await
            }
        }
    }

    /// Fetch a token from the delegated CLI session, bounded by
    /// [`PROBE_TIMEOUT`].
    async fn acquire_via_cli(&self) -> Result<CachedToken> {
        let command = tokio::process::Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                MANAGEMENT_RESOURCE,
                "--output",
                "json",
            ])
            .stdin(Stdio::null())
            .output();

        let output = tokio::time::timeout(PROBE_TIMEOUT, command)
            .await
            .context("az CLI token acquisition timed out")?
            .context("Failed to run the az CLI")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "az CLI exited with {}: {}",
                output.status,
                sanitize_for_log(stderr.trim())
            );
        }

        let parsed: CliToken = serde_json::from_slice(&output.stdout)
            .context("Failed to parse az CLI token output")?;

        let expires_at = parsed
            .expires_on
            .as_deref()
            .and_then(parse_cli_expiry)
            .unwrap_or_else(|| Instant::now() + DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER);

        Ok(CachedToken {
            token: parsed.access_token,
            expires_at,
        })
    }

    /// Fetch a token through the OAuth2 client-credentials flow.
    async fn acquire_via_login(
        &self,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<CachedToken> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.login_endpoint, tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", MANAGEMENT_SCOPE),
        ];

        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .context("Failed to reach the login endpoint")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read login response")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            anyhow::bail!(
                "Login endpoint returned {}: {}",
                status,
                sanitize_for_log(&body)
            );
        }

        let parsed: LoginToken =
            serde_json::from_str(&body).context("Failed to parse login response")?;

        let ttl = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        let ttl = ttl.checked_sub(TOKEN_EXPIRY_BUFFER).unwrap_or(ttl);

        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: Instant::now() + ttl,
        })
    }
}

/// Convert the CLI's local-time expiry string ("2026-08-25 14:03:22.000000")
/// into an [`Instant`] with the refresh buffer applied. `None` only when
/// the string does not parse; a stamp already inside the buffer clamps to
/// "expired now" so the next call re-acquires instead of reusing a token
/// about to die.
fn parse_cli_expiry(raw: &str) -> Option<Instant> {
    let expiry = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    let now = chrono::Local::now().naive_local();
    let remaining = (expiry - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .checked_sub(TOKEN_EXPIRY_BUFFER)
        .unwrap_or(Duration::ZERO);
    Some(Instant::now() + remaining)
}
