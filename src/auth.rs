//! Access tokens: providers and the per-worker credential cache
//!
//! A [`TokenProvider`] talks to the identity provider. Every producer owns a
//! private [`CredentialCache`] in front of a shared provider, so workers never
//! contend on a shared token. Refresh happens when
//! `now >= expires_at - refresh_margin`, which means a cache never hands out
//! a token inside its safety margin.

use crate::config::{AuthConfig, AuthMode};
use crate::error::{AuthError, Result};
use crate::utils::truncate_body;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Bearer token with its expiry instant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
    /// Token value sent in the Authorization header
    pub secret: String,
    /// Instant after which the identity provider rejects the token
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Token valid for `lifetime` from now
    pub fn expiring_in(secret: impl Into<String>, lifetime: Duration) -> Self {
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::MAX);
        Self {
            secret: secret.into(),
            expires_at: Utc::now()
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// True when the token must be replaced before use at `now`
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        match self.expires_at.checked_sub_signed(margin) {
            Some(refresh_at) => now >= refresh_at,
            None => true,
        }
    }
}

/// Identity provider collaborator
///
/// Implementations serialize their own calls if the provider requires it;
/// callers never hold a lock around `acquire_token`.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Obtain a fresh token
    async fn acquire_token(&self) -> Result<AccessToken>;
}

/// Mints local tokens for dry runs against mock servers
pub struct StaticTokenProvider {
    prefix: String,
    lifetime: Duration,
}

impl StaticTokenProvider {
    /// Provider minting `<prefix>-<random>` tokens valid for `lifetime`
    pub fn new(prefix: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            lifetime,
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire_token(&self) -> Result<AccessToken> {
        let suffix: u64 = rand::thread_rng().r#gen();
        Ok(AccessToken::expiring_in(
            format!("{}-{:016x}", self.prefix, suffix),
            self.lifetime,
        ))
    }
}

/// OAuth2 client-credentials grant
///
/// Requests are serialized through an internal mutex; the identity provider
/// throttles bursts of concurrent grants from one client.
pub struct ClientCredentialsProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    gate: Mutex<()>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

/// Lifetime assumed when the token response omits `expires_in`
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

impl ClientCredentialsProvider {
    /// Create a provider for the given token endpoint and client
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            gate: Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn acquire_token(&self) -> Result<AccessToken> {
        let _gate = self.gate.lock().await;

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

        if !status.is_success() {
            // Azure AD reports a wrong secret with this code
            if body.contains("AADSTS7000215") {
                tracing::error!(
                    client_id = %self.client_id,
                    "invalid client secret: use the secret value, not the secret id"
                );
            }
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: truncate_body(&body),
            }
            .into());
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let lifetime = parsed
            .expires_in
            .as_ref()
            .and_then(parse_expires_in)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        tracing::debug!(
            client_id = %self.client_id,
            expires_in_secs = lifetime.as_secs(),
            "acquired access token"
        );
        Ok(AccessToken::expiring_in(parsed.access_token, lifetime))
    }
}

// Some providers send expires_in as a string
fn parse_expires_in(value: &serde_json::Value) -> Option<Duration> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(Duration::from_secs),
        serde_json::Value::String(s) => s.trim().parse().ok().map(Duration::from_secs),
        _ => None,
    }
}

/// Build the configured provider; `None` when authentication is disabled
pub fn build_provider(
    config: &AuthConfig,
    client: &reqwest::Client,
) -> Option<Arc<dyn TokenProvider>> {
    match &config.mode {
        AuthMode::Disabled => None,
        AuthMode::Static { token, lifetime } => {
            Some(Arc::new(StaticTokenProvider::new(token.clone(), *lifetime)))
        }
        AuthMode::ClientCredentials {
            token_url,
            client_id,
            client_secret,
            scope,
        } => Some(Arc::new(ClientCredentialsProvider::new(
            client.clone(),
            token_url.clone(),
            client_id.clone(),
            client_secret.clone(),
            scope.clone(),
        ))),
    }
}

/// Worker-local token cache
///
/// Not shared between workers: each producer builds its own from the shared
/// provider.
pub struct CredentialCache {
    provider: Arc<dyn TokenProvider>,
    margin: Duration,
    cached: Option<AccessToken>,
    refreshes: u64,
}

impl CredentialCache {
    /// Cache in front of `provider`, refreshing `margin` before expiry
    pub fn new(provider: Arc<dyn TokenProvider>, margin: Duration) -> Self {
        Self {
            provider,
            margin,
            cached: None,
            refreshes: 0,
        }
    }

    /// Current token, refreshing it first when absent or inside the margin
    pub async fn get(&mut self) -> Result<String> {
        let now = Utc::now();
        if let Some(token) = &self.cached
            && !token.needs_refresh(now, self.margin)
        {
            return Ok(token.secret.clone());
        }

        let token = self.provider.acquire_token().await?;
        tracing::debug!(expires_at = %token.expires_at, "refreshed worker token");
        let secret = token.secret.clone();
        self.cached = Some(token);
        self.refreshes += 1;
        Ok(secret)
    }

    /// Number of provider calls made by this cache
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Counts calls and issues tokens with a fixed lifetime
    struct CountingProvider {
        calls: AtomicU32,
        lifetime: Duration,
    }

    impl CountingProvider {
        fn new(lifetime: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                lifetime,
            })
        }
    }

    #[async_trait::async_trait]
    impl TokenProvider for CountingProvider {
        async fn acquire_token(&self) -> Result<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::expiring_in(format!("token-{n}"), self.lifetime))
        }
    }

    #[test]
    fn needs_refresh_honours_margin() {
        let now = Utc::now();
        let token = AccessToken {
            secret: "t".into(),
            expires_at: now + chrono::Duration::minutes(10),
        };
        assert!(!token.needs_refresh(now, Duration::from_secs(300)));
        assert!(token.needs_refresh(now + chrono::Duration::minutes(5), Duration::from_secs(300)));
        assert!(token.needs_refresh(now + chrono::Duration::minutes(11), Duration::ZERO));
    }

    #[tokio::test]
    async fn cache_reuses_token_outside_margin() {
        let provider = CountingProvider::new(Duration::from_secs(600));
        let mut cache = CredentialCache::new(provider.clone(), Duration::from_secs(300));

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.refreshes(), 1);
    }

    #[tokio::test]
    async fn cache_refreshes_token_inside_margin() {
        // Lifetime shorter than the margin: every call is inside the margin
        let provider = CountingProvider::new(Duration::from_secs(120));
        let mut cache = CredentialCache::new(provider.clone(), Duration::from_secs(300));

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn caches_are_isolated_per_worker() {
        let provider = CountingProvider::new(Duration::from_secs(3600));
        let mut a = CredentialCache::new(provider.clone(), Duration::from_secs(300));
        let mut b = CredentialCache::new(provider.clone(), Duration::from_secs(300));

        let token_a = a.get().await.unwrap();
        let token_b = b.get().await.unwrap();
        a.get().await.unwrap();

        assert_ne!(token_a, token_b);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn static_provider_mints_distinct_prefixed_tokens() {
        let provider = StaticTokenProvider::new("dry-run", Duration::from_secs(20));

        let a = provider.acquire_token().await.unwrap();
        let b = provider.acquire_token().await.unwrap();

        assert!(a.secret.starts_with("dry-run-"));
        assert_ne!(a.secret, b.secret);
        assert!(a.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn client_credentials_posts_form_and_parses_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=my-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": "abc123",
                "expires_in": "3599"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ClientCredentialsProvider::new(
            reqwest::Client::new(),
            format!("{}/oauth2/token", server.uri()),
            "my-client",
            "s3cret",
            "api://liquidity/.default",
        );

        let token = provider.acquire_token().await.unwrap();

        assert_eq!(token.secret, "abc123");
        assert!(!token.needs_refresh(Utc::now(), Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn client_credentials_rejection_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"error":"invalid_client","error_codes":[7000215]}"#),
            )
            .mount(&server)
            .await;

        let provider = ClientCredentialsProvider::new(
            reqwest::Client::new(),
            format!("{}/oauth2/token", server.uri()),
            "my-client",
            "wrong",
            "scope",
        );

        match provider.acquire_token().await {
            Err(Error::Auth(AuthError::Rejected { status, .. })) => assert_eq!(status, 401),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_credentials_garbage_response_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let provider = ClientCredentialsProvider::new(
            reqwest::Client::new(),
            server.uri(),
            "c",
            "s",
            "scope",
        );

        assert!(matches!(
            provider.acquire_token().await,
            Err(Error::Auth(AuthError::InvalidResponse(_)))
        ));
    }

    #[test]
    fn build_provider_follows_mode() {
        let client = reqwest::Client::new();
        assert!(build_provider(&AuthConfig::default(), &client).is_none());

        let static_auth = AuthConfig {
            mode: AuthMode::Static {
                token: "dry-run".into(),
                lifetime: Duration::from_secs(20),
            },
            ..AuthConfig::default()
        };
        assert!(build_provider(&static_auth, &client).is_some());
    }
}
