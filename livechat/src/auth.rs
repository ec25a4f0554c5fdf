//! Access token sources for the bot facade.

use eyre::Context;
use oauth2::basic::{BasicClient, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{ClientId, ClientSecret, RefreshToken, RequestTokenError, TokenResponse, TokenUrl};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

/// Google OAuth2 token endpoint.
const TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v3/token";

/// Tokens are treated as expired this long before they actually expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Produces bearer tokens on demand.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns an access token that is valid right now.
    async fn access_token(&self) -> eyre::Result<String>;
}

/// A token that never changes, e.g. one pasted from the OAuth playground.
#[derive(Clone)]
pub struct StaticToken(String);

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> eyre::Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
struct Cached {
    access_token: String,
    expires_at: SystemTime,
}

/// Exchanges a long-lived refresh token for short-lived access tokens.
///
/// The current access token is reused until it is within a few minutes of
/// expiring. If Google rotates the refresh token, the new one is kept.
#[derive(Debug)]
pub struct OAuthRefresher {
    client_id: String,
    client_secret: String,
    http: oauth2::reqwest::Client,
    state: Mutex<RefreshState>,
}

#[derive(Debug)]
struct RefreshState {
    refresh_token: RefreshToken,
    cached: Option<Cached>,
}

impl OAuthRefresher {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> eyre::Result<Self> {
        let http = oauth2::reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .context("build OAuth HTTP client")?;
        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http,
            state: Mutex::new(RefreshState {
                refresh_token: RefreshToken::new(refresh_token.into()),
                cached: None,
            }),
        })
    }

    async fn refresh(&self, state: &mut RefreshState) -> eyre::Result<String> {
        tracing::debug!("refreshing OAuth access token");
        let token_url = TokenUrl::new(TOKEN_URL.to_string()).context("parse token endpoint")?;
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(token_url);

        let response: BasicTokenResponse = match client
            .exchange_refresh_token(&state.refresh_token)
            .request_async(&self.http)
            .await
        {
            Ok(response) => response,
            Err(RequestTokenError::ServerResponse(ref sr))
                if matches!(sr.error(), BasicErrorResponseType::InvalidGrant) =>
            {
                state.cached = None;
                eyre::bail!("refresh token was rejected as an invalid grant: {sr}");
            }
            Err(e) => return Err(e).context("exchange refresh token"),
        };

        if let Some(rotated) = response.refresh_token() {
            tracing::trace!("refresh token rotated");
            state.refresh_token = rotated.clone();
        }

        // Google always sends expires_in; an hour is its usual value
        let lifetime = response.expires_in().unwrap_or(Duration::from_secs(3600));
        let access_token = response.access_token().secret().clone();
        state.cached = Some(Cached {
            access_token: access_token.clone(),
            expires_at: SystemTime::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        });
        Ok(access_token)
    }
}

#[async_trait::async_trait]
impl TokenProvider for OAuthRefresher {
    async fn access_token(&self) -> eyre::Result<String> {
        let mut state = self.state.lock().await;
        if let Some(cached) = &state.cached
            && SystemTime::now() < cached.expires_at
        {
            return Ok(cached.access_token.clone());
        }
        self.refresh(&mut state).await
    }
}
