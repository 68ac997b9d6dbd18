//! OAuth2 public client for the Microsoft identity platform.
//!
//! Interactive sign-in runs either the device authorization grant or the
//! authorization code grant with PKCE over a loopback redirect. Tokens and
//! refresh tokens are kept in an in-memory account cache that backs the
//! silent path.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, CsrfToken, DeviceAuthorizationUrl, EndpointNotSet,
    EndpointSet, ErrorResponse, ErrorResponseType, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, StandardDeviceAuthorizationResponse,
    StandardErrorResponse, TokenResponse, TokenUrl,
};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use integrator_common::{Error, Result};

use crate::credentials::Credentials;
use crate::identity::{Account, IdentityClient, TokenResult};
use crate::loopback::{AuthCallback, LoopbackListener};

/// Scopes added to every request so that an id and a refresh token are issued.
const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Cached tokens are treated as expired this long before their real expiry.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

type OAuthClient = BasicClient<EndpointSet, EndpointSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// How the interactive step signs the user in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractiveMode {
    /// Show a user code to enter on another device.
    #[default]
    DeviceCode,
    /// Open the system browser and catch the redirect on localhost.
    Browser,
}

/// What the user needs to finish a device-code sign-in.
#[derive(Debug, Clone)]
pub struct DeviceCodePrompt {
    pub verification_uri: String,
    pub user_code: String,
    pub expires_in: std::time::Duration,
}

impl fmt::Display for DeviceCodePrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "To sign in, open {} and enter the code {}",
            self.verification_uri, self.user_code
        )
    }
}

/// Callback presenting the device-code prompt to the user.
pub type DeviceCodeHandler = Arc<dyn Fn(&DeviceCodePrompt) + Send + Sync>;

/// Authorization request prepared for the browser flow.
pub struct PendingAuthorization {
    pub url: String,
    pub csrf_state: String,
    pub pkce_verifier: PkceCodeVerifier,
}

#[derive(Debug, Clone)]
struct CachedAccount {
    account: Account,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    scopes: Vec<String>,
}

impl CachedAccount {
    fn is_expired(&self) -> bool {
        self.expires_at < Utc::now() + Duration::minutes(EXPIRY_MARGIN_MINUTES)
    }

    fn covers(&self, scopes: &[String]) -> bool {
        scopes
            .iter()
            .all(|s| self.scopes.iter().any(|c| c.eq_ignore_ascii_case(s)))
    }
}

/// OAuth2 public client with an in-memory account cache.
pub struct PublicClient {
    client: OAuthClient,
    http: oauth2::reqwest::Client,
    authority: String,
    mode: InteractiveMode,
    device_code_handler: Option<DeviceCodeHandler>,
    cache: RwLock<Vec<CachedAccount>>,
}

impl PublicClient {
    /// Create a public client for the given identity.
    ///
    /// # Errors
    /// - Authority endpoints are not valid URLs
    /// - HTTP client cannot be built
    pub fn new(credentials: &Credentials, mode: InteractiveMode) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(credentials.client_id().to_string()))
            .set_auth_uri(
                AuthUrl::new(credentials.authorize_endpoint())
                    .map_err(|e| Error::Config(format!("Invalid auth URL: {}", e)))?,
            )
            .set_device_authorization_url(
                DeviceAuthorizationUrl::new(credentials.device_code_endpoint())
                    .map_err(|e| Error::Config(format!("Invalid device code URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(credentials.token_endpoint())
                    .map_err(|e| Error::Config(format!("Invalid token URL: {}", e)))?,
            );

        // Token endpoints must not be followed across redirects.
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            authority: credentials.authority().to_string(),
            mode,
            device_code_handler: None,
            cache: RwLock::new(Vec::new()),
        })
    }

    /// Present device codes through `handler` in addition to the log.
    pub fn with_device_code_handler(mut self, handler: DeviceCodeHandler) -> Self {
        self.device_code_handler = Some(handler);
        self
    }

    /// Build the authorization URL for the browser flow.
    ///
    /// Returns the URL with a PKCE S256 challenge, the CSRF state to verify
    /// on callback and the matching verifier.
    pub fn authorization_request(
        &self,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<PendingAuthorization> {
        let redirect = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?;
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let (url, csrf) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(request_scopes(scopes))
            .set_pkce_challenge(challenge)
            .set_redirect_uri(Cow::Owned(redirect))
            .url();

        Ok(PendingAuthorization {
            url: url.to_string(),
            csrf_state: csrf.secret().clone(),
            pkce_verifier: verifier,
        })
    }

    /// Record a token for `account`, or for a new account when `None`.
    async fn cache_token(
        &self,
        account: Option<&Account>,
        scopes: &[String],
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<std::time::Duration>,
    ) -> TokenResult {
        let expires_in = expires_in.unwrap_or_else(|| std::time::Duration::from_secs(3600));
        let expires_at =
            Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        let account = account.cloned().unwrap_or_else(|| Account {
            home_account_id: Uuid::new_v4().to_string(),
            authority: self.authority.clone(),
        });

        let mut cache = self.cache.write().await;
        let previous_refresh = cache
            .iter()
            .find(|c| c.account == account)
            .and_then(|c| c.refresh_token.clone());
        cache.retain(|c| c.account != account);
        cache.push(CachedAccount {
            account,
            access_token: access_token.clone(),
            // Refresh responses may omit the refresh token
            refresh_token: refresh_token.or(previous_refresh),
            expires_at,
            scopes: scopes.to_vec(),
        });

        TokenResult::success(access_token, Some(expires_at))
    }

    async fn cache_response(
        &self,
        account: Option<&Account>,
        scopes: &[String],
        response: &BasicTokenResponse,
    ) -> TokenResult {
        self.cache_token(
            account,
            scopes,
            response.access_token().secret().clone(),
            response.refresh_token().map(|t| t.secret().clone()),
            response.expires_in(),
        )
        .await
    }

    async fn device_code_login(&self, scopes: &[String]) -> Result<TokenResult> {
        let details: StandardDeviceAuthorizationResponse = match self
            .client
            .exchange_device_code()
            .add_scopes(request_scopes(scopes))
            .request_async(&self.http)
            .await
        {
            Ok(details) => details,
            Err(e) => return Ok(failure_from(e)),
        };

        let prompt = DeviceCodePrompt {
            verification_uri: details.verification_uri().url().as_str().to_string(),
            user_code: details.user_code().secret().clone(),
            expires_in: details.expires_in(),
        };
        tracing::info!(operation = "acquire_token_interactive", "{}", prompt);
        if let Some(handler) = &self.device_code_handler {
            handler(&prompt);
        }

        match self
            .client
            .exchange_device_access_token(&details)
            .request_async(&self.http, tokio::time::sleep, None)
            .await
        {
            Ok(response) => Ok(self.cache_response(None, scopes, &response).await),
            Err(e) => Ok(failure_from(e)),
        }
    }

    async fn browser_login(&self, scopes: &[String]) -> Result<TokenResult> {
        let listener = LoopbackListener::bind().await?;
        let redirect_uri = listener.redirect_uri();
        let pending = self.authorization_request(scopes, &redirect_uri)?;

        tracing::info!(
            operation = "acquire_token_interactive",
            "Opening browser for sign-in: {}",
            pending.url
        );
        if let Err(e) = open::that(&pending.url) {
            tracing::warn!(
                operation = "acquire_token_interactive",
                "Could not open a browser ({}); visit the URL above to sign in",
                e
            );
        }

        let callback = listener.wait().await?;
        let code = match validate_callback(callback, &pending.csrf_state) {
            Ok(code) => code,
            Err(failure) => return Ok(failure),
        };

        let redirect = RedirectUrl::new(redirect_uri)
            .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?;

        match self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pending.pkce_verifier)
            .set_redirect_uri(Cow::Owned(redirect))
            .request_async(&self.http)
            .await
        {
            Ok(response) => Ok(self.cache_response(None, scopes, &response).await),
            Err(e) => Ok(failure_from(e)),
        }
    }
}

#[async_trait]
impl IdentityClient for PublicClient {
    async fn accounts(&self) -> Vec<Account> {
        self.cache
            .read()
            .await
            .iter()
            .map(|c| c.account.clone())
            .collect()
    }

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> Option<TokenResult> {
        let entry = self
            .cache
            .read()
            .await
            .iter()
            .find(|c| &c.account == account)
            .cloned()?;

        if !entry.is_expired() && entry.covers(scopes) {
            return Some(TokenResult::success(entry.access_token, Some(entry.expires_at)));
        }

        let refresh_token = entry.refresh_token?;

        tracing::info!(operation = "acquire_token_silent", "Refreshing expired access token");

        match self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .add_scopes(request_scopes(scopes))
            .request_async(&self.http)
            .await
        {
            Ok(response) => Some(self.cache_response(Some(account), scopes, &response).await),
            Err(e) => {
                tracing::warn!(
                    operation = "acquire_token_silent",
                    "Token refresh failed: {}",
                    e
                );
                None
            }
        }
    }

    async fn acquire_token_interactive(&self, scopes: &[String]) -> Result<TokenResult> {
        match self.mode {
            InteractiveMode::DeviceCode => self.device_code_login(scopes).await,
            InteractiveMode::Browser => self.browser_login(scopes).await,
        }
    }
}

/// Authorization code from a redirect, or the failure to report.
///
/// The state must match the request before any other field is trusted.
fn validate_callback(
    callback: AuthCallback,
    expected_state: &str,
) -> std::result::Result<String, TokenResult> {
    if callback.state.as_deref() != Some(expected_state) {
        return Err(TokenResult::failure(
            "state_mismatch",
            Some("Sign-in response did not match the request".to_string()),
        ));
    }
    if let Some(error) = callback.error {
        return Err(TokenResult::failure(error, callback.error_description));
    }
    callback.code.ok_or_else(|| {
        TokenResult::failure(
            "missing_code",
            Some("Sign-in response carried no authorization code".to_string()),
        )
    })
}

/// Configured scopes plus the reserved ones, without duplicates.
fn request_scopes(scopes: &[String]) -> Vec<Scope> {
    let mut all: Vec<String> = scopes.to_vec();
    for reserved in RESERVED_SCOPES {
        if !all.iter().any(|s| s.eq_ignore_ascii_case(reserved)) {
            all.push(reserved.to_string());
        }
    }
    all.into_iter().map(Scope::new).collect()
}

fn failure_from<RE, T>(err: RequestTokenError<RE, StandardErrorResponse<T>>) -> TokenResult
where
    RE: std::error::Error + 'static,
    T: ErrorResponseType + fmt::Display + 'static,
    StandardErrorResponse<T>: ErrorResponse,
{
    match err {
        RequestTokenError::ServerResponse(response) => TokenResult::failure(
            response.error().to_string(),
            response.error_description().cloned(),
        ),
        other => TokenResult::failure("request_failed", Some(other.to_string())),
    }
}
