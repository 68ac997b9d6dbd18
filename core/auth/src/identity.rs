//! Identity-provider seam used by the token provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use integrator_common::{AccessToken, Result};

/// Account remembered by an identity client after an interactive login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Identifier local to the identity client's cache.
    pub home_account_id: String,
    /// Authority the account signed in against.
    pub authority: String,
}

/// Outcome of one token request, shaped like an OAuth2 token response:
/// either an access token or an error with an optional description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenResult {
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl TokenResult {
    /// Result carrying an access token.
    pub fn success(access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            expires_at,
            ..Default::default()
        }
    }

    /// Result carrying an error code and optional description.
    pub fn failure(error: impl Into<String>, description: Option<String>) -> Self {
        Self {
            error: Some(error.into()),
            error_description: description,
            ..Default::default()
        }
    }

    /// The access token, if present and non-empty.
    pub fn usable_token(&self) -> Option<AccessToken> {
        self.access_token
            .as_deref()
            .and_then(|t| AccessToken::new(t).ok())
    }
}

/// OAuth2 public-client operations the token provider relies on.
///
/// Implementations own their account cache; a successful interactive
/// login is expected to add an account to it.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Accounts currently held in the local cache.
    async fn accounts(&self) -> Vec<Account>;

    /// Obtain a token for `account` without user interaction.
    ///
    /// Returns `None` when no token can be produced silently. Must not
    /// prompt the user.
    async fn acquire_token_silent(&self, scopes: &[String], account: &Account)
        -> Option<TokenResult>;

    /// Obtain a token through a user-facing login.
    ///
    /// # Errors
    /// - The login surface could not be started
    async fn acquire_token_interactive(&self, scopes: &[String]) -> Result<TokenResult>;
}
