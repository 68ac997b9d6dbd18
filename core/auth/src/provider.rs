//! Bearer-token provider: silent acquisition first, interactive fallback.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;

use integrator_common::{AccessToken, Error, Result};

use crate::credentials::Credentials;
use crate::identity::IdentityClient;

/// How a token acquisition ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenAcquisition {
    /// Served silently from a cached account.
    Cached(AccessToken),
    /// Obtained through an interactive login.
    Interactive(AccessToken),
    /// Both paths exhausted; carries the provider's error description.
    Failed(String),
}

impl TokenAcquisition {
    /// Short label for logs and CLI output.
    pub fn source(&self) -> &'static str {
        match self {
            TokenAcquisition::Cached(_) => "cached",
            TokenAcquisition::Interactive(_) => "interactive",
            TokenAcquisition::Failed(_) => "failed",
        }
    }

    pub fn into_result(self) -> Result<AccessToken> {
        match self {
            TokenAcquisition::Cached(token) | TokenAcquisition::Interactive(token) => Ok(token),
            TokenAcquisition::Failed(description) => Err(Error::Authentication(description)),
        }
    }
}

/// Token acquisition limits.
#[derive(Debug, Clone)]
pub struct TokenOptions {
    /// Upper bound for the silent attempt.
    pub silent_timeout: Duration,
    /// Upper bound for the interactive login; unbounded when `None`.
    pub interactive_timeout: Option<Duration>,
}

impl Default for TokenOptions {
    fn default() -> Self {
        Self {
            silent_timeout: Duration::from_secs(30),
            interactive_timeout: None,
        }
    }
}

/// Produces bearer tokens for a public-client identity.
///
/// Acquisitions are serialized so concurrent callers never trigger two
/// interactive logins at once.
pub struct TokenProvider {
    scopes: Vec<String>,
    identity: Arc<dyn IdentityClient>,
    options: TokenOptions,
    acquire_lock: Mutex<()>,
    span: tracing::Span,
}

impl TokenProvider {
    /// Create a provider for `credentials` backed by `identity`.
    pub fn new(credentials: &Credentials, identity: Arc<dyn IdentityClient>) -> Self {
        Self {
            scopes: credentials.scopes().to_vec(),
            identity,
            options: TokenOptions::default(),
            acquire_lock: Mutex::new(()),
            span: tracing::info_span!("token_provider", client_id = %credentials.client_id()),
        }
    }

    /// Load the secrets file, then build the identity client with `factory`.
    ///
    /// The factory is only invoked once the secrets are valid, so a bad
    /// file never reaches the network.
    ///
    /// # Errors
    /// - `Error::Config` for an invalid secrets file
    /// - Any error returned by `factory`
    pub fn load<F>(path: &Path, factory: F) -> Result<Self>
    where
        F: FnOnce(&Credentials) -> Result<Arc<dyn IdentityClient>>,
    {
        let credentials = Credentials::load(path)?;
        let identity = factory(&credentials)?;
        Ok(Self::new(&credentials, identity))
    }

    pub fn with_options(mut self, options: TokenOptions) -> Self {
        self.options = options;
        self
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Get a bearer token.
    ///
    /// # Errors
    /// - `Error::Authentication` when neither path yields a token
    pub async fn acquire(&self) -> Result<AccessToken> {
        self.acquire_with_source().await.into_result()
    }

    /// Run the acquisition sequence and report which path produced the token.
    ///
    /// 1. Look up cached accounts.
    /// 2. With an account, try silent acquisition (bounded by the silent timeout).
    /// 3. Without a usable silent result, run the interactive login once.
    /// 4. Take the access token from the result, or fail with its error
    ///    description.
    pub async fn acquire_with_source(&self) -> TokenAcquisition {
        let _guard = self.acquire_lock.lock().await;
        self.run_sequence().instrument(self.span.clone()).await
    }

    async fn run_sequence(&self) -> TokenAcquisition {
        let accounts = self.identity.accounts().await;

        if let Some(account) = accounts.first() {
            let silent = tokio::time::timeout(
                self.options.silent_timeout,
                self.identity.acquire_token_silent(&self.scopes, account),
            )
            .await;

            match silent {
                Ok(Some(result)) => match result.usable_token() {
                    Some(token) => {
                        tracing::debug!(operation = "acquire", subject = %account.home_account_id, "Token served from cache");
                        return TokenAcquisition::Cached(token);
                    }
                    None => tracing::debug!(
                        operation = "acquire",
                        subject = %account.home_account_id,
                        "Silent result carried no access token"
                    ),
                },
                Ok(None) => tracing::debug!(
                    operation = "acquire",
                    subject = %account.home_account_id,
                    "No silent result"
                ),
                Err(_) => tracing::warn!(
                    operation = "acquire",
                    subject = %account.home_account_id,
                    "Silent acquisition timed out after {}s",
                    self.options.silent_timeout.as_secs()
                ),
            }
        }

        tracing::info!(operation = "acquire", "Please log in to acquire a token");

        let interactive = self.identity.acquire_token_interactive(&self.scopes);
        let outcome = match self.options.interactive_timeout {
            Some(limit) => match tokio::time::timeout(limit, interactive).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let description =
                        format!("Interactive login timed out after {}s", limit.as_secs());
                    tracing::error!(operation = "acquire", "{}", description);
                    return TokenAcquisition::Failed(description);
                }
            },
            None => interactive.await,
        };

        match outcome {
            Ok(result) => match result.usable_token() {
                Some(token) => {
                    tracing::info!(operation = "acquire", "Token acquired interactively");
                    TokenAcquisition::Interactive(token)
                }
                None => {
                    let description = result
                        .error_description
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string());
                    tracing::error!(
                        operation = "acquire",
                        "Failed to acquire access token: {}",
                        description
                    );
                    TokenAcquisition::Failed(description)
                }
            },
            Err(e) => {
                tracing::error!(operation = "acquire", "Interactive login failed: {}", e);
                TokenAcquisition::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Account, TokenResult};
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted identity client counting each call.
    struct FakeIdentity {
        accounts: Vec<Account>,
        silent: Option<TokenResult>,
        interactive: std::result::Result<TokenResult, String>,
        interactive_delay: Option<Duration>,
        silent_hangs: bool,
        silent_calls: AtomicUsize,
        interactive_calls: AtomicUsize,
        interactive_in_flight: AtomicUsize,
        max_interactive_in_flight: AtomicUsize,
        seen_scopes: std::sync::Mutex<Vec<Vec<String>>>,
    }

    impl FakeIdentity {
        fn scripted(
            accounts: Vec<Account>,
            silent: Option<TokenResult>,
            interactive: std::result::Result<TokenResult, String>,
        ) -> Self {
            Self {
                accounts,
                silent,
                interactive,
                interactive_delay: None,
                silent_hangs: false,
                silent_calls: AtomicUsize::new(0),
                interactive_calls: AtomicUsize::new(0),
                interactive_in_flight: AtomicUsize::new(0),
                max_interactive_in_flight: AtomicUsize::new(0),
                seen_scopes: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn new(
            accounts: Vec<Account>,
            silent: Option<TokenResult>,
            interactive: std::result::Result<TokenResult, String>,
        ) -> Arc<Self> {
            Arc::new(Self::scripted(accounts, silent, interactive))
        }
    }

    #[async_trait]
    impl IdentityClient for FakeIdentity {
        async fn accounts(&self) -> Vec<Account> {
            self.accounts.clone()
        }

        async fn acquire_token_silent(
            &self,
            scopes: &[String],
            _account: &Account,
        ) -> Option<TokenResult> {
            self.silent_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_scopes.lock().unwrap().push(scopes.to_vec());
            if self.silent_hangs {
                std::future::pending::<()>().await;
            }
            self.silent.clone()
        }

        async fn acquire_token_interactive(&self, scopes: &[String]) -> Result<TokenResult> {
            self.interactive_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_scopes.lock().unwrap().push(scopes.to_vec());
            let in_flight = self.interactive_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_interactive_in_flight
                .fetch_max(in_flight, Ordering::SeqCst);
            if let Some(delay) = self.interactive_delay {
                tokio::time::sleep(delay).await;
            }
            self.interactive_in_flight.fetch_sub(1, Ordering::SeqCst);
            self.interactive
                .clone()
                .map_err(Error::Authentication)
        }
    }

    fn credentials() -> Credentials {
        Credentials::from_json(
            r#"{"CLIENT_ID": "test_id",
                "AUTHORITY": "https://login.microsoftonline.com/common",
                "SCOPES": ["Files.ReadWrite.All"]}"#,
        )
        .unwrap()
    }

    fn account() -> Account {
        Account {
            home_account_id: "acc-1".to_string(),
            authority: "https://login.microsoftonline.com/common".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cached_result_skips_interactive() {
        let fake = FakeIdentity::new(
            vec![account()],
            Some(TokenResult::success("cached-token", None)),
            Ok(TokenResult::success("interactive-token", None)),
        );
        let provider = TokenProvider::new(&credentials(), fake.clone());

        let acquisition = provider.acquire_with_source().await;

        assert_eq!(acquisition.source(), "cached");
        assert_eq!(acquisition.into_result().unwrap().secret(), "cached-token");
        assert_eq!(fake.silent_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fake.interactive_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_silent_result_falls_back_once() {
        let fake = FakeIdentity::new(
            vec![account()],
            None,
            Ok(TokenResult::success("interactive-token", None)),
        );
        let provider = TokenProvider::new(&credentials(), fake.clone());

        let token = provider.acquire().await.unwrap();

        assert_eq!(token.secret(), "interactive-token");
        assert_eq!(fake.silent_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fake.interactive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_silent_result_without_token_falls_back_once() {
        let fake = FakeIdentity::new(
            vec![account()],
            Some(TokenResult::failure(
                "invalid_grant",
                Some("AADSTS70000: refresh token expired".to_string()),
            )),
            Ok(TokenResult::success("interactive-token", None)),
        );
        let provider = TokenProvider::new(&credentials(), fake.clone());

        let acquisition = provider.acquire_with_source().await;

        assert_eq!(acquisition.source(), "interactive");
        assert_eq!(fake.interactive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_accounts_skips_silent() {
        let fake = FakeIdentity::new(
            Vec::new(),
            Some(TokenResult::success("never-used", None)),
            Ok(TokenResult::success("interactive-token", None)),
        );
        let provider = TokenProvider::new(&credentials(), fake.clone());

        let token = provider.acquire().await.unwrap();

        assert_eq!(token.secret(), "interactive-token");
        assert_eq!(fake.silent_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fake.interactive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_silent_failure_then_interactive_abc123() {
        let fake = FakeIdentity::new(
            vec![account()],
            None,
            Ok(TokenResult::success("abc123", None)),
        );
        let provider = TokenProvider::new(&credentials(), fake.clone());

        assert_eq!(provider.acquire().await.unwrap().secret(), "abc123");
        let seen = fake.seen_scopes.lock().unwrap().clone();
        assert!(seen
            .iter()
            .all(|s| s == &vec!["Files.ReadWrite.All".to_string()]));
    }

    #[tokio::test]
    async fn test_interactive_without_token_reports_description() {
        let fake = FakeIdentity::new(
            Vec::new(),
            None,
            Ok(TokenResult::failure(
                "access_denied",
                Some("The user declined to consent".to_string()),
            )),
        );
        let provider = TokenProvider::new(&credentials(), fake);

        match provider.acquire().await {
            Err(Error::Authentication(msg)) => assert_eq!(msg, "The user declined to consent"),
            other => panic!("expected authentication error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interactive_without_description_is_unknown_error() {
        let fake = FakeIdentity::new(Vec::new(), None, Ok(TokenResult::default()));
        let provider = TokenProvider::new(&credentials(), fake);

        assert_eq!(
            provider.acquire_with_source().await,
            TokenAcquisition::Failed("unknown error".to_string())
        );
    }

    #[tokio::test]
    async fn test_interactive_error_is_reported() {
        let fake = FakeIdentity::new(Vec::new(), None, Err("listener failed".to_string()));
        let provider = TokenProvider::new(&credentials(), fake);

        assert!(matches!(
            provider.acquire().await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactive_timeout() {
        let fake = Arc::new(FakeIdentity {
            interactive_delay: Some(Duration::from_secs(600)),
            ..FakeIdentity::scripted(Vec::new(), None, Ok(TokenResult::success("late", None)))
        });
        let provider = TokenProvider::new(&credentials(), fake).with_options(TokenOptions {
            interactive_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });

        assert_eq!(provider.acquire_with_source().await.source(), "failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_timeout_falls_back_to_interactive() {
        let fake = Arc::new(FakeIdentity {
            silent_hangs: true,
            ..FakeIdentity::scripted(
                vec![account()],
                Some(TokenResult::success("never-returned", None)),
                Ok(TokenResult::success("interactive-token", None)),
            )
        });
        let provider = TokenProvider::new(&credentials(), fake.clone());

        let acquisition = provider.acquire_with_source().await;

        assert_eq!(acquisition.source(), "interactive");
        assert_eq!(acquisition.into_result().unwrap().secret(), "interactive-token");
        assert_eq!(fake.silent_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fake.interactive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquisitions_are_serialized() {
        let fake = Arc::new(FakeIdentity {
            interactive_delay: Some(Duration::from_secs(10)),
            ..FakeIdentity::scripted(
                Vec::new(),
                None,
                Ok(TokenResult::success("interactive-token", None)),
            )
        });
        let provider = TokenProvider::new(&credentials(), fake.clone());

        let (first, second) = tokio::join!(provider.acquire(), provider.acquire());

        assert_eq!(first.unwrap().secret(), "interactive-token");
        assert_eq!(second.unwrap().secret(), "interactive-token");
        assert_eq!(fake.interactive_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fake.max_interactive_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_rejects_bad_secrets_before_factory() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"CLIENT_ID": "c", "SCOPES": ["x"]}"#).unwrap();

        let factory_calls = AtomicUsize::new(0);
        let result = TokenProvider::load(file.path(), |_| {
            factory_calls.fetch_add(1, Ordering::SeqCst);
            Ok(FakeIdentity::new(Vec::new(), None, Ok(TokenResult::default())) as Arc<dyn IdentityClient>)
        });

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(factory_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_builds_provider() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"CLIENT_ID": "c", "AUTHORITY": "https://login.microsoftonline.com/common", "SCOPES": ["Files.ReadWrite.All"]}"#,
        )
        .unwrap();

        let provider = TokenProvider::load(file.path(), |_| {
            Ok(FakeIdentity::new(Vec::new(), None, Ok(TokenResult::default())) as Arc<dyn IdentityClient>)
        })
        .unwrap();

        assert_eq!(provider.scopes(), &["Files.ReadWrite.All".to_string()]);
    }
}
