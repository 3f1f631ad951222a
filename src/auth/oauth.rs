//! OAuth2 authorization-code flow with PKCE (public client, no secret)

use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier,
    RequestTokenError, Scope, TokenResponse,
};
use url::Url;

use super::pkce;
use super::tokens::{expiry_from_lifetime, now_ms, CredentialStore};
use crate::config::OAuthSettings;
use crate::store::{KeyValueStore, StoreError};

/// Errors from the login flow.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token endpoint refused the code or answered with something unusable.
    #[error("Token exchange failed")]
    ExchangeFailed,
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("could not generate PKCE verifier: {0}")]
    Entropy(String),
    #[error("token request failed: {0}")]
    Transport(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not open authorization page: {0}")]
    Navigation(String),
}

/// Where the user agent is sent during login.
///
/// `assign` hands the authorization URL to the user (the flow continues when
/// they come back with the redirected URL). `replace` is the cosmetic
/// "strip the code from the address bar" step and may fail freely.
pub trait Navigator {
    fn assign(&self, url: &Url) -> anyhow::Result<()>;
    fn replace(&self, url: &str) -> anyhow::Result<()>;
}

/// Navigator for plain terminal use: prints the URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn assign(&self, url: &Url) -> anyhow::Result<()> {
        println!();
        println!("To sign in, open this URL in your browser:");
        println!("  {}", url);
        println!();
        Ok(())
    }

    fn replace(&self, url: &str) -> anyhow::Result<()> {
        tracing::debug!("Redirect handled, landing page is {}", url);
        Ok(())
    }
}

/// Public client: the client id travels in the request body, no secret.
fn build_client(settings: &OAuthSettings) -> BasicClient {
    BasicClient::new(
        settings.client_id.clone(),
        None,
        settings.auth_url.clone(),
        Some(settings.token_url.clone()),
    )
    .set_auth_type(AuthType::RequestBody)
    .set_redirect_uri(settings.redirect_uri.clone())
}

/// PKCE authenticator bound to one credential store.
pub struct Authenticator<S, N> {
    settings: OAuthSettings,
    client: BasicClient,
    credentials: CredentialStore<S>,
    navigator: N,
}

impl<S: KeyValueStore, N: Navigator> Authenticator<S, N> {
    pub fn new(settings: OAuthSettings, store: S, navigator: N) -> Self {
        Self {
            client: build_client(&settings),
            settings,
            credentials: CredentialStore::new(store),
            navigator,
        }
    }

    /// Currently stored token, if still valid.
    pub fn stored_token(&self) -> Option<String> {
        self.credentials.valid_token()
    }

    /// Build the authorization URL for a given challenge.
    pub fn authorize_url(&self, challenge: PkceCodeChallenge) -> Url {
        let scopes = self
            .settings
            .scopes
            .split_whitespace()
            .map(|s| Scope::new(s.to_string()));
        let (url, _state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes)
            .set_pkce_challenge(challenge)
            .url();
        url
    }

    /// Begin a login: persist a fresh verifier and send the user to the
    /// authorization page. Overwrites any verifier from an earlier attempt.
    pub fn start_login(&mut self) -> Result<Url, AuthError> {
        let verifier = pkce::generate_verifier().map_err(|e| AuthError::Entropy(e.to_string()))?;
        self.credentials.save_verifier(&verifier)?;

        let url = self.authorize_url(pkce::challenge_for(&verifier));
        tracing::info!("Redirecting to authorization endpoint");
        self.navigator
            .assign(&url)
            .map_err(|e| AuthError::Navigation(format!("{:#}", e)))?;
        Ok(url)
    }

    /// Complete a pending login from the URL the user was redirected to.
    ///
    /// Without a non-empty `code` parameter this only reports the stored token.
    pub async fn handle_redirect_and_get_token(
        &mut self,
        current_url: &str,
    ) -> Result<Option<String>, AuthError> {
        let url = Url::parse(current_url.trim())?;
        let code = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .filter(|c| !c.is_empty());

        let Some(code) = code else {
            if let Some((_, err)) = url.query_pairs().find(|(k, _)| k == "error") {
                tracing::warn!("Authorization was not granted: {}", err);
            }
            return Ok(self.credentials.valid_token());
        };

        let verifier = self.credentials.verifier().unwrap_or_default();
        if verifier.is_empty() {
            tracing::warn!("No PKCE verifier stored; the exchange will be rejected");
        }

        tracing::debug!("Exchanging authorization code at {}", self.settings.token_url.as_str());
        let token = match self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier))
            .request_async(async_http_client)
            .await
        {
            Ok(token) => token,
            Err(RequestTokenError::Request(e)) => return Err(AuthError::Transport(e.to_string())),
            Err(RequestTokenError::ServerResponse(e)) => {
                tracing::warn!("Token endpoint rejected the code: {}", e);
                return Err(AuthError::ExchangeFailed);
            }
            Err(e) => {
                tracing::warn!("Unusable token endpoint response: {}", e);
                return Err(AuthError::ExchangeFailed);
            }
        };

        let access_token = token.access_token().secret().to_string();
        let expires_in = token.expires_in().map(|d| d.as_secs()).unwrap_or_default();
        let expires_at_ms = expiry_from_lifetime(now_ms(), expires_in);
        self.credentials.save_token(&access_token, expires_at_ms)?;
        tracing::info!("Access token stored");

        let clean = self.settings.redirect_uri.as_str().replace("/callback", "/");
        if !clean.is_empty() {
            if let Err(e) = self.navigator.replace(&clean) {
                tracing::debug!("Could not rewrite location: {:#}", e);
            }
        }

        Ok(Some(access_token))
    }

    /// Forget everything the store holds.
    pub fn logout(&mut self) -> Result<(), AuthError> {
        self.credentials.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REDIRECT: &str = "http://127.0.0.1:8888/callback";

    #[derive(Clone, Default)]
    struct RecordingNavigator {
        assigned: Arc<Mutex<Vec<String>>>,
        replaced: Arc<Mutex<Vec<String>>>,
        fail_replace: bool,
    }

    impl Navigator for RecordingNavigator {
        fn assign(&self, url: &Url) -> anyhow::Result<()> {
            self.assigned.lock().unwrap().push(url.to_string());
            Ok(())
        }

        fn replace(&self, url: &str) -> anyhow::Result<()> {
            if self.fail_replace {
                anyhow::bail!("history unavailable");
            }
            self.replaced.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn settings(accounts_url: &str) -> OAuthSettings {
        Config {
            client_id: "test-client".to_string(),
            redirect_uri: REDIRECT.to_string(),
            accounts_url: accounts_url.to_string(),
            ..Config::default()
        }
        .oauth()
        .unwrap()
    }

    fn authenticator(
        accounts_url: &str,
        navigator: RecordingNavigator,
    ) -> Authenticator<MemoryStore, RecordingNavigator> {
        Authenticator::new(settings(accounts_url), MemoryStore::new(), navigator)
    }

    #[test]
    fn test_start_login_builds_authorize_url() {
        let nav = RecordingNavigator::default();
        let mut auth = authenticator("https://accounts.example.com", nav.clone());

        let url = auth.start_login().unwrap();

        assert_eq!(url.path(), "/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("client_id"), "test-client");
        assert_eq!(get("response_type"), "code");
        assert_eq!(get("redirect_uri"), REDIRECT);
        assert_eq!(get("code_challenge_method"), "S256");
        assert!(!get("state").is_empty());
        assert_eq!(
            get("scope"),
            "streaming user-read-playback-state user-modify-playback-state"
        );

        let verifier = auth.credentials.verifier().unwrap();
        assert_eq!(
            get("code_challenge"),
            pkce::challenge_for(&verifier).as_str()
        );
        assert_eq!(nav.assigned.lock().unwrap().as_slice(), [url.to_string()]);
    }

    #[test]
    fn test_second_login_replaces_verifier() {
        let mut auth = authenticator("https://accounts.example.com", Default::default());
        auth.start_login().unwrap();
        let first = auth.credentials.verifier().unwrap();
        auth.start_login().unwrap();
        let second = auth.credentials.verifier().unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_no_code_and_no_token_is_none() {
        let mut auth = authenticator("https://accounts.example.com", Default::default());
        let token = auth.handle_redirect_and_get_token(REDIRECT).await.unwrap();
        assert_eq!(token, None);
    }

    #[tokio::test]
    async fn test_no_code_returns_stored_token() {
        let mut store = MemoryStore::new();
        store.set("sp_token", "stored").unwrap();
        store.set("sp_token_exp", &(now_ms() + 60_000).to_string()).unwrap();
        let mut auth = Authenticator::new(
            settings("https://accounts.example.com"),
            store,
            RecordingNavigator::default(),
        );

        let token = auth
            .handle_redirect_and_get_token("http://127.0.0.1:8888/callback?error=access_denied")
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("stored"));
    }

    #[tokio::test]
    async fn test_empty_code_returns_stored_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(0)
            .mount(&server)
            .await;

        let mut store = MemoryStore::new();
        store.set("sp_token", "stored").unwrap();
        store.set("sp_token_exp", &(now_ms() + 60_000).to_string()).unwrap();
        let mut auth =
            Authenticator::new(settings(&server.uri()), store, RecordingNavigator::default());

        let token = auth
            .handle_redirect_and_get_token("http://127.0.0.1:8888/callback?code=")
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("stored"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_code_exchange_persists_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("client_id=test-client"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains(
                "redirect_uri=http%3A%2F%2F127.0.0.1%3A8888%2Fcallback",
            ))
            .and(body_string_contains("code_verifier=stored-verifier"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "access_token": "abc",
                    "token_type": "Bearer",
                    "expires_in": 3600
                })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let nav = RecordingNavigator::default();
        let mut auth = authenticator(&server.uri(), nav.clone());
        auth.credentials.save_verifier("stored-verifier").unwrap();

        let before = now_ms();
        let token = auth
            .handle_redirect_and_get_token("http://127.0.0.1:8888/callback?code=the-code")
            .await
            .unwrap();
        let after = now_ms();

        assert_eq!(token.as_deref(), Some("abc"));
        let stored = auth.credentials.stored_token().unwrap();
        assert_eq!(stored.token, "abc");
        assert!(stored.expires_at_ms >= before + 3_540_000);
        assert!(stored.expires_at_ms <= after + 3_540_000);
        assert_eq!(
            nav.replaced.lock().unwrap().as_slice(),
            ["http://127.0.0.1:8888/"]
        );
    }

    #[tokio::test]
    async fn test_rejected_exchange_persists_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid authorization code"
            })))
            .mount(&server)
            .await;

        let nav = RecordingNavigator::default();
        let mut auth = authenticator(&server.uri(), nav.clone());

        let err = auth
            .handle_redirect_and_get_token("http://127.0.0.1:8888/callback?code=bad")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ExchangeFailed));
        assert_eq!(err.to_string(), "Token exchange failed");
        assert!(auth.credentials.stored_token().is_none());
        assert!(auth.credentials.inner().is_empty());
        assert!(nav.replaced.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_verifier_still_sends_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let mut auth = authenticator(&server.uri(), Default::default());
        let result = auth
            .handle_redirect_and_get_token("http://127.0.0.1:8888/callback?code=stray")
            .await;
        assert!(matches!(result, Err(AuthError::ExchangeFailed)));

        let requests = server.received_requests().await.unwrap();
        let form: Vec<(String, String)> = url::form_urlencoded::parse(&requests[0].body)
            .into_owned()
            .collect();
        assert!(form.contains(&("code_verifier".to_string(), String::new())));
    }

    #[tokio::test]
    async fn test_failed_location_rewrite_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let nav = RecordingNavigator {
            fail_replace: true,
            ..Default::default()
        };
        let mut auth = authenticator(&server.uri(), nav);

        let token = auth
            .handle_redirect_and_get_token("http://127.0.0.1:8888/callback?code=ok")
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_logout_clears_store() {
        let mut auth = authenticator("https://accounts.example.com", Default::default());
        auth.start_login().unwrap();
        auth.credentials.save_token("abc", u64::MAX).unwrap();

        auth.logout().unwrap();

        assert!(auth.credentials.inner().is_empty());
        assert!(auth.stored_token().is_none());
    }

    #[test]
    fn test_garbage_url_is_rejected() {
        let mut auth = authenticator("https://accounts.example.com", Default::default());
        let result = tokio_test::block_on(auth.handle_redirect_and_get_token("not a url"));
        assert!(matches!(result, Err(AuthError::InvalidUrl(_))));
    }
}
