//! Authentication against the Spotify accounts service
//!
//! Implements the OAuth2 authorization-code flow with PKCE for a public
//! client. Tokens are kept in the credential store; there is no refresh, an
//! expired token means logging in again.

pub mod oauth;
pub mod pkce;
pub mod tokens;

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

pub use oauth::{AuthError, Authenticator, Navigator, TerminalNavigator};
pub use tokens::{CredentialStore, StoredToken};

use crate::config::Config;
use crate::store::FileStore;

/// Authenticator wired to the on-disk store, for CLI commands.
pub fn cli_authenticator(config: &Config) -> Result<Authenticator<FileStore, TerminalNavigator>> {
    let store = FileStore::open_default().context("Failed to open credential store")?;
    Ok(Authenticator::new(config.oauth()?, store, TerminalNavigator))
}

/// Valid stored token or a hint to log in.
pub fn require_token(config: &Config) -> Result<String> {
    let auth = cli_authenticator(config)?;
    auth.stored_token()
        .context("Not logged in or token expired. Run 'hidden-player login'.")
}

/// Interactive login: print the authorization URL, then read back the URL
/// the browser landed on.
pub async fn login(force: bool) -> Result<()> {
    let config = Config::load()?;
    let mut auth = cli_authenticator(&config)?;

    if !force && auth.stored_token().is_some() {
        println!("Already logged in (token valid). Use --force to re-authenticate.");
        return Ok(());
    }

    auth.start_login()?;

    print!("Paste the URL you were redirected to: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read redirect URL")?;

    finish_login(&mut auth, &line).await
}

/// Non-interactive second half of the login.
pub async fn complete_login(redirect_url: &str) -> Result<()> {
    let config = Config::load()?;
    let mut auth = cli_authenticator(&config)?;
    finish_login(&mut auth, redirect_url).await
}

async fn finish_login(
    auth: &mut Authenticator<FileStore, TerminalNavigator>,
    redirect_url: &str,
) -> Result<()> {
    match auth.handle_redirect_and_get_token(redirect_url).await? {
        Some(_) => println!("Login successful."),
        None => println!("No authorization code in that URL and no stored token. Run 'hidden-player login' again."),
    }
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let mut store = FileStore::open_default().context("Failed to open credential store")?;
    crate::store::KeyValueStore::clear(&mut store).context("Failed to clear credentials")?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let store = FileStore::open_default().context("Failed to open credential store")?;
    let creds = CredentialStore::new(store);

    match creds.stored_token() {
        Some(token) => {
            let state = if token.is_expired() { "expired" } else { "valid" };
            println!("Access token: {}", state);
            match chrono::DateTime::from_timestamp_millis(token.expires_at_ms as i64) {
                Some(at) if token.expires_at_ms > 0 => println!("  expires_at: {}", at.to_rfc3339()),
                _ => println!("  expires_at: unknown"),
            }
        }
        None => println!("Access token: none"),
    }

    if creds.verifier().is_some() {
        println!("PKCE verifier: present");
    } else {
        println!("PKCE verifier: none");
    }

    println!("Store:        {}", creds.inner().path().display());

    if creds.valid_token().is_none() {
        println!("\nRun 'hidden-player login' to authenticate.");
    }

    Ok(())
}
