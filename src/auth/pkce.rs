//! PKCE (RFC 7636) verifier and S256 challenge

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use oauth2::{PkceCodeChallenge, PkceCodeVerifier};

/// Random bytes behind each verifier.
const VERIFIER_BYTES: usize = 32;

/// Generate a fresh verifier: 32 CSPRNG bytes, base64url without padding.
pub fn generate_verifier() -> Result<String, getrandom::Error> {
    let mut buf = [0u8; VERIFIER_BYTES];
    getrandom::getrandom(&mut buf)?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

/// S256 challenge: BASE64URL(SHA256(verifier)).
pub fn challenge_for(verifier: &str) -> PkceCodeChallenge {
    PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(verifier.to_string()))
}
