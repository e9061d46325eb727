//! HMAC-SHA256 signing for the remember cookie.
//!
//! The cookie value is `{token}.{hex-hmac-sha256}`, keyed by the configured
//! secret. A value whose mac does not verify is treated exactly like an
//! unknown token, so a forged or truncated cookie degrades to the ordinary
//! "stale remember token" path.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn hex_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
            use std::fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

/// Generate a random secret suitable for `SecurityConfig::secret_key`
/// (64 character hex string).
#[must_use]
pub fn generate_secret_key() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex_encode(&bytes)
}

/// Sign a token into a cookie value.
#[must_use]
pub fn sign_cookie_value(token: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(token.as_bytes());
    let signature = mac.finalize().into_bytes();

    format!("{token}.{}", hex_encode(&signature))
}

/// Verify a cookie value and return the embedded token.
#[must_use]
pub fn verify_cookie_value<'a>(value: &'a str, secret: &str) -> Option<&'a str> {
    let (token, signature) = value.rsplit_once('.')?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(token.as_bytes());
    mac.verify_slice(&hex_decode(signature)?).ok()?;

    Some(token)
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn signed_value_round_trips() {
        let value = sign_cookie_value("my-token", SECRET);
        assert_eq!(verify_cookie_value(&value, SECRET), Some("my-token"));
    }

    #[test]
    fn tampered_token_fails_verification() {
        let value = sign_cookie_value("my-token", SECRET);
        let tampered = value.replacen("my-token", "MY-token", 1);
        assert_eq!(verify_cookie_value(&tampered, SECRET), None);
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let value = sign_cookie_value("my-token", SECRET);
        assert_eq!(verify_cookie_value(&value, "other-secret"), None);
    }

    #[test]
    fn malformed_values_fail_cleanly() {
        assert_eq!(verify_cookie_value("no-separator", SECRET), None);
        assert_eq!(verify_cookie_value("token.nothex!", SECRET), None);
        assert_eq!(verify_cookie_value("", SECRET), None);
    }

    #[test]
    fn generated_secret_is_hex() {
        let secret = generate_secret_key();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
