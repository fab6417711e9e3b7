//! Anti-forgery tokens for the consent screen.
//!
//! Each session holds a random secret. Tokens are `<salt>.<mac>` where the
//! mac is `base64url(HMAC-SHA256(secret, salt))`, so any number of tokens can
//! be minted per render and verified without server-side lists.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Something able to mint CSRF tokens for the current request.
pub trait CsrfTokenSource: Send + Sync {
    fn mint(&self) -> String;
}

pub(crate) fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn keyed_mac(key: &[u8], message: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(message.as_bytes());
    Some(mac)
}

/// `base64url(HMAC-SHA256(key, message))`.
pub(crate) fn sign(key: &[u8], message: &str) -> Option<String> {
    keyed_mac(key, message).map(|mac| URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Check a signature produced by [`sign`] in constant time.
pub(crate) fn verify_signature(key: &[u8], message: &str, signature: &str) -> bool {
    let Ok(expected) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    keyed_mac(key, message).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}

#[derive(Clone, PartialEq, Eq)]
pub struct CsrfSecret(String);

impl CsrfSecret {
    pub fn generate() -> Self {
        Self(random_token(24))
    }

    pub fn verify(&self, token: &str) -> bool {
        match token.split_once('.') {
            Some((salt, mac)) if !salt.is_empty() => {
                verify_signature(self.0.as_bytes(), salt, mac)
            }
            _ => false,
        }
    }
}

impl CsrfTokenSource for CsrfSecret {
    fn mint(&self) -> String {
        let salt = random_token(9);
        let mac = sign(self.0.as_bytes(), &salt).unwrap_or_default();
        format!("{salt}.{mac}")
    }
}

impl fmt::Debug for CsrfSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CsrfSecret(<redacted>)")
    }
}
