//! PKCE (RFC 7636) code challenge derivation.
//!
//! `challenge = BASE64URL-NOPAD(SHA256(verifier))`, sent with
//! `code_challenge_method=S256`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::random;

/// The only challenge method this client sends.
pub const CHALLENGE_METHOD: &str = "S256";

/// Derive the S256 code challenge for `verifier`.
pub fn derive_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// A verifier and the challenge derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh verifier and its challenge.
    pub fn generate() -> Result<Self> {
        let verifier = random::generate_code_verifier()?;
        let challenge = derive_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            derive_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn challenge_is_deterministic_and_url_safe() {
        let pair = PkcePair::generate().unwrap();
        assert_eq!(derive_challenge(&pair.verifier), pair.challenge);
        assert_eq!(derive_challenge(&pair.verifier), derive_challenge(&pair.verifier));

        // 32-byte digest, unpadded base64url.
        assert_eq!(pair.challenge.len(), 43);
        assert!(!pair.challenge.contains(['+', '/', '=']));
    }

    #[test]
    fn distinct_verifiers_give_distinct_challenges() {
        let a = PkcePair::generate().unwrap();
        let b = PkcePair::generate().unwrap();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }
}
