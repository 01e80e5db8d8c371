//! Random tokens for the `state` parameter and PKCE verifiers.
//!
//! Tokens are drawn from the RFC 3986 unreserved alphabet
//! (`A-Z a-z 0-9 - . _ ~`), so they need no escaping in a URL and satisfy
//! RFC 7636's verifier grammar.

use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, SmartAuthError};

/// Unreserved URL characters.
pub const UNRESERVED_ALPHABET: &[u8; 66] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Length used when none is requested. Stays inside PKCE's 43..=128 bound.
pub const DEFAULT_TOKEN_LENGTH: usize = 122;

/// Largest multiple of the alphabet size that fits in a byte; bytes at or
/// above it are discarded so every character is equally likely.
const ACCEPT_BELOW: u8 = (256 / UNRESERVED_ALPHABET.len() * UNRESERVED_ALPHABET.len()) as u8;

/// Generate `length` random unreserved characters from the system CSPRNG.
///
/// A `length` of zero means [`DEFAULT_TOKEN_LENGTH`].
///
/// # Errors
///
/// Returns [`SmartAuthError::Random`] if the system random source fails.
pub fn generate_token(length: usize) -> Result<String> {
    let length = if length == 0 {
        DEFAULT_TOKEN_LENGTH
    } else {
        length
    };

    let rng = SystemRandom::new();
    let mut out = String::with_capacity(length);
    let mut buf = [0u8; 64];

    while out.len() < length {
        rng.fill(&mut buf).map_err(|_| SmartAuthError::Random)?;
        for &b in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if out.len() == length {
                break;
            }
            out.push(UNRESERVED_ALPHABET[b as usize % UNRESERVED_ALPHABET.len()] as char);
        }
    }

    Ok(out)
}

/// A fresh anti-CSRF `state` value.
pub fn generate_state() -> Result<String> {
    generate_token(DEFAULT_TOKEN_LENGTH)
}

/// A fresh PKCE code verifier.
pub fn generate_code_verifier() -> Result<String> {
    generate_token(DEFAULT_TOKEN_LENGTH)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn is_unreserved(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
    }

    #[test]
    fn requested_length_is_honoured() {
        for len in [1, 2, 43, 64, 122, 128, 500] {
            let token = generate_token(len).unwrap();
            assert_eq!(token.len(), len);
            assert!(token.chars().all(is_unreserved), "bad token: {token}");
        }
    }

    #[test]
    fn zero_length_uses_default() {
        assert_eq!(generate_token(0).unwrap().len(), DEFAULT_TOKEN_LENGTH);
    }

    #[test]
    fn state_and_verifier_are_fresh() {
        let a = generate_state().unwrap();
        let b = generate_state().unwrap();
        assert_ne!(a, b);
        assert!(a.len() >= 122);

        let v = generate_code_verifier().unwrap();
        assert!((43..=128).contains(&v.len()));
    }

    #[test]
    fn accept_bound_is_a_multiple_of_alphabet() {
        assert_eq!(ACCEPT_BELOW as usize % UNRESERVED_ALPHABET.len(), 0);
        assert_eq!(ACCEPT_BELOW, 198);
    }

    #[test]
    fn every_alphabet_character_can_appear() {
        let token = generate_token(20_000).unwrap();
        for &c in UNRESERVED_ALPHABET {
            assert!(token.contains(c as char), "never drew {}", c as char);
        }
    }
}
