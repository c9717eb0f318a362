//! `state` and `nonce` values binding a wallet response to the request that caused it.
use base64::prelude::*;
use rand::{rngs::OsRng, RngCore};

/// Number of random bytes behind each correlation value (256 bits).
pub const ENTROPY_BYTES: usize = 32;

/// Correlation values minted for a single presentation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub state: String,
    pub nonce: String,
}

/// Mint a fresh `state` and `nonce`.
pub fn issue() -> Correlation {
    Correlation {
        state: random_token(),
        nonce: random_token(),
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Check a presented `state` against the one bound to the session.
///
/// Runs in time independent of where the first differing byte is.
pub fn validate(expected: &str, presented: &str) -> bool {
    let (expected, presented) = (expected.as_bytes(), presented.as_bytes());
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .iter()
        .zip(presented)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
