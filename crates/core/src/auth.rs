// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Challenge-response authentication.
//!
//! Both peers derive the same secret from the shared TLS certificate file:
//! the lower-case hex SHA-512 of the trimmed file contents. Authentication
//! is `HMAC-SHA512(secret, challenge)`, transferred as 128 lower-case hex
//! ASCII bytes. There is no out-of-band secret.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};
use std::path::Path;
use subtle::ConstantTimeEq;

/// Length of the hex-encoded HMAC digest, which is also the fixed AUTH
/// payload length.
pub const DIGEST_LEN: usize = 128;

type HmacSha512 = Hmac<Sha512>;

/// Derive the shared secret key from the certificate file contents.
pub fn derive_secret_key(cert_path: &Path) -> std::io::Result<Vec<u8>> {
    let contents = std::fs::read_to_string(cert_path)?;
    let digest = Sha512::digest(contents.trim().as_bytes());
    Ok(hex::encode(digest).into_bytes())
}

/// Compute the hex digest an agent answers a challenge with.
pub fn challenge_digest(secret_key: &[u8], challenge: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length; new_from_slice only fails for
    // variable-output MACs.
    #[allow(clippy::unwrap_used)]
    let mut mac = HmacSha512::new_from_slice(secret_key).unwrap();
    mac.update(challenge);
    hex::encode(mac.finalize().into_bytes()).into_bytes()
}

/// Constant-time check of a received digest against the expected one.
pub fn verify_digest(secret_key: &[u8], challenge: &[u8], digest: &[u8]) -> bool {
    let expected = challenge_digest(secret_key, challenge);
    expected.ct_eq(digest).into()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
