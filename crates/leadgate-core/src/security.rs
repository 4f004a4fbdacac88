//! Credential hashing, constant-time comparison, and HMAC request signing.
//!
//! Leadgate never stores plaintext API keys or webhook secrets: sources carry
//! SHA-256 hex digests, and every comparison against a stored digest goes
//! through [`constant_time_eq`] so the rejection path leaks no timing
//! information about the secret.
//!
//! Signed requests use the `sha256=<hex>` signature format over the string
//! `"{timestamp}.{raw_body}"`, keyed with the source's webhook secret.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ValidationError;

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a generated API key or webhook secret
pub const CREDENTIAL_BYTES: usize = 32;

// ============================================================================
// Hashing & Comparison
// ============================================================================

/// SHA-256 digest of the input, hex-encoded (lowercase)
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time equality over byte sequences.
///
/// The length check short-circuits, which is acceptable: the length of a
/// hex-encoded SHA-256 digest is public knowledge, not secret-dependent.
/// Everything beyond the length is compared without early exit.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Compare a presented plaintext credential against a stored SHA-256 hex
/// digest in constant time.
pub fn verify_against_hash(presented: &str, stored_hash_hex: &str) -> bool {
    let presented_hash = sha256_hex(presented);
    constant_time_eq(presented_hash.as_bytes(), stored_hash_hex.as_bytes())
}

// ============================================================================
// HMAC Request Signatures
// ============================================================================

/// Compute the `sha256=<hex>` signature for a timestamped request body.
///
/// The signing input is `"{timestamp}.{body}"`; binding the timestamp into
/// the digest is what makes the replay-window check meaningful.
pub fn compute_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    // HMAC can take a key of any size; new_from_slice only fails for
    // variable-output MACs, never for HMAC-SHA256.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts keys of any length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a `sha256=<hex>` signature against a recomputed digest.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidFormat`] when the signature is not in
/// `sha256=<hex>` format. A well-formed but wrong signature returns
/// `Ok(false)` so callers can distinguish malformed input (400) from a
/// failed verification (401).
pub fn verify_signature(
    secret: &str,
    timestamp: i64,
    body: &[u8],
    provided: &str,
) -> Result<bool, ValidationError> {
    let hex_part = provided
        .strip_prefix("sha256=")
        .ok_or_else(|| ValidationError::InvalidFormat {
            field: "signature".to_string(),
            message: "expected sha256=<hex> format".to_string(),
        })?;

    if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidFormat {
            field: "signature".to_string(),
            message: "signature is not valid hex".to_string(),
        });
    }

    let expected = compute_signature(secret, timestamp, body);
    let normalized = provided.to_ascii_lowercase();
    Ok(constant_time_eq(
        expected.as_bytes(),
        normalized.as_bytes(),
    ))
}

// ============================================================================
// Credential Generation
// ============================================================================

/// A freshly generated plaintext credential.
///
/// The plaintext is shown to the operator exactly once at creation time and
/// zeroized when dropped; only the [`hash`](Self::hash) is persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct GeneratedCredential {
    plaintext: String,
    #[zeroize(skip)]
    hash: String,
}

impl GeneratedCredential {
    /// Generate a new random 32-byte credential, hex-encoded
    pub fn generate() -> Self {
        let raw: [u8; CREDENTIAL_BYTES] = rand::random();
        let plaintext = hex::encode(raw);
        let hash = sha256_hex(&plaintext);
        Self { plaintext, hash }
    }

    /// Plaintext value. Display once, never persist.
    pub fn plaintext(&self) -> &str {
        &self.plaintext
    }

    /// SHA-256 hex digest safe to store
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Debug for GeneratedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedCredential")
            .field("plaintext", &"<REDACTED>")
            .field("hash", &self.hash)
            .finish()
    }
}

#[cfg(test)]
#[path = "security_tests.rs"]
mod tests;
