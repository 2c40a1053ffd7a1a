//! Password hashing
//!
//! One-way salted bcrypt digests. The comparison inside `bcrypt::verify` is
//! constant-time; plaintext never leaves these two functions.

/// Cost factor for bcrypt hashing, matching the digests already stored in `usuario`.
pub const BCRYPT_COST: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
}

/// Hash a password with a freshly generated salt. Identical inputs yield
/// different digests across calls.
pub fn hash_password(plaintext: &str) -> Result<String, PasswordError> {
    hash_password_with_cost(plaintext, BCRYPT_COST)
}

pub fn hash_password_with_cost(plaintext: &str, cost: u32) -> Result<String, PasswordError> {
    Ok(bcrypt::hash(plaintext, cost)?)
}

/// Verify a password against a stored digest.
///
/// A digest that is not valid bcrypt verifies as `false`: a corrupted row must
/// never let anyone in.
pub fn verify_password(plaintext: &str, digest: &str) -> bool {
    match bcrypt::verify(plaintext, digest) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::warn!("stored password digest could not be parsed: {}", e);
            false
        }
    }
}
