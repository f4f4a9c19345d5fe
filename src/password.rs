//! Password hashing with bcrypt.
//!
//! bcrypt only reads the first 72 bytes of its input. Signup rejects longer
//! passwords outright, and verification truncates to the same limit so hashes
//! produced by deployments that truncated silently keep verifying.

/// Maximum number of password bytes bcrypt takes into account.
pub const MAX_PASSWORD_BYTES: usize = 72;

fn effective_bytes(password: &str) -> &[u8] {
    let bytes = password.as_bytes();
    &bytes[..bytes.len().min(MAX_PASSWORD_BYTES)]
}

/// Work factor used outside of tests.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Lowest work factor bcrypt accepts. Only fit for tests.
pub const MIN_COST: u32 = 4;

/// Hash a password with a fresh salt.
pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(effective_bytes(password), cost)
}

/// Verify a password against a stored bcrypt hash.
/// A stored value that is not a bcrypt hash never verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(effective_bytes(password), hash).unwrap_or(false)
}

/// Whether a password fits bcrypt's input limit.
pub fn within_limit(password: &str) -> bool {
    password.len() <= MAX_PASSWORD_BYTES
}
