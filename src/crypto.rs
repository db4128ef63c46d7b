use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// PBKDF2-HMAC-SHA256 iteration count for password stretching.
pub const PBKDF2_ITERATIONS: u32 = 260_000;

/// Salt byte length before hex encoding.
const SALT_BYTES: usize = 16;

/// Session/CSRF token byte length before hex encoding (32 bytes = 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// Derived key byte length.
const KEY_BYTES: usize = 32;

/// Generate a random password salt (hex-encoded).
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a random high-entropy token (hex-encoded). Used for both
/// session tokens and the per-session CSRF token.
pub fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Derive the stored password hash for a plaintext and a hex salt.
pub fn hash_password(plain: &str, salt_hex: &str) -> anyhow::Result<String> {
    let salt = hex::decode(salt_hex)?;
    let mut key = [0u8; KEY_BYTES];
    pbkdf2_hmac::<Sha256>(plain.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);
    Ok(hex::encode(key))
}

/// Recompute the derived key and compare against the stored hash without
/// short-circuiting on the first mismatched byte.
pub fn verify_password(plain: &str, salt_hex: &str, stored_hash: &str) -> anyhow::Result<bool> {
    let computed = hash_password(plain, salt_hex)?;
    Ok(constant_time_eq(
        computed.as_bytes(),
        stored_hash.as_bytes(),
    ))
}

/// Burn one KDF run. The unknown-username login path must cost the same as a
/// real password verification.
pub fn dummy_password_check(plain: &str) {
    let mut key = [0u8; KEY_BYTES];
    pbkdf2_hmac::<Sha256>(plain.as_bytes(), &[0u8; SALT_BYTES], PBKDF2_ITERATIONS, &mut key);
}

/// Fingerprint of the client user-agent string (sha256, hex). Clients that
/// send no user-agent hash the empty string.
pub fn user_agent_fingerprint(user_agent: &str) -> String {
    let mut h = Sha256::new();
    h.update(user_agent.as_bytes());
    hex::encode(h.finalize())
}

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
