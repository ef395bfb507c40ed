use pbkdf2::pbkdf2;
use rand::Rng;

use crate::HmacSha256;

/// Number of PBKDF2 iterations for password stretching
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt byte length; one fresh salt per stored hash
const SALT_BYTES: usize = 16;

/// Derived key byte length
const KEY_BYTES: usize = 32;

/// Password strength violations
#[derive(Debug)]
pub enum PasswordError {
    TooShort,
    NoUppercase,
    NoLowercase,
    NoNumber,
    NoSpecialChar,
}

/// Function to validate password strength
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    if password.len() < 8 {
        return Err(PasswordError::TooShort);
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(PasswordError::NoUppercase);
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(PasswordError::NoLowercase);
    }
    if !password.chars().any(|c| c.is_numeric()) {
        return Err(PasswordError::NoNumber);
    }
    if !password
        .chars()
        .any(|c| "!@#$%^&*()_+-=[]{}|;:,.<>?".contains(c))
    {
        return Err(PasswordError::NoSpecialChar);
    }
    Ok(())
}

/// Function to generate a random salt for PBKDF2
fn generate_random_salt() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..SALT_BYTES).map(|_| rng.gen()).collect()
}

/// Function to derive a key from a password using PBKDF2
fn derive_key(password: &str, salt: &[u8]) -> Vec<u8> {
    let mut key = vec![0u8; KEY_BYTES];
    pbkdf2::<HmacSha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Hash a password with a fresh random salt. The stored form is
/// `<salt-hex>$<key-hex>`.
pub fn hash_password(password: &str) -> String {
    let salt = generate_random_salt();
    let key = derive_key(password, &salt);
    format!("{}${}", hex::encode(&salt), hex::encode(&key))
}

/// Compare a password attempt against a stored hash in constant time.
/// Malformed stored hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let (salt_hex, key_hex) = match stored.split_once('$') {
        Some(parts) => parts,
        None => return false,
    };
    let salt = match hex::decode(salt_hex) {
        Ok(salt) => salt,
        Err(_) => return false,
    };
    let expected = match hex::decode(key_hex) {
        Ok(key) => key,
        Err(_) => return false,
    };

    constant_time_eq(&derive_key(password, &salt), &expected)
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
