//! PBKDF2 password hashing.
//!
//! Stored form is `hex(salt)$hex(derived)`; verification goes through
//! [`ring::pbkdf2::verify`] so the comparison is constant-time.

use std::num::NonZeroU32;

use ring::rand::{SecureRandom, SystemRandom};
use ring::{pbkdf2, rand};
use thiserror::Error;

const PBKDF2_ROUNDS: NonZeroU32 = NonZeroU32::new(100_000).unwrap();
const SALT_LEN: usize = 16;
const CREDENTIAL_LEN: usize = 32;

pub type PasswordResult<T> = core::result::Result<T, PasswordError>;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("failed to source salt entropy")]
    Entropy,
}

impl From<ring::error::Unspecified> for PasswordError {
    fn from(_: ring::error::Unspecified) -> Self {
        PasswordError::Entropy
    }
}

pub fn hash_password(password: &str) -> PasswordResult<String> {
    let rng: SystemRandom = rand::SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)?;

    let mut derived = [0u8; CREDENTIAL_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        PBKDF2_ROUNDS,
        &salt,
        password.as_bytes(),
        &mut derived,
    );

    Ok(format!("{}${}", hex::encode(salt), hex::encode(derived)))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, derived_hex)) = stored.split_once('$') else {
        return false;
    };

    let (Ok(salt), Ok(derived)) = (hex::decode(salt_hex), hex::decode(derived_hex)) else {
        return false;
    };

    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        PBKDF2_ROUNDS,
        &salt,
        password.as_bytes(),
        &derived,
    )
    .is_ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let stored = hash_password("hunter2").unwrap();

        assert!(verify_password("hunter2", &stored));
        assert!(!verify_password("hunter3", &stored));
    }

    #[test]
    fn test_unique_salts() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_stored_hash() {
        assert!(!verify_password("whatever", "not-a-stored-hash"));
        assert!(!verify_password("whatever", "zz$zz"));
    }
}
