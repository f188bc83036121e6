//! Cryptographic primitives used by keystores to protect archives.
//!
//! This module provides the building blocks behind the crypto half of the
//! [`KeyStore`](crate::storage::KeyStore) capability:
//! - password-based key derivation (Argon2id) with a recorded round count
//! - AEAD encryption of archive payloads (AES-256-GCM or ChaCha20-Poly1305)
//! - salt and IV generation from a ChaCha20 CSPRNG seeded from system entropy
//!
//! # Examples
//!
//! ```
//! use rust_keyshelf::crypto::{CryptoConfig, KdfParams, PasswordKdf, RuntimeAead, AEAD, random_bytes};
//!
//! # fn main() -> Result<(), rust_keyshelf::KeyStoreError> {
//! let config = CryptoConfig { kdf: KdfParams::fast(), ..CryptoConfig::default() };
//! let kdf = PasswordKdf::new(config.kdf.clone(), config.algorithm);
//!
//! let salt = random_bytes(config.salt_len)?;
//! let key = kdf.derive(b"correct horse", &salt, config.kdf.rounds)?;
//! let iv = random_bytes(config.algorithm.iv_size())?;
//!
//! let ciphertext = RuntimeAead.encrypt(&key, &iv, b"[]", &[])?;
//! assert_eq!(RuntimeAead.decrypt(&key, &iv, &ciphertext, &[])?, b"[]");
//! # Ok(())
//! # }
//! ```
//!
//! # Nonce reuse
//!
//! Each archive derives a fresh key from a fresh salt, so the IV only has to
//! be unique per derived key. The all-zero legacy IV is only ever used to
//! read archives that predate the `IV` field.

use crate::{key::SecretKey, Algorithm, KeyStoreError};
use aead::{generic_array::typenum::U12, Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm as Argon2Algorithm, Argon2, Params, Version};
use chacha20poly1305::{ChaCha20Poly1305, Key as ChaChaKey, Nonce as ChaChaNonce};
use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRng, RngCore, SeedableRng};

type CryptoResult<T> = std::result::Result<T, KeyStoreError>;

// Explicit concrete type aliases with explicit sizes
type AesKey = aes_gcm::Key<Aes256Gcm>;
type AesNonce = aes_gcm::Nonce<U12>;

/// Trait for cryptographically secure random number generators.
///
/// Extends [`RngCore`] and [`CryptoRng`] with an error-mapped fill.
pub trait SecureRandom: RngCore + CryptoRng {
    /// Fill a buffer with cryptographically secure random bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the RNG fails to generate randomness.
    fn fill_secure_bytes(&mut self, dest: &mut [u8]) -> CryptoResult<()> {
        self.try_fill_bytes(dest)
            .map_err(|e| KeyStoreError::crypto("fill_bytes", format!("failed to fill secure bytes: {e}")))
    }
}

/// Blanket implementation for any crypto RNG
impl<T> SecureRandom for T where T: RngCore + CryptoRng {}

/// Generate `len` random bytes from a freshly seeded ChaCha20 CSPRNG
pub fn random_bytes(len: usize) -> CryptoResult<Vec<u8>> {
    let mut rng = ChaCha20Rng::from_entropy();
    let mut buf = vec![0u8; len];
    rng.fill_secure_bytes(&mut buf)?;
    Ok(buf)
}

/// Argon2id cost parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory size in KiB
    pub memory_kib: u32,
    /// Number of iterations; written to the archive as `Rounds`
    pub rounds: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MiB
            rounds: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and benchmarks. Not for real archives.
    pub fn fast() -> Self {
        Self {
            memory_kib: 1024,
            rounds: 1,
            parallelism: 1,
        }
    }
}

/// Crypto configuration for a keystore
#[derive(Debug, Clone)]
pub struct CryptoConfig {
    /// Cipher used for archive payloads
    pub algorithm: Algorithm,
    /// Key derivation cost
    pub kdf: KdfParams,
    /// Length of freshly generated salts
    pub salt_len: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Aes256Gcm,
            kdf: KdfParams::default(),
            salt_len: 32,
        }
    }
}

/// Password-based key derivation with Argon2id
#[derive(Debug, Clone)]
pub struct PasswordKdf {
    params: KdfParams,
    algorithm: Algorithm,
}

impl PasswordKdf {
    /// Create a derivation for keys of `algorithm`
    pub fn new(params: KdfParams, algorithm: Algorithm) -> Self {
        Self { params, algorithm }
    }

    /// Derive a key from `password` and `salt` using `rounds` iterations.
    ///
    /// Memory and parallelism come from the configured [`KdfParams`]; only the
    /// round count travels with an archive.
    pub fn derive(&self, password: &[u8], salt: &[u8], rounds: u32) -> CryptoResult<SecretKey> {
        let key_len = self.algorithm.key_size();
        let params = Params::new(
            self.params.memory_kib,
            rounds,
            self.params.parallelism,
            Some(key_len),
        )
        .map_err(|e| KeyStoreError::crypto("derive_key", format!("invalid Argon2 params: {e}")))?;

        let argon2 = Argon2::new(Argon2Algorithm::Argon2id, Version::V0x13, params);
        let mut derived = vec![0u8; key_len];
        argon2
            .hash_password_into(password, salt, &mut derived)
            .map_err(|e| KeyStoreError::crypto("derive_key", format!("Argon2 derivation failed: {e}")))?;

        SecretKey::from_bytes(derived, self.algorithm)
    }

    /// Derive a key with a fresh random salt, returning `(key, salt, rounds)`
    pub fn derive_new(&self, password: &[u8], salt_len: usize) -> CryptoResult<(SecretKey, Vec<u8>, u32)> {
        let salt = random_bytes(salt_len)?;
        let key = self.derive(password, &salt, self.params.rounds)?;
        Ok((key, salt, self.params.rounds))
    }
}

/// Trait for AEAD (Authenticated Encryption with Associated Data) operations.
///
/// The ciphertext carries the authentication tag, so decrypting with the
/// wrong key or a tampered ciphertext fails instead of returning garbage.
pub trait AEAD {
    /// Authentication tag size in bytes.
    const TAG_SIZE: usize;

    /// Encrypt plaintext with associated data.
    ///
    /// # Errors
    ///
    /// Returns an error if the IV size does not match the key's algorithm or
    /// the encryption operation fails.
    fn encrypt(
        &self,
        key: &SecretKey,
        iv: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    /// Decrypt ciphertext with associated data.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails or the IV size is wrong.
    fn decrypt(
        &self,
        key: &SecretKey,
        iv: &[u8],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> CryptoResult<Vec<u8>>;
}

/// Runtime-polymorphic AEAD adapter; the cipher is chosen by the key's algorithm.
pub struct RuntimeAead;

impl RuntimeAead {
    fn check_iv_len(algorithm: Algorithm, iv: &[u8]) -> CryptoResult<()> {
        if iv.len() != algorithm.iv_size() {
            return Err(KeyStoreError::crypto(
                "iv_validation",
                format!("{algorithm:?} requires {}-byte IV, got {}", algorithm.iv_size(), iv.len()),
            ));
        }
        Ok(())
    }
}

impl AEAD for RuntimeAead {
    const TAG_SIZE: usize = 16;

    fn encrypt(
        &self,
        key: &SecretKey,
        iv: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        Self::check_iv_len(key.algorithm(), iv)?;
        let payload = Payload { msg: plaintext, aad: associated_data };
        match key.algorithm() {
            Algorithm::Aes256Gcm => {
                let cipher = Aes256Gcm::new(AesKey::from_slice(key.expose_secret()));
                let n: &AesNonce = AesNonce::from_slice(iv);
                cipher
                    .encrypt(n, payload)
                    .map_err(|e| KeyStoreError::crypto("encrypt", format!("AES-256-GCM encryption failed: {e}")))
            }
            Algorithm::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new(ChaChaKey::from_slice(key.expose_secret()));
                let n: &ChaChaNonce = ChaChaNonce::from_slice(iv);
                cipher
                    .encrypt(n, payload)
                    .map_err(|e| KeyStoreError::crypto("encrypt", format!("ChaCha20-Poly1305 encryption failed: {e}")))
            }
        }
    }

    fn decrypt(
        &self,
        key: &SecretKey,
        iv: &[u8],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        Self::check_iv_len(key.algorithm(), iv)?;
        let payload = Payload { msg: ciphertext, aad: associated_data };
        match key.algorithm() {
            Algorithm::Aes256Gcm => {
                let cipher = Aes256Gcm::new(AesKey::from_slice(key.expose_secret()));
                let n: &AesNonce = AesNonce::from_slice(iv);
                cipher
                    .decrypt(n, payload)
                    .map_err(|e| KeyStoreError::crypto("decrypt", format!("AES-256-GCM decryption failed: {e}")))
            }
            Algorithm::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new(ChaChaKey::from_slice(key.expose_secret()));
                let n: &ChaChaNonce = ChaChaNonce::from_slice(iv);
                cipher
                    .decrypt(n, payload)
                    .map_err(|e| KeyStoreError::crypto("decrypt", format!("ChaCha20-Poly1305 decryption failed: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    fn fast_kdf(algorithm: Algorithm) -> PasswordKdf {
        PasswordKdf::new(KdfParams::fast(), algorithm)
    }

    #[test]
    fn test_kdf_is_deterministic() {
        let kdf = fast_kdf(Algorithm::Aes256Gcm);
        let salt = [9u8; 16];

        let a = kdf.derive(b"password", &salt, 1).unwrap();
        let b = kdf.derive(b"password", &salt, 1).unwrap();
        assert!(a.ct_eq(&b));

        let other_password = kdf.derive(b"Password", &salt, 1).unwrap();
        assert!(!a.ct_eq(&other_password));

        let other_rounds = kdf.derive(b"password", &salt, 2).unwrap();
        assert!(!a.ct_eq(&other_rounds));
    }

    #[test]
    fn test_derive_new_returns_salt_and_rounds() {
        let kdf = fast_kdf(Algorithm::Aes256Gcm);
        let (key, salt, rounds) = kdf.derive_new(b"pw", 32).unwrap();
        assert_eq!(salt.len(), 32);
        assert_eq!(rounds, KdfParams::fast().rounds);

        let again = kdf.derive(b"pw", &salt, rounds).unwrap();
        assert!(key.ct_eq(&again));
    }

    #[test]
    fn test_kdf_rejects_short_salt() {
        let kdf = fast_kdf(Algorithm::Aes256Gcm);
        assert!(kdf.derive(b"pw", b"abc", 1).is_err());
    }

    #[test]
    fn test_end_to_end_aead() {
        let mut rng = ChaCha12Rng::seed_from_u64(42);
        let mut iv = [0u8; 12];
        rng.fill_secure_bytes(&mut iv).unwrap();

        for algorithm in [Algorithm::Aes256Gcm, Algorithm::ChaCha20Poly1305] {
            let key = SecretKey::from_bytes(vec![0x42; 32], algorithm).unwrap();
            let plaintext = b"[{\"Name\":\"k\"}]";

            let ciphertext = RuntimeAead.encrypt(&key, &iv, plaintext, &[]).unwrap();
            assert_eq!(ciphertext.len(), plaintext.len() + RuntimeAead::TAG_SIZE);
            assert_ne!(ciphertext.as_slice(), plaintext);

            let decrypted = RuntimeAead.decrypt(&key, &iv, &ciphertext, &[]).unwrap();
            assert_eq!(decrypted.as_slice(), plaintext);
        }
    }

    #[test]
    fn test_aead_wrong_key_or_iv_fails() {
        let key = SecretKey::from_bytes(vec![1; 32], Algorithm::Aes256Gcm).unwrap();
        let wrong = SecretKey::from_bytes(vec![2; 32], Algorithm::Aes256Gcm).unwrap();
        let iv = [0u8; 12];
        let ciphertext = RuntimeAead.encrypt(&key, &iv, b"secret", &[]).unwrap();

        assert!(RuntimeAead.decrypt(&wrong, &iv, &ciphertext, &[]).is_err());
        assert!(RuntimeAead.decrypt(&key, &[1u8; 12], &ciphertext, &[]).is_err());
        assert!(RuntimeAead.encrypt(&key, &[0u8; 16], b"secret", &[]).is_err());
    }

    #[test]
    fn test_random_bytes() {
        let a = random_bytes(32).unwrap();
        let b = random_bytes(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
