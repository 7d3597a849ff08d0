//! Reversible transform for secret fields at rest.
//!
//! Encrypted values serialize as `base64(nonce):base64(ciphertext)`. The
//! `:` separator is structural: base64 never contains one, so a stored
//! value with a `:` is always the transform's output and a value without
//! one is legacy plaintext. [`Crypt::maybe_decrypt`] relies on exactly that
//! distinction; it must not change, or previously stored values stop
//! round-tripping.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::digest::{SHA256, digest};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Errors from the secret-field transform.
#[derive(Debug, Error)]
pub enum CryptError {
    #[error("failed to gather nonce randomness")]
    Randomness,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("malformed encrypted value")]
    Format,

    #[error("decrypted value is not valid UTF-8")]
    Utf8,
}

/// Symmetric encrypt/decrypt capability for secret fields.
///
/// Constructed once from the configured key material and injected where
/// needed.
pub struct Crypt {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl Crypt {
    /// Derive the AES-256-GCM key from arbitrary key material.
    pub fn new(secret: &str) -> Self {
        let key_bytes = digest(&SHA256, secret.as_bytes());
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes.as_ref())
            .expect("SHA-256 digest is a valid AES-256 key");
        Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        }
    }

    /// Encrypt a value for storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptError::Randomness)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptError::Encrypt)?;

        Ok(format!(
            "{}:{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(&in_out)
        ))
    }

    /// Decrypt a stored value produced by [`Crypt::encrypt`].
    pub fn decrypt(&self, stored: &str) -> Result<String, CryptError> {
        let (nonce_part, cipher_part) = stored.split_once(':').ok_or(CryptError::Format)?;

        let nonce_bytes: [u8; NONCE_LEN] = BASE64
            .decode(nonce_part)
            .map_err(|_| CryptError::Format)?
            .try_into()
            .map_err(|_| CryptError::Format)?;
        let mut cipher = BASE64.decode(cipher_part).map_err(|_| CryptError::Format)?;

        let plain = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut cipher,
            )
            .map_err(|_| CryptError::Decrypt)?;

        String::from_utf8(plain.to_vec()).map_err(|_| CryptError::Utf8)
    }

    /// Decode a stored secret field: values without the structural `:`
    /// separator were stored as plaintext by some other means and are
    /// returned verbatim, never passed through decrypt.
    pub fn maybe_decrypt(&self, stored: &str) -> Result<String, CryptError> {
        if stored.contains(':') {
            self.decrypt(stored)
        } else {
            Ok(stored.to_string())
        }
    }
}
