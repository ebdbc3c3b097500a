//! Authenticated encryption for pairwise share payloads.
//!
//! Each unordered pair of group members shares one AES-256-GCM key derived
//! by ECDH (see [`crate::ephemeral`]). Ciphertexts are self-contained: the
//! 96-bit nonce is prepended to the AEAD output, so a payload is a single
//! opaque byte string on the wire. Decryption failure is always observable.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Nonce length of AES-256-GCM.
const NONCE_SIZE: usize = 12;

/// Authentication tag length of AES-256-GCM.
const TAG_SIZE: usize = 16;

/// Symmetric key shared by one pair of group members.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub(crate) fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Encrypt a plaintext under a fresh random nonce.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(format!("failed to create cipher: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(format!("AES-GCM encryption failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(payload)
    }

    /// Decrypt a payload produced by [`SymmetricKey::encrypt`].
    ///
    /// Fails with [`CryptoError::InvalidCiphertextFormat`] on truncated
    /// input and [`CryptoError::AuthenticationFailed`] on tag mismatch.
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if payload.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidCiphertextFormat);
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);

        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn test_key(byte: u8) -> SymmetricKey {
        SymmetricKey::new([byte; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key(1);
        let plaintext = b"some secret share bytes";

        let payload = key.encrypt(plaintext, &mut OsRng).unwrap();
        let decrypted = key.decrypt(&payload).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_nonce_is_fresh() {
        let key = test_key(1);
        let a = key.encrypt(b"payload", &mut OsRng).unwrap();
        let b = key.encrypt(b"payload", &mut OsRng).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let payload = test_key(1).encrypt(b"payload", &mut OsRng).unwrap();
        let result = test_key(2).decrypt(&payload);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let key = test_key(1);
        let mut payload = key.encrypt(b"payload", &mut OsRng).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        assert!(matches!(
            key.decrypt(&payload),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let result = test_key(1).decrypt(&[0u8; 11]);
        assert!(matches!(result, Err(CryptoError::InvalidCiphertextFormat)));
    }
}
