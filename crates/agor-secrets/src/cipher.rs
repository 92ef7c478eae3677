//! The secret cipher seam and its XChaCha20-Poly1305 default.

use crate::error::{SecretError, SecretResult};
use agor_core::SealedSecret;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

/// Length of the XChaCha20 nonce prefixed to every sealed blob.
const NONCE_LEN: usize = 24;

/// Seals and opens secret values with a daemon-held symmetric key.
pub trait SecretCipher: Send + Sync {
    /// Seal a plaintext value.
    ///
    /// # Errors
    ///
    /// Returns an error when encryption fails.
    fn seal(&self, plaintext: &str) -> SecretResult<SealedSecret>;

    /// Open a sealed value back to plaintext.
    ///
    /// # Errors
    ///
    /// Returns an error when the blob is malformed, the key is wrong, or
    /// the ciphertext was tampered with.
    fn open(&self, sealed: &SealedSecret) -> SecretResult<String>;
}

/// The default cipher: XChaCha20-Poly1305 with a random per-value nonce
/// prefixed to the ciphertext.
pub struct DaemonCipher {
    cipher: XChaCha20Poly1305,
}

impl DaemonCipher {
    /// Build from a 32-byte key.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a fresh random key.
    #[must_use]
    pub fn generate_key() -> Zeroizing<[u8; 32]> {
        let key = XChaCha20Poly1305::generate_key(&mut OsRng);
        Zeroizing::new(key.into())
    }
}

impl SecretCipher for DaemonCipher {
    fn seal(&self, plaintext: &str) -> SecretResult<SealedSecret> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::Crypto(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(SealedSecret(blob))
    }

    fn open(&self, sealed: &SealedSecret) -> SecretResult<String> {
        if sealed.0.len() < NONCE_LEN {
            return Err(SecretError::Malformed(format!(
                "blob of {} bytes cannot carry a nonce",
                sealed.0.len()
            )));
        }
        let (nonce, ciphertext) = sealed.0.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::Crypto(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|_| SecretError::NotUtf8)
    }
}

impl std::fmt::Debug for DaemonCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> DaemonCipher {
        DaemonCipher::new(&DaemonCipher::generate_key())
    }

    #[test]
    fn seal_open_round_trip() {
        let c = cipher();
        let sealed = c.seal("sk-ant-secret").unwrap();
        assert_eq!(c.open(&sealed).unwrap(), "sk-ant-secret");
    }

    #[test]
    fn nonces_differ_per_seal() {
        let c = cipher();
        let a = c.seal("same").unwrap();
        let b = c.seal("same").unwrap();
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn wrong_key_fails() {
        let a = cipher();
        let b = cipher();
        let sealed = a.seal("secret").unwrap();
        assert!(matches!(b.open(&sealed), Err(SecretError::Crypto(_))));
    }

    #[test]
    fn truncated_blob_is_malformed() {
        let c = cipher();
        assert!(matches!(
            c.open(&SealedSecret(vec![1, 2, 3])),
            Err(SecretError::Malformed(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let c = cipher();
        let mut sealed = c.seal("secret").unwrap();
        if let Some(last) = sealed.0.last_mut() {
            *last = last.wrapping_add(1);
        }
        assert!(c.open(&sealed).is_err());
    }
}
