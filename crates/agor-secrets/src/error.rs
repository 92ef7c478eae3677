//! Secret error types.

use thiserror::Error;

/// Errors raised by sealing and resolution.
#[derive(Debug, Error)]
pub enum SecretError {
    /// AEAD encryption or decryption failed (wrong key, truncated blob,
    /// tampered ciphertext).
    #[error("crypto operation failed: {0}")]
    Crypto(String),

    /// A sealed blob is too short to carry a nonce.
    #[error("malformed sealed secret: {0}")]
    Malformed(String),

    /// Decrypted bytes were not valid UTF-8.
    #[error("sealed secret is not utf-8")]
    NotUtf8,
}

/// Result type for secret operations.
pub type SecretResult<T> = Result<T, SecretError>;
