//! Agor Secrets — the decryption boundary.
//!
//! Per-user api keys and environment variables are stored as opaque
//! ciphertext ([`agor_core::SealedSecret`]); plaintext only ever leaves
//! this crate through the [`SecretResolver`]. Sealing uses an AEAD with
//! a daemon-held symmetric key behind the [`SecretCipher`] seam.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cipher;
pub mod error;
pub mod resolver;

pub use cipher::{DaemonCipher, SecretCipher};
pub use error::{SecretError, SecretResult};
pub use resolver::SecretResolver;
