//! This crate provides the private key types and the cryptographic operations
//! the key-exchange service performs on behalf of TLS terminating proxies.
//! The private keys never leave the process: callers only ever receive
//! signatures or decrypted premaster secrets.
//!
//! Two key families are supported:
//!
//! - [RSA](crate::keys::rsa): PKCS#1 v1.5 signatures (including the legacy
//!   combined MD5+SHA1 digest used by TLS 1.0 and 1.1) and PKCS#1 v1.5
//!   decryption of RSA key exchange premaster secrets.
//! - [ECDSA](crate::keys::ecdsa): NIST P-256 signatures over a prehashed
//!   message.
//!
//! The primitives themselves are provided by the RustCrypto crates [`rsa`],
//! [`p256`] and [`ecdsa`]. This crate only selects and invokes them.
//!
//! ```no_run
//! use keyex_keys::{KeyKind, KeyRecord, MessageDigest, ops};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let key = KeyRecord::from_pem_file("keys/default.pem")?;
//! let digest: MessageDigest = "sha256".parse()?;
//! let signature = ops::sign(&key, KeyKind::Rsa, digest, b"hello")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## References
//!
//! - <https://datatracker.ietf.org/doc/html/rfc8017>
//! - <https://datatracker.ietf.org/doc/html/rfc4346#section-7.4.3>
pub mod digest;
pub mod keys;
pub mod ops;

// Selected re-exports
pub use crate::{
    digest::MessageDigest,
    keys::{KeyKind, KeyRecord},
};
