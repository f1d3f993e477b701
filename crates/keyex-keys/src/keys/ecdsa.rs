//! Abstraction layer around the [`ecdsa`] and [`p256`] crates. This module
//! provides the loaders for NIST P-256 private keys in their PKCS8 and SEC1
//! PEM encodings.
use p256::{SecretKey, ecdsa::SigningKey, pkcs8::DecodePrivateKey};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to deserialize ECDSA key from PEM-encoded PKCS8"))]
    DeserializePkcs8 { source: p256::pkcs8::Error },

    #[snafu(display("failed to deserialize ECDSA key from PEM-encoded SEC1"))]
    DeserializeSec1 { source: p256::elliptic_curve::Error },
}

#[instrument(name = "load_ecdsa_signing_key_from_pkcs8_pem", skip_all)]
pub fn from_pkcs8_pem(input: &str) -> Result<SigningKey> {
    SigningKey::from_pkcs8_pem(input).context(DeserializePkcs8Snafu)
}

#[instrument(name = "load_ecdsa_signing_key_from_sec1_pem", skip_all)]
pub fn from_sec1_pem(input: &str) -> Result<SigningKey> {
    let secret_key = SecretKey::from_sec1_pem(input).context(DeserializeSec1Snafu)?;
    Ok(SigningKey::from(secret_key))
}
