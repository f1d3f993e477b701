//! Abstraction layer around the [`rsa`] crate. This module provides the
//! loaders for RSA private keys in their PKCS8 and PKCS1 PEM encodings.
use rsa::{RsaPrivateKey, pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to deserialize the RSA private key from PEM-encoded PKCS8"))]
    DeserializePkcs8 { source: rsa::pkcs8::Error },

    #[snafu(display("failed to deserialize the RSA private key from PEM-encoded PKCS1"))]
    DeserializePkcs1 { source: rsa::pkcs1::Error },

    #[snafu(display("the RSA private key is inconsistent"))]
    ValidateKey { source: rsa::Error },
}

#[instrument(name = "load_rsa_private_key_from_pkcs8_pem", skip_all)]
pub fn from_pkcs8_pem(input: &str) -> Result<RsaPrivateKey> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(input).context(DeserializePkcs8Snafu)?;
    private_key.validate().context(ValidateKeySnafu)?;

    Ok(private_key)
}

#[instrument(name = "load_rsa_private_key_from_pkcs1_pem", skip_all)]
pub fn from_pkcs1_pem(input: &str) -> Result<RsaPrivateKey> {
    let private_key = RsaPrivateKey::from_pkcs1_pem(input).context(DeserializePkcs1Snafu)?;
    private_key.validate().context(ValidateKeySnafu)?;

    Ok(private_key)
}
