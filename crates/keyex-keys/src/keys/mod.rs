//! Contains the private key material held by the service, tagged by its
//! algorithm family.
//!
//! This module currently provides the following algorithms:
//!
//! ## ECDSA
//!
//! In order to work with ECDSA keys, this crate requires two dependencies:
//! [`ecdsa`], which provides primitives and traits, and [`p256`] which
//! implements the NIST P-256 elliptic curve and supports ECDSA.
//!
//! ## RSA
//!
//! In order to work with RSA keys, this crate requires the [`rsa`] dependency.
//! Decryption always uses blinding, but it should be noted that the crate is
//! affected by the Marvin attack. See:
//!
//! - <https://people.redhat.com/~hkario/marvin/>
//! - <https://rustsec.org/advisories/RUSTSEC-2023-0071.html>
//! - <https://github.com/RustCrypto/RSA/issues/19>
use std::{fmt, path::Path, str::FromStr};

use ::rsa::{pkcs8::der::pem, traits::PublicKeyParts};
use snafu::{ResultExt, Snafu};
use tracing::instrument;
use zeroize::Zeroizing;

pub mod ecdsa;
pub mod rsa;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read private key file {path:?}"))]
    ReadKeyFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to decode PEM label of private key"))]
    DecodePemLabel { source: pem::Error },

    #[snafu(display("unsupported private key PEM label {label:?}"))]
    UnsupportedPemLabel { label: String },

    #[snafu(display("failed to load RSA private key"))]
    LoadRsaKey { source: rsa::Error },

    #[snafu(display("failed to load ECDSA private key"))]
    LoadEcdsaKey { source: ecdsa::Error },

    #[snafu(display(
        "PKCS8 private key is neither RSA nor ECDSA P-256 (RSA: {rsa_error}, ECDSA: {ecdsa_error})"
    ))]
    UnsupportedPkcs8Algorithm {
        rsa_error: rsa::Error,
        ecdsa_error: ecdsa::Error,
    },
}

/// The cryptographic family of a key, used to disambiguate multiple keys
/// registered for the same virtual host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum KeyKind {
    Rsa,
    Ec,
}

impl KeyKind {
    /// The key kind used when a request doesn't name one.
    pub const DEFAULT: Self = Self::Rsa;
}

impl Default for KeyKind {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("unsupported key kind: {kind}"))]
pub struct ParseKeyKindError {
    pub kind: String,
}

impl FromStr for KeyKind {
    type Err = ParseKeyKindError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.eq_ignore_ascii_case("rsa") {
            Ok(Self::Rsa)
        } else if input.eq_ignore_ascii_case("ec") {
            Ok(Self::Ec)
        } else {
            ParseKeyKindSnafu { kind: input }.fail()
        }
    }
}

/// Private key material, tagged with its algorithm family.
///
/// A record is immutable once loaded. The [`Debug`] implementation only prints
/// the kind and size of the key, never the key material itself.
pub enum KeyRecord {
    Rsa(::rsa::RsaPrivateKey),
    Ec(p256::ecdsa::SigningKey),
}

impl KeyRecord {
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Rsa(_) => KeyKind::Rsa,
            Self::Ec(_) => KeyKind::Ec,
        }
    }

    /// Loads a private key from its PEM encoding. The algorithm is detected
    /// from the PEM label and, for PKCS8, from the embedded algorithm.
    ///
    /// Supported encodings are:
    ///
    /// - `PRIVATE KEY`: PKCS8 wrapping either an RSA or a P-256 key
    /// - `RSA PRIVATE KEY`: PKCS1
    /// - `EC PRIVATE KEY`: SEC1 (P-256 only)
    #[instrument(name = "load_private_key_from_pem", skip_all)]
    pub fn from_pem(input: &str) -> Result<Self> {
        let label = pem::decode_label(input.as_bytes()).context(DecodePemLabelSnafu)?;

        let record = match label {
            "PRIVATE KEY" => match rsa::from_pkcs8_pem(input) {
                Ok(private_key) => Self::Rsa(private_key),
                Err(rsa_error) => match ecdsa::from_pkcs8_pem(input) {
                    Ok(signing_key) => Self::Ec(signing_key),
                    Err(ecdsa_error) => {
                        return UnsupportedPkcs8AlgorithmSnafu {
                            rsa_error,
                            ecdsa_error,
                        }
                        .fail();
                    }
                },
            },
            "RSA PRIVATE KEY" => Self::Rsa(rsa::from_pkcs1_pem(input).context(LoadRsaKeySnafu)?),
            "EC PRIVATE KEY" => Self::Ec(ecdsa::from_sec1_pem(input).context(LoadEcdsaKeySnafu)?),
            label => return UnsupportedPemLabelSnafu { label }.fail(),
        };

        tracing::debug!(kind = %record.kind(), "loaded private key");
        Ok(record)
    }

    /// Reads the file at `path` and loads the PEM-encoded private key
    /// contained in it. See [`KeyRecord::from_pem`].
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = Zeroizing::new(
            std::fs::read_to_string(path).context(ReadKeyFileSnafu { path })?,
        );

        Self::from_pem(&input)
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa(private_key) => f
                .debug_struct("KeyRecord::Rsa")
                .field("bits", &(private_key.size() * 8))
                .finish_non_exhaustive(),
            Self::Ec(_) => f
                .debug_struct("KeyRecord::Ec")
                .field("curve", &"P-256")
                .finish_non_exhaustive(),
        }
    }
}
