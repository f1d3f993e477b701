//! Message digests which can be requested for signing operations.
use std::str::FromStr;

use md5::Md5;
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use snafu::Snafu;

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("unknown message digest {name:?}"))]
pub struct UnknownDigestError {
    pub name: String,
}

/// A message digest algorithm, selected by name per request.
///
/// Names are matched case-insensitively. OpenSSL style names prefixed with
/// `RSA-` (e.g. `RSA-SHA256`) and dashed names (e.g. `SHA-256`) are accepted
/// as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum MessageDigest {
    #[strum(serialize = "MD5")]
    Md5,

    #[strum(serialize = "SHA1")]
    Sha1,

    #[strum(serialize = "SHA224")]
    Sha224,

    #[strum(serialize = "SHA256")]
    Sha256,

    #[strum(serialize = "SHA384")]
    Sha384,

    #[strum(serialize = "SHA512")]
    Sha512,

    /// The combined digest used by TLS 1.0 and 1.1 for RSA signed key
    /// exchange parameters: `MD5(data) || SHA1(data)`, 36 bytes in total.
    #[strum(serialize = "MD5-SHA1")]
    Md5Sha1,
}

impl FromStr for MessageDigest {
    type Err = UnknownDigestError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_lowercase();
        let name = normalized.strip_prefix("rsa-").unwrap_or(&normalized);

        let digest = match name {
            "md5-sha1" | "md5sha1" => Self::Md5Sha1,
            "md5" => Self::Md5,
            "sha1" | "sha-1" => Self::Sha1,
            "sha224" | "sha-224" => Self::Sha224,
            "sha256" | "sha-256" => Self::Sha256,
            "sha384" | "sha-384" => Self::Sha384,
            "sha512" | "sha-512" => Self::Sha512,
            _ => return UnknownDigestSnafu { name: input }.fail(),
        };

        Ok(digest)
    }
}

impl MessageDigest {
    /// Hashes `data` with this digest.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Md5 => Md5::digest(data).to_vec(),
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha224 => Sha224::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
            Self::Md5Sha1 => {
                let mut hashed = Md5::digest(data).to_vec();
                hashed.extend_from_slice(&Sha1::digest(data));
                hashed
            }
        }
    }

    /// Returns the PKCS#1 v1.5 signature scheme for this digest. All digests
    /// except [`MessageDigest::Md5Sha1`] wrap the hash in a DigestInfo
    /// structure identifying the algorithm. The combined digest is signed
    /// as-is.
    pub fn pkcs1v15_scheme(self) -> Pkcs1v15Sign {
        match self {
            Self::Md5 => Pkcs1v15Sign::new::<Md5>(),
            Self::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            Self::Sha224 => Pkcs1v15Sign::new::<Sha224>(),
            Self::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            Self::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            Self::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
            Self::Md5Sha1 => Pkcs1v15Sign::new_unprefixed(),
        }
    }
}
