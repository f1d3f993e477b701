//! The cryptographic operations performed on behalf of callers: signing with a
//! selected digest and PKCS#1 v1.5 decryption.
//!
//! Every failure of the underlying primitives is returned as an [`Error`].
//! Nothing in here panics on bad input, so a malformed request can never take
//! down the serving process.
use p256::NistP256;
use rand_core::OsRng;
use rsa::Pkcs1v15Encrypt;
use signature::hazmat::PrehashSigner;
use snafu::{ResultExt, Snafu};
use tracing::instrument;
use zeroize::Zeroizing;

use crate::{KeyKind, KeyRecord, MessageDigest};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create RSA PKCS#1 v1.5 signature using {digest}"))]
    RsaSign {
        source: rsa::Error,
        digest: MessageDigest,
    },

    #[snafu(display("failed to create ECDSA signature using {digest}"))]
    EcdsaSign {
        source: signature::Error,
        digest: MessageDigest,
    },

    #[snafu(display("failed to decrypt RSA PKCS#1 v1.5 ciphertext"))]
    RsaDecrypt { source: rsa::Error },

    #[snafu(display("{digest} signatures require an RSA key, found {actual} key"))]
    DigestRequiresRsa {
        digest: MessageDigest,
        actual: KeyKind,
    },

    #[snafu(display("decryption requires an RSA key, found {actual} key"))]
    DecryptRequiresRsa { actual: KeyKind },

    #[snafu(display("requested {requested} signature, but the resolved key is {actual}"))]
    KeyKindMismatch { requested: KeyKind, actual: KeyKind },
}

/// Signs `data` with `key`.
///
/// The signing path is selected as follows:
///
/// - [`MessageDigest::Md5Sha1`] produces the legacy TLS 1.0/1.1 signature: the
///   36-byte concatenation of both hashes signed with PKCS#1 v1.5 padding but
///   without a DigestInfo prefix. Only RSA keys support this.
/// - [`KeyKind::Rsa`] hashes `data` with `digest` and produces a PKCS#1 v1.5
///   signature.
/// - [`KeyKind::Ec`] hashes `data` with `digest` and produces an ECDSA
///   signature over the hash, DER encoded.
#[instrument(skip(key, data), fields(data.len = data.len()))]
pub fn sign(key: &KeyRecord, kind: KeyKind, digest: MessageDigest, data: &[u8]) -> Result<Vec<u8>> {
    if digest == MessageDigest::Md5Sha1 {
        let KeyRecord::Rsa(private_key) = key else {
            return DigestRequiresRsaSnafu {
                digest,
                actual: key.kind(),
            }
            .fail();
        };

        let hashed = digest.digest(data);
        return private_key
            .sign_with_rng(&mut OsRng, digest.pkcs1v15_scheme(), &hashed)
            .context(RsaSignSnafu { digest });
    }

    match (kind, key) {
        (KeyKind::Rsa, KeyRecord::Rsa(private_key)) => {
            let hashed = digest.digest(data);
            private_key
                .sign_with_rng(&mut OsRng, digest.pkcs1v15_scheme(), &hashed)
                .context(RsaSignSnafu { digest })
        }
        (KeyKind::Ec, KeyRecord::Ec(signing_key)) => {
            let hashed = digest.digest(data);
            let signature: p256::ecdsa::Signature = signing_key
                .sign_prehash(&hashed)
                .context(EcdsaSignSnafu { digest })?;
            let signature: ecdsa::der::Signature<NistP256> = signature.to_der();

            Ok(signature.as_bytes().to_vec())
        }
        (requested, key) => KeyKindMismatchSnafu {
            requested,
            actual: key.kind(),
        }
        .fail(),
    }
}

/// Decrypts `data` with the RSA `key` using PKCS#1 v1.5 padding. The private
/// key operation is blinded.
///
/// The plaintext is returned in a [`Zeroizing`] buffer, so that it is wiped
/// from memory once the caller has encoded it.
#[instrument(skip(key, data), fields(data.len = data.len()))]
pub fn decrypt(key: &KeyRecord, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let KeyRecord::Rsa(private_key) = key else {
        return DecryptRequiresRsaSnafu { actual: key.kind() }.fail();
    };

    let plaintext = private_key
        .decrypt_blinded(&mut OsRng, Pkcs1v15Encrypt, data)
        .context(RsaDecryptSnafu)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::{Signature, signature::hazmat::PrehashVerifier};
    use rsa::{Pkcs1v15Sign, RsaPublicKey};
    use rstest::rstest;

    use super::*;
    use crate::keys::tests::{EC_KEY, RSA_KEY};

    fn rsa_record() -> KeyRecord {
        KeyRecord::Rsa(RSA_KEY.clone())
    }

    fn ec_record() -> KeyRecord {
        KeyRecord::Ec(EC_KEY.clone())
    }

    #[rstest]
    #[case(MessageDigest::Md5)]
    #[case(MessageDigest::Sha1)]
    #[case(MessageDigest::Sha224)]
    #[case(MessageDigest::Sha256)]
    #[case(MessageDigest::Sha384)]
    #[case(MessageDigest::Sha512)]
    fn rsa_signature_verifies(#[case] digest: MessageDigest) {
        let data = [0u8; 32];
        let signature = sign(&rsa_record(), KeyKind::Rsa, digest, &data).unwrap();

        let public_key = RsaPublicKey::from(&*RSA_KEY);
        public_key
            .verify(digest.pkcs1v15_scheme(), &digest.digest(&data), &signature)
            .unwrap();
    }

    #[test]
    fn md5_sha1_signature_is_unprefixed() {
        let data = b"client random || server random || params";
        let signature = sign(&rsa_record(), KeyKind::Rsa, MessageDigest::Md5Sha1, data).unwrap();

        let public_key = RsaPublicKey::from(&*RSA_KEY);
        let hashed = MessageDigest::Md5Sha1.digest(data);
        public_key
            .verify(Pkcs1v15Sign::new_unprefixed(), &hashed, &signature)
            .unwrap();
    }

    #[test]
    fn md5_sha1_rejects_ec_key() {
        let err = sign(&ec_record(), KeyKind::Ec, MessageDigest::Md5Sha1, b"data").unwrap_err();

        assert!(matches!(
            err,
            Error::DigestRequiresRsa {
                digest: MessageDigest::Md5Sha1,
                actual: KeyKind::Ec
            }
        ));
    }

    #[rstest]
    #[case(MessageDigest::Sha1)]
    #[case(MessageDigest::Sha256)]
    #[case(MessageDigest::Sha384)]
    #[case(MessageDigest::Sha512)]
    fn ecdsa_signature_verifies(#[case] digest: MessageDigest) {
        let data = b"ecdhe params";
        let signature = sign(&ec_record(), KeyKind::Ec, digest, data).unwrap();

        let signature = Signature::from_der(&signature).unwrap();
        EC_KEY
            .verifying_key()
            .verify_prehash(&digest.digest(data), &signature)
            .unwrap();
    }

    #[rstest]
    #[case(KeyKind::Ec, rsa_record())]
    #[case(KeyKind::Rsa, ec_record())]
    fn sign_rejects_mismatching_key(#[case] kind: KeyKind, #[case] key: KeyRecord) {
        let err = sign(&key, kind, MessageDigest::Sha256, b"data").unwrap_err();
        assert!(matches!(err, Error::KeyKindMismatch { requested, .. } if requested == kind));
    }

    #[test]
    fn decrypt_round_trips() {
        let plaintext = [3u8, 3, 0xaa, 0xbb, 0xcc, 0xdd];
        let public_key = RsaPublicKey::from(&*RSA_KEY);
        let ciphertext = public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &plaintext)
            .unwrap();

        let decrypted = decrypt(&rsa_record(), &ciphertext).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn decrypt_rejects_garbage() {
        let err = decrypt(&rsa_record(), &[0x42; 128]).unwrap_err();
        assert!(matches!(err, Error::RsaDecrypt { .. }));
    }

    #[test]
    fn decrypt_rejects_ec_key() {
        let err = decrypt(&ec_record(), &[0x42; 64]).unwrap_err();
        assert_eq!(err.to_string(), "decryption requires an RSA key, found ec key");
    }
}
