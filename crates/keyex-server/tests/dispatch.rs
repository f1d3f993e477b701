use std::sync::{Arc, LazyLock};

use axum::{Router, body::Body};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use http::{Method, Request, StatusCode, header::CONTENT_TYPE};
use keyex_keys::KeyRecord;
use keyex_server::{Dispatcher, KeyExServer, constants::TEXT_CONTENT_TYPE, keystore::KeyStore};
use p256::ecdsa::{Signature, SigningKey, signature::hazmat::PrehashVerifier};
use rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use rstest::rstest;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

static DEFAULT_KEY: LazyLock<RsaPrivateKey> =
    LazyLock::new(|| RsaPrivateKey::new(&mut OsRng, 1024).unwrap());
static EXAMPLE_KEY: LazyLock<RsaPrivateKey> =
    LazyLock::new(|| RsaPrivateKey::new(&mut OsRng, 1024).unwrap());
static EC_KEY: LazyLock<SigningKey> = LazyLock::new(|| SigningKey::random(&mut OsRng));

/// The default RSA key, `example.com` with its own RSA key and
/// `ec.example.com` with only an EC key.
fn router() -> Router {
    let keys = KeyStore::builder()
        .default_key(KeyRecord::Rsa(DEFAULT_KEY.clone()))
        .virtual_host_key("example.com", KeyRecord::Rsa(EXAMPLE_KEY.clone()))
        .virtual_host_key("ec.example.com", KeyRecord::Ec(EC_KEY.clone()))
        .build();

    KeyExServer::router(Arc::new(Dispatcher::new(keys)))
}

fn json_request(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_owned());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, content_type, body.to_vec())
}

async fn send_json(request: Request<Body>) -> (StatusCode, Value) {
    let (status, content_type, body) = send(router(), request).await;

    assert_eq!(content_type.as_deref(), Some("application/json"));
    (status, serde_json::from_slice(&body).unwrap())
}

fn decode_response(body: &Value) -> Vec<u8> {
    STANDARD
        .decode(body["response"].as_str().unwrap())
        .unwrap()
}

#[tokio::test]
async fn sign_with_virtual_host_key() {
    let request = json_request(
        "/bud/key-ex/example.com",
        &json!({ "type": "sign", "md": "sha256", "data": STANDARD.encode([0u8; 32]) }),
    );

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::OK);

    let signature = decode_response(&body);
    let hashed = Sha256::digest([0u8; 32]);
    RsaPublicKey::from(&*EXAMPLE_KEY)
        .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, &signature)
        .unwrap();
    assert!(
        RsaPublicKey::from(&*DEFAULT_KEY)
            .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, &signature)
            .is_err()
    );
}

#[tokio::test]
async fn decrypt_with_default_key() {
    let ciphertext = RsaPublicKey::from(&*DEFAULT_KEY)
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, b"\x03\x03premaster")
        .unwrap();
    let request = json_request(
        "/bud/key-ex/",
        &json!({ "type": "decrypt", "data": STANDARD.encode(ciphertext) }),
    );

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "response": STANDARD.encode(b"\x03\x03premaster") }));
}

#[tokio::test]
async fn unspecified_type_decrypts() {
    let ciphertext = RsaPublicKey::from(&*EXAMPLE_KEY)
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, b"secret")
        .unwrap();
    let request = json_request(
        "/bud/key-ex/example.com",
        &json!({ "data": STANDARD.encode(ciphertext) }),
    );

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decode_response(&body), b"secret");
}

#[tokio::test]
async fn ecdsa_signature_for_ec_kind() {
    let data = b"server key exchange params";
    let request = json_request(
        "/bud/key-ex/ec.example.com",
        &json!({ "type": "sign", "md": "sha256", "key": "ec", "data": STANDARD.encode(data) }),
    );

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::OK);

    let signature = Signature::from_der(&decode_response(&body)).unwrap();
    EC_KEY
        .verifying_key()
        .verify_prehash(&Sha256::digest(data), &signature)
        .unwrap();
}

#[tokio::test]
async fn rsa_kind_falls_back_to_default_key() {
    let data = b"hello";
    let request = json_request(
        "/bud/key-ex/ec.example.com",
        &json!({ "type": "sign", "md": "sha256", "data": STANDARD.encode(data) }),
    );

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::OK);

    RsaPublicKey::from(&*DEFAULT_KEY)
        .verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(data),
            &decode_response(&body),
        )
        .unwrap();
}

#[rstest]
#[case(Method::POST, "/")]
#[case(Method::GET, "/health")]
#[case(Method::PUT, "/bud/key-ex")]
#[case(Method::POST, "/other/bud/key-ex/example.com")]
#[tokio::test]
async fn unmatched_prefix(#[case] method: Method, #[case] path: &str) {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{definitely not json"))
        .unwrap();

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "route not found" }));
}

#[tokio::test]
async fn unknown_virtual_host_without_default() {
    let keys = KeyStore::builder()
        .virtual_host_key("example.com", KeyRecord::Rsa(EXAMPLE_KEY.clone()))
        .build();
    let router = KeyExServer::router(Arc::new(Dispatcher::new(keys)));
    let request = json_request(
        "/bud/key-ex/unknown.example.org",
        &json!({ "type": "sign", "md": "sha256", "data": "AAEC" }),
    );

    let (status, _, body) = send(router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        serde_json::from_slice::<Value>(&body).unwrap(),
        json!({ "error": "No key found, matching: unknown.example.org" })
    );
}

#[tokio::test]
async fn malformed_json() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/bud/key-ex/example.com")
        .header(CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from("{\"type\": \"sign\""))
        .unwrap();

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("failed to parse JSON request body")
    );
}

#[tokio::test]
async fn unsupported_key_kind() {
    let request = json_request(
        "/bud/key-ex/example.com",
        &json!({ "type": "sign", "md": "sha256", "key": "dsa", "data": "AAEC" }),
    );

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "unsupported key kind: dsa" }));
}

#[tokio::test]
async fn simplified_transport() {
    let data = [0x5au8; 36];
    let request = Request::builder()
        .method(Method::POST)
        .uri("/bud/key-ex/example.com")
        .header("x-type", "sign")
        .header("x-md", "MD5-SHA1")
        .body(Body::from(format!("{}\n", STANDARD.encode(data))))
        .unwrap();

    let (status, content_type, body) = send(router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some(TEXT_CONTENT_TYPE));

    let signature = STANDARD.decode(body).unwrap();
    let mut hashed = md5_sha1_reference(&data);
    RsaPublicKey::from(&*EXAMPLE_KEY)
        .verify(Pkcs1v15Sign::new_unprefixed(), &hashed, &signature)
        .unwrap();

    hashed[0] ^= 0xff;
    assert!(
        RsaPublicKey::from(&*EXAMPLE_KEY)
            .verify(Pkcs1v15Sign::new_unprefixed(), &hashed, &signature)
            .is_err()
    );
}

#[tokio::test]
async fn simplified_transport_errors_are_json() {
    let request = Request::builder()
        .uri("/bud/key-ex/")
        .header("x-type", "decrypt")
        .body(Body::from("not base64 at all"))
        .unwrap();

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("base64 parse failed")
    );
}

#[tokio::test]
async fn oversized_body() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/bud/key-ex/")
        .body(Body::from(vec![b'A'; 128 * 1024]))
        .unwrap();

    let (status, body) = send_json(request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("failed to read request body")
    );
}

/// `MD5(data) || SHA1(data)`
fn md5_sha1_reference(data: &[u8]) -> Vec<u8> {
    let md5 = keyex_keys::MessageDigest::Md5.digest(data);
    let sha1 = keyex_keys::MessageDigest::Sha1.digest(data);

    [md5, sha1].concat()
}
