//! This module contains structs and functions to create a TLS termination
//! server for the admin channel, which can be used in combination with an Axum
//! [`Router`].
use std::{fs::File, io::BufReader, net::SocketAddr, path::Path, sync::Arc};

use axum::{Router, extract::Request};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::rt::{TokioExecutor, TokioIo};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::net::TcpListener;
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::ring::default_provider,
        pki_types::{CertificateDer, PrivateKeyDer},
        version::{TLS12, TLS13},
    },
};
use tower::ServiceExt;
use tracing::{Instrument, instrument};

pub type Result<T, E = TlsServerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum TlsServerError {
    #[snafu(display("failed to open PEM file {path:?}"))]
    OpenPemFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to read certificate chain from {path:?}"))]
    ReadCertificateChain {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("no certificate found in {path:?}"))]
    NoCertificate { path: std::path::PathBuf },

    #[snafu(display("failed to read private key from {path:?}"))]
    ReadPrivateKey {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("no private key found in {path:?}"))]
    NoPrivateKey { path: std::path::PathBuf },

    #[snafu(display("failed to set safe TLS protocol versions"))]
    SetSafeTlsProtocolVersions { source: tokio_rustls::rustls::Error },

    #[snafu(display("failed to configure TLS certificate"))]
    ConfigureCertificate { source: tokio_rustls::rustls::Error },

    #[snafu(display("failed to create TCP listener by binding to socket address {socket_addr:?}"))]
    BindTcpListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },
}

/// A server which terminates TLS connections and allows clients to communicate
/// via HTTPS with the underlying HTTP router.
pub struct TlsServer {
    config: ServerConfig,
    socket_addr: SocketAddr,
    router: Router,
}

impl TlsServer {
    /// Creates a TLS server serving the PEM-encoded certificate chain and
    /// private key found at the given paths.
    #[instrument(name = "create_tls_server", skip(router))]
    pub fn new(
        socket_addr: SocketAddr,
        router: Router,
        certificate_path: &Path,
        private_key_path: &Path,
    ) -> Result<Self> {
        let certificate_chain = read_certificate_chain(certificate_path)?;
        let private_key = read_private_key(private_key_path)?;

        let tls_provider = default_provider();
        let mut config = ServerConfig::builder_with_provider(tls_provider.into())
            .with_protocol_versions(&[&TLS12, &TLS13])
            .context(SetSafeTlsProtocolVersionsSnafu)?
            .with_no_client_auth()
            .with_single_cert(certificate_chain, private_key)
            .context(ConfigureCertificateSnafu)?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(Self {
            config,
            socket_addr,
            router,
        })
    }

    /// Runs the TLS server by listening for incoming TCP connections on the
    /// configured socket address. See [`TlsServer::serve`].
    pub async fn run(self) -> Result<()> {
        let tcp_listener =
            TcpListener::bind(self.socket_addr)
                .await
                .context(BindTcpListenerSnafu {
                    socket_addr: self.socket_addr,
                })?;

        crate::log_listening(tcp_listener.local_addr().unwrap_or(self.socket_addr));
        self.serve(tcp_listener).await
    }

    /// Accepts connections from `tcp_listener` until the future is dropped. It
    /// only accepts TLS connections. Internally each TLS stream gets handled by
    /// a Hyper service, which in turn is an Axum router.
    pub async fn serve(self, tcp_listener: TcpListener) -> Result<()> {
        let tls_acceptor = TlsAcceptor::from(Arc::new(self.config));

        loop {
            let tls_acceptor = tls_acceptor.clone();
            let router = self.router.clone();

            // Wait for new tcp connection
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok((stream, addr)) => (stream, addr),
                Err(err) => {
                    tracing::trace!(%err, "failed to accept incoming TCP connection");
                    continue;
                }
            };

            let span = tracing::debug_span!("accept tcp connection", %remote_addr);
            tokio::spawn(
                async move {
                    // Wait for tls handshake to happen
                    let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(err) => {
                            tracing::trace!(%err, %remote_addr, "error during tls handshake connection");
                            return;
                        }
                    };

                    // Hyper has its own `AsyncRead` and `AsyncWrite` traits and doesn't use tokio.
                    // `TokioIo` converts between them.
                    let tls_stream = TokioIo::new(tls_stream);

                    // Hyper also has its own `Service` trait and doesn't use tower. We can use
                    // `hyper::service::service_fn` to create a hyper `Service` that calls our app through
                    // `tower::Service::call`.
                    let hyper_service = service_fn(move |request: Request<Incoming>| {
                        // We need to clone here, because oneshot consumes self
                        router.clone().oneshot(request)
                    });

                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(tls_stream, hyper_service)
                        .await
                    {
                        tracing::warn!(%err, %remote_addr, "failed to serve connection");
                    }
                }
                .instrument(span),
            );
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).context(OpenPemFileSnafu { path })?;
    Ok(BufReader::new(file))
}

fn read_certificate_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let chain = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .context(ReadCertificateChainSnafu { path })?;

    if chain.is_empty() {
        return NoCertificateSnafu { path }.fail();
    }

    Ok(chain)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .context(ReadPrivateKeySnafu { path })?
        .context(NoPrivateKeySnafu { path })
}

#[cfg(test)]
mod tests {
    use std::{io::Write as _, net::Ipv4Addr, path::PathBuf};

    use axum::body::Body;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use http::{
        Method, StatusCode,
        header::{CONTENT_TYPE, HOST},
    };
    use rand_core::OsRng;
    use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
    use rstest::rstest;
    use serde_json::{Value, json};
    use tokio::net::TcpStream;
    use tokio_rustls::{
        TlsConnector,
        client::TlsStream,
        rustls::{
            ClientConfig, ProtocolVersion, RootCertStore, SupportedProtocolVersion,
            pki_types::ServerName,
        },
    };

    use super::*;
    use crate::{
        Dispatcher, KeyExServer,
        keystore::tests::{RSA_KEYS, store},
    };

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures/tls")
            .join(name)
    }

    fn tls_server() -> TlsServer {
        let router = KeyExServer::router(Arc::new(Dispatcher::new(store())));

        TlsServer::new(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            router,
            &fixture("server.pem"),
            &fixture("server-key.pem"),
        )
        .unwrap()
    }

    /// Serves [`tls_server`] on an ephemeral port of the loopback interface.
    async fn start() -> SocketAddr {
        let tcp_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let socket_addr = tcp_listener.local_addr().unwrap();
        tokio::spawn(tls_server().serve(tcp_listener));

        socket_addr
    }

    async fn connect(
        socket_addr: SocketAddr,
        version: &'static SupportedProtocolVersion,
        alpn_protocols: &[&[u8]],
    ) -> TlsStream<TcpStream> {
        let mut roots = RootCertStore::empty();
        for certificate in read_certificate_chain(&fixture("ca.pem")).unwrap() {
            roots.add(certificate).unwrap();
        }

        let mut config = ClientConfig::builder_with_provider(default_provider().into())
            .with_protocol_versions(&[version])
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = alpn_protocols.iter().map(|protocol| protocol.to_vec()).collect();

        let tcp_stream = TcpStream::connect(socket_addr).await.unwrap();
        TlsConnector::from(Arc::new(config))
            .connect(ServerName::try_from("localhost").unwrap(), tcp_stream)
            .await
            .unwrap()
    }

    #[test]
    fn loads_certificate_and_key() {
        let server = tls_server();

        assert_eq!(server.config.alpn_protocols, [b"h2".to_vec(), b"http/1.1".to_vec()]);
        assert_eq!(read_certificate_chain(&fixture("server.pem")).unwrap().len(), 1);
    }

    #[test]
    fn missing_certificate_file() {
        let err = read_certificate_chain(Path::new("/does/not/exist.pem")).unwrap_err();
        assert!(matches!(err, TlsServerError::OpenPemFile { .. }));
    }

    #[test]
    fn file_without_pem_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"no pem in here\n").unwrap();

        assert!(matches!(
            read_certificate_chain(file.path()).unwrap_err(),
            TlsServerError::NoCertificate { .. }
        ));
        assert!(matches!(
            read_private_key(file.path()).unwrap_err(),
            TlsServerError::NoPrivateKey { .. }
        ));
    }

    #[rstest]
    #[case(&TLS12, ProtocolVersion::TLSv1_2)]
    #[case(&TLS13, ProtocolVersion::TLSv1_3)]
    #[tokio::test]
    async fn negotiates_protocol_version(
        #[case] version: &'static SupportedProtocolVersion,
        #[case] expected: ProtocolVersion,
    ) {
        let tls_stream = connect(start().await, version, &[]).await;
        assert_eq!(tls_stream.get_ref().1.protocol_version(), Some(expected));
    }

    #[rstest]
    #[case(&[b"h2".as_slice(), b"http/1.1".as_slice()], b"h2".as_slice())]
    #[case(&[b"http/1.1".as_slice()], b"http/1.1".as_slice())]
    #[tokio::test]
    async fn negotiates_alpn_protocol(#[case] offered: &[&[u8]], #[case] expected: &[u8]) {
        let tls_stream = connect(start().await, &TLS13, offered).await;
        assert_eq!(tls_stream.get_ref().1.alpn_protocol(), Some(expected));
    }

    #[tokio::test]
    async fn decrypt_over_https() {
        let tls_stream = connect(start().await, &TLS13, &[b"http/1.1".as_slice()]).await;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls_stream))
            .await
            .unwrap();
        tokio::spawn(connection);

        let ciphertext = RsaPublicKey::from(&RSA_KEYS[0])
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, b"premaster secret")
            .unwrap();
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/bud/key-ex/")
            .header(HOST, "localhost")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "type": "decrypt", "data": STANDARD.encode(ciphertext) }).to_string(),
            ))
            .unwrap();

        let response = sender.send_request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(Body::new(response.into_body()), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({ "response": STANDARD.encode(b"premaster secret") })
        );
    }
}
