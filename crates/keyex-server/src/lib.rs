//! A remote private key operation service for TLS terminating proxies. The
//! proxy forwards the signing or decryption step of a TLS handshake to this
//! service, so that private keys never have to be present on the proxy.
//!
//! Requests are routed by path: everything after the configured prefix (by
//! default `/bud/key-ex/`) names the virtual host whose key is used. This
//! library is fully compatible with the [`tracing`] crate and emits debug
//! level tracing data.
//!
//! Most users will only use the top-level exported [`KeyExServer`], which is
//! built from a [`Dispatcher`] holding the keys and [`ServerOptions`].
//!
//! ```
//! use keyex_server::{Dispatcher, KeyExServer, ServerOptions, keystore::KeyStore};
//!
//! let dispatcher = Dispatcher::new(KeyStore::builder().build());
//! let server = KeyExServer::new(dispatcher, ServerOptions::default());
//! ```
//!
//! The [`router`][KeyExServer::router] can also be used on its own, e.g. to
//! drive requests in tests.
use std::{net::SocketAddr, sync::Arc};

use axum::{Router, extract::State};
use futures_util::{FutureExt as _, future::Either, pin_mut, select};
use snafu::{ResultExt, Snafu};
use tokio::{
    net::TcpListener,
    signal::unix::{Signal, SignalKind, signal},
};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::{
    constants::MAX_BODY_SIZE,
    dispatcher::{AbortedSnafu, ReadBodySnafu},
    options::TlsOption,
    tls::TlsServer,
};

pub mod cli;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod keystore;
pub mod options;
pub mod tls;

// Selected re-exports
pub use crate::{
    dispatcher::{Dispatcher, KeyExResponse},
    options::ServerOptions,
};

/// A result type alias with the [`ServerError`] type as the default error type.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum ServerError {
    #[snafu(display("failed to create {name} signal handler"))]
    CreateSignalHandler {
        source: std::io::Error,
        name: &'static str,
    },

    #[snafu(display("failed to create TCP listener by binding to socket address {socket_addr:?}"))]
    BindTcpListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },

    #[snafu(display("failed to run HTTP server"))]
    RunHttpServer { source: std::io::Error },

    #[snafu(display("failed to create TLS server"))]
    CreateTlsServer { source: tls::TlsServerError },

    #[snafu(display("failed to run TLS server"))]
    RunTlsServer { source: tls::TlsServerError },
}

/// A ready-to-use key exchange server.
///
/// The same [`Router`] is served either via plain HTTP or via HTTPS, depending
/// on [`ServerOptions::tls`].
pub struct KeyExServer {
    router: Router,
    options: ServerOptions,
}

impl KeyExServer {
    /// Creates a new ready-to-use server. To start it, use
    /// [`KeyExServer::run()`].
    pub fn new(dispatcher: Dispatcher, options: ServerOptions) -> Self {
        tracing::trace!("create new key exchange server");

        Self {
            router: Self::router(Arc::new(dispatcher)),
            options,
        }
    }

    /// Creates the [`Router`] handing every request, regardless of method and
    /// path, to `dispatcher`.
    pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
        Router::new()
            .fallback(handle_request)
            .layer(TraceLayer::new_for_http())
            .with_state(dispatcher)
    }

    /// Runs the server until SIGINT or SIGTERM is received.
    ///
    /// Receiving a signal stops accepting new connections.
    pub async fn run(self) -> Result<()> {
        let shutdown = ShutdownSignal::new()?;
        let socket_addr = self.options.socket_addr;

        match self.options.tls {
            TlsOption::Disabled => {
                tracing::debug!("run plain HTTP server");

                let tcp_listener = TcpListener::bind(socket_addr)
                    .await
                    .context(BindTcpListenerSnafu { socket_addr })?;
                log_listening(tcp_listener.local_addr().unwrap_or(socket_addr));

                axum::serve(tcp_listener, self.router)
                    .with_graceful_shutdown(shutdown.recv())
                    .await
                    .context(RunHttpServerSnafu)
            }
            TlsOption::Mount {
                certificate_path,
                private_key_path,
            } => {
                tracing::debug!("run TLS server");

                let tls_server = TlsServer::new(
                    socket_addr,
                    self.router,
                    &certificate_path,
                    &private_key_path,
                )
                .context(CreateTlsServerSnafu)?;

                let future_server = tls_server.run();
                let future_signal = shutdown.recv();

                // select requires Future + Unpin
                pin_mut!(future_server);
                pin_mut!(future_signal);

                match futures_util::future::select(future_server, future_signal).await {
                    Either::Left((result, _)) => result.context(RunTlsServerSnafu),
                    Either::Right(((), _)) => Ok(()),
                }
            }
        }
    }
}

pub(crate) fn log_listening(socket_addr: SocketAddr) {
    tracing::info!("Listening on [{}]:{}", socket_addr.ip(), socket_addr.port());
}

/// Buffers the request body and hands the request to the dispatcher. The
/// cryptographic operation itself runs on the blocking thread pool.
async fn handle_request(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: axum::extract::Request,
) -> KeyExResponse {
    let (parts, body) = request.into_parts();

    let virtual_host = match dispatcher.route(parts.uri.path()) {
        Ok(virtual_host) => virtual_host.to_owned(),
        Err(err) => return dispatcher.reject(&err),
    };

    let body = match axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .context(ReadBodySnafu)
    {
        Ok(body) => body,
        Err(err) => return dispatcher.reject(&err),
    };

    let executor = Arc::clone(&dispatcher);
    let span = Span::current();
    tokio::task::spawn_blocking(move || {
        span.in_scope(|| executor.execute(&virtual_host, &parts.headers, &body))
    })
    .await
    .context(AbortedSnafu)
    .unwrap_or_else(|err| dispatcher.reject(&err))
}

/// Unix signal handlers, created before serving so that failing to install
/// them is reported as an error.
struct ShutdownSignal {
    sigint: Signal,
    sigterm: Signal,
}

impl ShutdownSignal {
    fn new() -> Result<Self> {
        let sigint = signal(SignalKind::interrupt())
            .context(CreateSignalHandlerSnafu { name: "SIGINT" })?;
        let sigterm = signal(SignalKind::terminate())
            .context(CreateSignalHandlerSnafu { name: "SIGTERM" })?;

        tracing::debug!("created unix signal handlers");
        Ok(Self { sigint, sigterm })
    }

    async fn recv(mut self) {
        select! {
            signal = self.sigint.recv().fuse() => {
                if signal.is_some() {
                    tracing::debug!("received SIGINT");
                }
            },
            signal = self.sigterm.recv().fuse() => {
                if signal.is_some() {
                    tracing::debug!("received SIGTERM");
                }
            },
        };
    }
}
