//! The transport independent request handling: routing, request parsing, key
//! resolution, operation execution and response rendering.
//!
//! Every failure is converted into a rendered [`KeyExResponse`] carrying an
//! `{"error": ...}` body. Nothing in here panics on client input.
use base64::Engine as _;
use http::{HeaderMap, StatusCode};
use keyex_keys::{KeyKind, MessageDigest, keys::ParseKeyKindError, ops};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

use crate::{
    constants::DEFAULT_PREFIX,
    dispatcher::request::{BASE64, KeyExRequest, Operation},
    keystore::KeyStore,
};

pub mod request;
pub mod response;

pub use response::KeyExResponse;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("route not found"))]
    RouteNotFound { path: String },

    #[snafu(display("failed to read request body"))]
    ReadBody { source: axum::Error },

    #[snafu(display("header {name:?} is not valid visible ASCII"))]
    InvalidHeader {
        source: http::header::ToStrError,
        name: &'static str,
    },

    #[snafu(display("failed to parse JSON request body"))]
    ParseJson { source: serde_json::Error },

    #[snafu(display("missing payload data"))]
    MissingData {},

    #[snafu(display("base64 parse failed"))]
    DecodeBase64 { source: base64::DecodeError },

    #[snafu(display("missing message digest"))]
    MissingDigest {},

    #[snafu(display("unsupported key kind: {kind}"))]
    UnsupportedKeyKind { kind: String },

    #[snafu(display("unknown message digest {name:?}"))]
    UnknownDigest { name: String },

    #[snafu(display("No key found, matching: {virtual_host}"))]
    KeyNotFound { virtual_host: String },

    #[snafu(display("signing failed"))]
    Sign { source: ops::Error },

    #[snafu(display("decryption failed"))]
    Decrypt { source: ops::Error },

    #[snafu(display("operation was aborted"))]
    Aborted { source: tokio::task::JoinError },
}

impl Error {
    /// The HTTP status of this error. Malformed client input is reported with
    /// `malformed_input`.
    pub fn status(&self, malformed_input: StatusCode) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } | Self::KeyNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ReadBody { .. }
            | Self::InvalidHeader { .. }
            | Self::ParseJson { .. }
            | Self::MissingData { .. }
            | Self::DecodeBase64 { .. }
            | Self::MissingDigest { .. } => malformed_input,
            Self::UnsupportedKeyKind { .. }
            | Self::UnknownDigest { .. }
            | Self::Sign { .. }
            | Self::Decrypt { .. }
            | Self::Aborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The human readable message sent to the caller: this error and all of
    /// its sources, joined by `": "`.
    pub fn message(&self) -> String {
        std::iter::successors(Some(self as &dyn std::error::Error), |err| err.source())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(": ")
    }
}

impl From<ParseKeyKindError> for Error {
    fn from(ParseKeyKindError { kind }: ParseKeyKindError) -> Self {
        Self::UnsupportedKeyKind { kind }
    }
}

/// Handles requests independently of the listener which accepted them.
///
/// The dispatcher is immutable, it is shared between all concurrent requests
/// behind an [`Arc`](std::sync::Arc).
#[derive(Debug)]
pub struct Dispatcher {
    prefix: String,
    keys: KeyStore,
    malformed_input_status: StatusCode,
}

impl Dispatcher {
    /// Creates a dispatcher serving requests below [`DEFAULT_PREFIX`] which
    /// reports malformed input with status 500.
    pub fn new(keys: KeyStore) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
            keys,
            malformed_input_status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Sets the path prefix. Everything after the prefix is the virtual host.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Report malformed JSON, base64 and bodies with status 400 instead of
    /// 500.
    pub fn with_bad_request_on_malformed_input(mut self, enabled: bool) -> Self {
        self.malformed_input_status = if enabled {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Routes, executes and renders a fully buffered request.
    pub fn dispatch(&self, path: &str, headers: &HeaderMap, body: &[u8]) -> KeyExResponse {
        match self.route(path) {
            Ok(virtual_host) => self.execute(virtual_host, headers, body),
            Err(err) => self.reject(&err),
        }
    }

    /// Returns the virtual host addressed by `path`, which is everything after
    /// the prefix. It is empty if the bare prefix is requested.
    pub fn route<'a>(&self, path: &'a str) -> Result<&'a str> {
        path.strip_prefix(self.prefix.as_str())
            .context(RouteNotFoundSnafu { path })
    }

    /// Executes the request addressed at `virtual_host` and renders the
    /// result.
    #[instrument(name = "execute_request", skip(self, headers, body), fields(body.len = body.len()))]
    pub fn execute(&self, virtual_host: &str, headers: &HeaderMap, body: &[u8]) -> KeyExResponse {
        self.try_execute(virtual_host, headers, body)
            .unwrap_or_else(|err| self.reject(&err))
    }

    /// Renders `err` as a JSON error response.
    pub fn reject(&self, err: &Error) -> KeyExResponse {
        let status = err.status(self.malformed_input_status);
        let message = err.message();

        tracing::warn!(%status, error = %message, "request failed");
        KeyExResponse::error(status, message)
    }

    fn try_execute(
        &self,
        virtual_host: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<KeyExResponse> {
        let request = KeyExRequest::parse(headers, body)?;

        let kind = match request.key_kind.as_deref() {
            None | Some("") => Ok(KeyKind::DEFAULT),
            Some(kind) => kind.parse::<KeyKind>(),
        };

        // An unknown kind is rejected when signing and is a failed lookup when
        // decrypting.
        let (kind, digest) = match request.operation {
            Operation::Sign => {
                let kind = kind?;
                let name = request.digest.as_deref().context(MissingDigestSnafu)?;
                let digest = name
                    .parse::<MessageDigest>()
                    .map_err(|_| UnknownDigestSnafu { name }.build())?;
                (kind, Some(digest))
            }
            Operation::Decrypt => (
                kind.ok().context(KeyNotFoundSnafu { virtual_host })?,
                None,
            ),
        };

        let key = self
            .keys
            .lookup(virtual_host, kind)
            .context(KeyNotFoundSnafu { virtual_host })?;

        tracing::debug!(
            virtual_host,
            operation = ?request.operation,
            %kind,
            "resolved key"
        );

        let encoded = match digest {
            Some(digest) => {
                let signature =
                    ops::sign(key, kind, digest, &request.data).context(SignSnafu)?;
                BASE64.encode(signature)
            }
            None => {
                let plaintext = ops::decrypt(key, &request.data).context(DecryptSnafu)?;
                BASE64.encode(plaintext.as_slice())
            }
        };

        Ok(KeyExResponse::success(request.shape, encoded))
    }
}
