//! The JSON configuration file and the loading pass which turns it into the
//! immutable server state.
//!
//! ```json
//! {
//!   "port": 9000,
//!   "host": "0.0.0.0",
//!   "prefix": "/bud/key-ex/",
//!   "workers": 1,
//!   "key": "keys/default.pem",
//!   "sni": {
//!     "example.com": "keys/example.pem",
//!     "dual.example.com": { "rsa": "keys/dual-rsa.pem", "ec": "keys/dual-ec.pem" }
//!   },
//!   "secure": { "key": "tls/admin-key.pem", "cert": "tls/admin-cert.pem" },
//!   "badRequestOnMalformedInput": false
//! }
//! ```
//!
//! All keys are optional. Relative paths are resolved against the working
//! directory of the process.
use std::{
    collections::BTreeMap,
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
};

use keyex_keys::{KeyKind, KeyRecord, keys::ParseKeyKindError};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::instrument;

use crate::{
    constants::{DEFAULT_PORT, DEFAULT_PREFIX},
    dispatcher::Dispatcher,
    keystore::{KeySet, KeyStore},
    options::ServerOptions,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read configuration file {path:?}"))]
    ReadConfigFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse configuration file {path:?}"))]
    ParseConfigFile {
        source: serde_json::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to resolve listen address {host:?}"))]
    ResolveHost {
        source: std::io::Error,
        host: String,
    },

    #[snafu(display("listen address {host:?} did not resolve to any address"))]
    NoHostAddress { host: String },

    #[snafu(display("virtual host names must not be empty"))]
    EmptyVirtualHost {},

    #[snafu(display("invalid key kind declared for {scope}"))]
    DeclaredKeyKind {
        source: ParseKeyKindError,
        scope: KeyScope,
    },

    #[snafu(display("failed to load private key for {scope}"))]
    LoadKey {
        source: keyex_keys::keys::Error,
        scope: KeyScope,
    },

    #[snafu(display(
        "private key {path:?} for {scope} is a {actual} key, but was declared as {declared}"
    ))]
    KeyKindMismatch {
        path: PathBuf,
        scope: KeyScope,
        declared: KeyKind,
        actual: KeyKind,
    },

    #[snafu(display("more than one {kind} key configured for {scope}"))]
    DuplicateKey { scope: KeyScope, kind: KeyKind },
}

/// Names the part of the configuration a key belongs to in error messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyScope {
    Default,
    VirtualHost(String),
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("the default keys"),
            Self::VirtualHost(name) => write!(f, "virtual host {name:?}"),
        }
    }
}

/// The parsed, but not yet loaded configuration file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// The listen port. `0` is treated as the default port.
    #[serde(default = "Config::default_port")]
    pub port: u16,

    #[serde(default = "Config::default_host")]
    pub host: String,

    #[serde(default = "Config::default_prefix")]
    pub prefix: String,

    /// The number of async runtime worker threads. `0` is treated as `1`.
    #[serde(default = "Config::default_workers")]
    pub workers: usize,

    /// The default key(s), used when no virtual host specific key matches.
    pub key: Option<KeySource>,

    /// Keys per virtual host.
    #[serde(default)]
    pub sni: BTreeMap<String, KeySource>,

    /// Serve HTTPS using this certificate and key.
    pub secure: Option<SecureConfig>,

    /// Report malformed requests with status 400 instead of 500.
    #[serde(default)]
    pub bad_request_on_malformed_input: bool,
}

/// Either a single key file, whose kind is detected, or one key file per kind.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum KeySource {
    Path(PathBuf),
    ByKind(BTreeMap<String, PathBuf>),
}

#[derive(Debug, PartialEq, Eq, Deserialize)]
pub struct SecureConfig {
    pub key: PathBuf,
    pub cert: PathBuf,
}

/// Everything needed to start serving.
#[derive(Debug)]
pub struct ServerConfig {
    pub options: ServerOptions,
    pub dispatcher: Dispatcher,
    pub workers: usize,
}

impl Config {
    fn default_port() -> u16 {
        DEFAULT_PORT
    }

    fn default_host() -> String {
        "0.0.0.0".to_owned()
    }

    fn default_prefix() -> String {
        DEFAULT_PREFIX.to_owned()
    }

    fn default_workers() -> usize {
        1
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).context(ReadConfigFileSnafu { path })?;

        serde_json::from_str(&input).context(ParseConfigFileSnafu { path })
    }

    /// Resolves the listen address and loads all private keys.
    #[instrument(name = "load_config", skip(self))]
    pub fn load(self) -> Result<ServerConfig> {
        let socket_addr = self.socket_addr()?;
        let keys = self.key_store()?;

        let mut options = ServerOptions::builder().bind_address(socket_addr.ip(), socket_addr.port());
        if let Some(SecureConfig { key, cert }) = self.secure {
            options = options.tls_mount(cert, key);
        }

        let prefix = if self.prefix.is_empty() {
            Self::default_prefix()
        } else {
            self.prefix
        };

        let dispatcher = Dispatcher::new(keys)
            .with_prefix(prefix)
            .with_bad_request_on_malformed_input(self.bad_request_on_malformed_input);

        Ok(ServerConfig {
            options: options.build(),
            dispatcher,
            workers: self.workers.max(1),
        })
    }

    fn socket_addr(&self) -> Result<SocketAddr> {
        let host = self.host.as_str();
        let port = if self.port == 0 { DEFAULT_PORT } else { self.port };

        (host, port)
            .to_socket_addrs()
            .context(ResolveHostSnafu { host })?
            .next()
            .context(NoHostAddressSnafu { host })
    }

    fn key_store(&self) -> Result<KeyStore> {
        let mut builder = KeyStore::builder();

        if let Some(source) = &self.key {
            for record in source.load(&KeyScope::Default)? {
                builder = builder.default_key(record);
            }
        }

        for (virtual_host, source) in &self.sni {
            ensure!(!virtual_host.is_empty(), EmptyVirtualHostSnafu);

            let scope = KeyScope::VirtualHost(virtual_host.clone());
            for record in source.load(&scope)? {
                builder = builder.virtual_host_key(virtual_host.as_str(), record);
            }
        }

        let store = builder.build();
        if store.is_empty() {
            tracing::warn!("no private keys configured, all requests will fail");
        } else {
            tracing::info!(
                default_keys = store.default_keys().len(),
                virtual_hosts = store.virtual_hosts().count(),
                "loaded private keys"
            );
        }

        Ok(store)
    }
}

impl KeySource {
    /// Loads all key files of this source into a [`KeySet`].
    fn load(&self, scope: &KeyScope) -> Result<KeySet> {
        let mut keys = KeySet::new();

        match self {
            Self::Path(path) => {
                keys.insert(load_key(path, scope)?);
            }
            Self::ByKind(paths) => {
                for (declared, path) in paths {
                    let declared = declared
                        .parse::<KeyKind>()
                        .context(DeclaredKeyKindSnafu { scope: scope.clone() })?;

                    let record = load_key(path, scope)?;
                    ensure!(
                        record.kind() == declared,
                        KeyKindMismatchSnafu {
                            path,
                            scope: scope.clone(),
                            declared,
                            actual: record.kind(),
                        }
                    );

                    ensure!(
                        keys.insert(record).is_none(),
                        DuplicateKeySnafu {
                            scope: scope.clone(),
                            kind: declared,
                        }
                    );
                }
            }
        }

        Ok(keys)
    }
}

fn load_key(path: &Path, scope: &KeyScope) -> Result<KeyRecord> {
    tracing::debug!(?path, %scope, "loading private key");
    KeyRecord::from_pem_file(path).context(LoadKeySnafu { scope: scope.clone() })
}
