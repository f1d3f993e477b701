//! Contains various constant definitions, mostly for default ports, IP
//! addresses and the API prefix.
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// The default port `9000`.
pub const DEFAULT_PORT: u16 = 9000;

/// The default IP address [`Ipv4Addr::UNSPECIFIED`] (`0.0.0.0`) the server binds to,
/// which represents binding on all network addresses.
pub const DEFAULT_LISTEN_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// The default socket address `0.0.0.0:9000` the server binds to.
pub const DEFAULT_SOCKET_ADDRESS: SocketAddr = SocketAddr::new(DEFAULT_LISTEN_ADDRESS, DEFAULT_PORT);

/// The default path prefix. Everything after the prefix is the virtual host.
pub const DEFAULT_PREFIX: &str = "/bud/key-ex/";

/// Request bodies are buffered completely before dispatching. Key exchange
/// payloads are a few hundred bytes at most.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// The content type of successful responses of the header-driven transport.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
