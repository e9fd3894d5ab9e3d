//! Name resolution and TCP connection setup.

use sn_core::NavError;
use sn_core::NavResult;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;

/// Trait-object-safe stream used by the HTTP client.
pub trait IoStream: Read + Write {}
impl<T> IoStream for T where T: Read + Write {}

pub type BoxedIoStream = Box<dyn IoStream + Send>;

/// Resolves `host:port` with the operating system resolver.
pub fn resolve(host: &str, port: u16) -> NavResult<Vec<SocketAddr>> {
    let query = format!("{host}:{port}");
    let addresses: Vec<SocketAddr> = query
        .to_socket_addrs()
        .map_err(|error| {
            NavError::new(
                "net.dns.resolve_failed",
                format!("failed to resolve `{query}`: {error}"),
            )
        })?
        .collect();

    if addresses.is_empty() {
        return Err(NavError::new(
            "net.dns.no_results",
            format!("resolver returned no addresses for `{query}`"),
        ));
    }

    Ok(addresses)
}

/// Connects to the first reachable address, applying `timeout` to connect, read and write.
pub fn connect_first_available(addresses: &[SocketAddr], timeout: Duration) -> NavResult<TcpStream> {
    let mut last_error: Option<NavError> = None;

    for address in addresses {
        match connect(*address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                tracing::debug!(%address, %error, "connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        NavError::new(
            "net.transport.no_addresses",
            "no addresses available to open a connection",
        )
    }))
}

fn connect(address: SocketAddr, timeout: Duration) -> NavResult<TcpStream> {
    let stream = TcpStream::connect_timeout(&address, timeout).map_err(|error| {
        NavError::new(
            "net.transport.connect_failed",
            format!("failed to connect to `{address}`: {error}"),
        )
    })?;

    stream.set_nodelay(true).map_err(|error| {
        NavError::new(
            "net.transport.nodelay_failed",
            format!("failed to enable TCP_NODELAY for `{address}`: {error}"),
        )
    })?;

    stream.set_read_timeout(Some(timeout)).map_err(|error| {
        NavError::new(
            "net.transport.read_timeout_failed",
            format!("failed to set read timeout for `{address}`: {error}"),
        )
    })?;

    stream.set_write_timeout(Some(timeout)).map_err(|error| {
        NavError::new(
            "net.transport.write_timeout_failed",
            format!("failed to set write timeout for `{address}`: {error}"),
        )
    })?;

    Ok(stream)
}
