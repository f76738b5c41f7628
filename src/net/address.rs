//! Bind, local and peer addresses.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use crate::net::error::EndpointError;

/// Address family of a listen socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Unix,
}

/// Where an endpoint listens.
///
/// A TCP port of `0` asks the OS for an ephemeral port. Unix domain
/// addresses have no port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAddress {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl BindAddress {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        BindAddress::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        BindAddress::Unix { path: path.into() }
    }

    pub fn family(&self) -> AddressFamily {
        match self {
            BindAddress::Tcp { .. } => AddressFamily::Inet,
            BindAddress::Unix { .. } => AddressFamily::Unix,
        }
    }

    /// Configured port; `0` for Unix domain addresses.
    pub fn port(&self) -> u16 {
        match self {
            BindAddress::Tcp { port, .. } => *port,
            BindAddress::Unix { .. } => 0,
        }
    }

    /// Resolve a TCP address to the first socket address the resolver returns.
    pub(crate) fn resolve(&self) -> Result<SocketAddr, EndpointError> {
        let BindAddress::Tcp { host, port } = self else {
            return Err(EndpointError::bind(
                self,
                io::Error::new(io::ErrorKind::InvalidInput, "not a TCP address"),
            ));
        };
        (host.as_str(), *port)
            .to_socket_addrs()
            .map_err(|e| EndpointError::bind(self, e))?
            .next()
            .ok_or_else(|| {
                EndpointError::bind(
                    self,
                    io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"),
                )
            })
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindAddress::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            BindAddress::Tcp { host, port } => write!(f, "{}:{}", host, port),
            BindAddress::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Address a listen socket is actually bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAddr {
    Inet(SocketAddr),
    Unix(PathBuf),
}

impl LocalAddr {
    /// Bound TCP port, if any.
    pub fn port(&self) -> Option<u16> {
        match self {
            LocalAddr::Inet(addr) => Some(addr.port()),
            LocalAddr::Unix(_) => None,
        }
    }

    /// Address a local client should dial to reach this socket.
    ///
    /// Wildcard binds are reached through the loopback interface.
    pub(crate) fn connectable(&self) -> LocalAddr {
        match self {
            LocalAddr::Inet(addr) if addr.ip().is_unspecified() => {
                let ip = match addr.ip() {
                    IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                    IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
                };
                LocalAddr::Inet(SocketAddr::new(ip, addr.port()))
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalAddr::Inet(addr) => write!(f, "{}", addr),
            LocalAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Remote end of an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Inet(SocketAddr),
    /// Unix peers are usually unnamed.
    Unix(Option<PathBuf>),
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => write!(f, "{}", addr),
            PeerAddr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            PeerAddr::Unix(None) => write!(f, "unix:(unnamed)"),
        }
    }
}

/// Parse an octal permission string such as `"0660"` or `"660"`.
pub fn parse_permissions(value: &str) -> Option<u32> {
    let digits = value.trim();
    if digits.is_empty() || digits.len() > 4 {
        return None;
    }
    u32::from_str_radix(digits, 8).ok().filter(|mode| *mode <= 0o7777)
}

/// Socket file of a bound Unix domain listener. Removes the file on drop so
/// the path can be bound again.
///
/// Must be declared after the listener in any struct holding both, so the
/// descriptor closes before the path disappears.
#[derive(Debug)]
pub(crate) struct SocketFile {
    path: PathBuf,
}

impl SocketFile {
    /// Take ownership of a freshly bound path, applying `permissions` if set.
    pub(crate) fn claim(path: &Path, permissions: Option<u32>) -> io::Result<Self> {
        let file = SocketFile {
            path: path.to_path_buf(),
        };
        if let Some(mode) = permissions {
            set_mode(path, mode)?;
        }
        Ok(file)
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
            }
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_brackets_ipv6_hosts() {
        assert_eq!(BindAddress::tcp("::1", 80).to_string(), "[::1]:80");
        assert_eq!(BindAddress::tcp("localhost", 0).to_string(), "localhost:0");
        assert_eq!(BindAddress::unix("/tmp/a.sock").to_string(), "unix:/tmp/a.sock");
    }

    #[test]
    fn unix_addresses_have_no_port() {
        let addr = BindAddress::unix("/tmp/a.sock");
        assert_eq!(addr.port(), 0);
        assert_eq!(addr.family(), AddressFamily::Unix);
        assert!(addr.resolve().is_err());
    }

    #[test]
    fn resolves_literal_ip() {
        let addr = BindAddress::tcp("127.0.0.1", 8080).resolve().unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn wildcard_local_addr_dials_loopback() {
        let local = LocalAddr::Inet("0.0.0.0:4000".parse().unwrap());
        assert_eq!(
            local.connectable(),
            LocalAddr::Inet("127.0.0.1:4000".parse().unwrap())
        );
        let v6 = LocalAddr::Inet("[::]:4000".parse().unwrap());
        assert_eq!(v6.connectable(), LocalAddr::Inet("[::1]:4000".parse().unwrap()));
    }

    #[test]
    fn permissions_are_octal() {
        assert_eq!(parse_permissions("0660"), Some(0o660));
        assert_eq!(parse_permissions("777"), Some(0o777));
        assert_eq!(parse_permissions("rw-rw-rw-"), None);
        assert_eq!(parse_permissions("0989"), None);
        assert_eq!(parse_permissions(""), None);
    }
}
