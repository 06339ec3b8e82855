//! Transport endpoint identity used throughout discovery.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// An IP address and UDP port pair
///
/// Two hosts are equal when both the IP and the port are equal. IPv4-mapped
/// IPv6 addresses (`::ffff:a.b.c.d`) are canonicalized to IPv4 on
/// construction so that a dual-stack socket reporting a mapped source
/// compares equal to the IPv4 address it was sent to. Serde goes through
/// `SocketAddr` so deserialized hosts are canonicalized too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "SocketAddr", into = "SocketAddr")]
pub struct Host {
    ip: IpAddr,
    port: u16,
}

impl Host {
    /// Create a host from an IP and port
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip: ip.to_canonical(),
            port,
        }
    }

    /// IP address
    #[must_use]
    pub const fn ip(&self) -> IpAddr {
        self.ip
    }

    /// UDP port
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Convert to a socket address for sending
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Whether the address family is IPv4
    #[must_use]
    pub const fn is_ipv4(&self) -> bool {
        self.ip.is_ipv4()
    }
}

impl From<SocketAddr> for Host {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<Host> for SocketAddr {
    fn from(host: Host) -> Self {
        host.socket_addr()
    }
}

impl FromStr for Host {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self::from)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_equality_is_by_value() {
        let a: Host = "1.2.3.4:5000".parse().unwrap();
        let b = Host::new("1.2.3.4".parse().unwrap(), 5000);
        assert_eq!(a, b);

        let other_port: Host = "1.2.3.4:5001".parse().unwrap();
        let other_ip: Host = "1.2.3.5:5000".parse().unwrap();
        assert_ne!(a, other_port);
        assert_ne!(a, other_ip);
    }

    #[test]
    fn test_host_canonicalizes_mapped_ipv6() {
        let mapped: SocketAddr = "[::ffff:1.2.3.4]:5000".parse().unwrap();
        let plain: Host = "1.2.3.4:5000".parse().unwrap();
        assert_eq!(Host::from(mapped), plain);
        assert!(Host::from(mapped).is_ipv4());
    }

    #[test]
    fn test_host_deserialize_canonicalizes_mapped_ipv6() {
        let mapped: Host = serde_json::from_str("\"[::ffff:1.2.3.4]:5000\"").unwrap();
        let plain: Host = "1.2.3.4:5000".parse().unwrap();
        assert_eq!(mapped, plain);
        assert!(mapped.is_ipv4());
        assert_eq!(serde_json::to_string(&mapped).unwrap(), "\"1.2.3.4:5000\"");
    }

    #[test]
    fn test_host_display() {
        let v4: Host = "192.0.2.1:3478".parse().unwrap();
        assert_eq!(v4.to_string(), "192.0.2.1:3478");

        let v6: Host = "[2001:db8::1]:3478".parse().unwrap();
        assert_eq!(v6.to_string(), "[2001:db8::1]:3478");
    }

    #[test]
    fn test_host_rejects_missing_port() {
        assert!("192.0.2.1".parse::<Host>().is_err());
    }
}
