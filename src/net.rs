//! Network types for KNX communication.
//!
//! Lightweight IPv4 address and endpoint types that work in `no_std`
//! builds, the validators used on user-supplied gateway settings, and the
//! datagram transports.

use crate::error::{KnxError, Result};
use core::fmt;

pub mod transport;

#[cfg(feature = "std")]
pub mod mock_transport;
#[cfg(feature = "std")]
pub mod udp;

pub use transport::AsyncTransport;

/// IPv4 address representation.
///
/// # Examples
///
/// ```
/// use knx_listener::net::Ipv4Addr;
///
/// let addr = Ipv4Addr::from([192, 168, 1, 10]);
/// assert_eq!(addr, Ipv4Addr::new(192, 168, 1, 10));
///
/// let parsed: Ipv4Addr = "192.168.1.10".parse().unwrap();
/// assert_eq!(parsed.octets(), [192, 168, 1, 10]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct Ipv4Addr {
    octets: [u8; 4],
}

impl Ipv4Addr {
    /// Create a new IPv4 address from individual octets.
    #[inline]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self {
            octets: [a, b, c, d],
        }
    }

    /// Returns the four octets that make up this address.
    #[inline]
    pub const fn octets(&self) -> [u8; 4] {
        self.octets
    }

    /// Whether this is 0.0.0.0
    #[inline]
    pub const fn is_unspecified(&self) -> bool {
        u32::from_be_bytes(self.octets) == 0
    }

    /// The unspecified address (0.0.0.0), used for NAT mode in KNXnet/IP.
    pub const UNSPECIFIED: Self = Self::new(0, 0, 0, 0);

    /// Localhost (127.0.0.1).
    pub const LOCALHOST: Self = Self::new(127, 0, 0, 1);
}

impl From<[u8; 4]> for Ipv4Addr {
    #[inline]
    fn from(octets: [u8; 4]) -> Self {
        Self { octets }
    }
}

impl From<(u8, u8, u8, u8)> for Ipv4Addr {
    #[inline]
    fn from((a, b, c, d): (u8, u8, u8, u8)) -> Self {
        Self::new(a, b, c, d)
    }
}

impl From<Ipv4Addr> for [u8; 4] {
    #[inline]
    fn from(addr: Ipv4Addr) -> [u8; 4] {
        addr.octets
    }
}

#[cfg(feature = "std")]
impl From<std::net::Ipv4Addr> for Ipv4Addr {
    fn from(addr: std::net::Ipv4Addr) -> Self {
        Self {
            octets: addr.octets(),
        }
    }
}

#[cfg(feature = "std")]
impl From<Ipv4Addr> for std::net::Ipv4Addr {
    fn from(addr: Ipv4Addr) -> Self {
        let [a, b, c, d] = addr.octets;
        std::net::Ipv4Addr::new(a, b, c, d)
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl core::str::FromStr for Ipv4Addr {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let mut octets = [0u8; 4];

        for octet in &mut octets {
            let part = parts.next().ok_or_else(KnxError::invalid_ipv4)?;
            if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(KnxError::invalid_ipv4());
            }
            *octet = part.parse().map_err(|_| KnxError::invalid_ipv4())?;
        }

        if parts.next().is_some() {
            return Err(KnxError::invalid_ipv4());
        }

        Ok(Self { octets })
    }
}

/// An IPv4 address and UDP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct IpEndpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl IpEndpoint {
    /// 0.0.0.0:0, announced in HPAIs when the client sits behind NAT.
    pub const UNSPECIFIED: Self = Self::new(Ipv4Addr::UNSPECIFIED, 0);

    #[inline]
    pub const fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }
}

impl fmt::Display for IpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[cfg(feature = "std")]
impl From<IpEndpoint> for std::net::SocketAddr {
    fn from(endpoint: IpEndpoint) -> Self {
        std::net::SocketAddr::V4(std::net::SocketAddrV4::new(
            endpoint.address.into(),
            endpoint.port,
        ))
    }
}

#[cfg(feature = "std")]
impl From<std::net::SocketAddrV4> for IpEndpoint {
    fn from(addr: std::net::SocketAddrV4) -> Self {
        Self::new((*addr.ip()).into(), addr.port())
    }
}

/// Check that `text` is a dotted-quad IPv4 literal.
///
/// Exactly four parts, each 1 to 3 ASCII digits with a value of at most 255.
///
/// ```
/// use knx_listener::net::validate_ipv4;
///
/// assert!(validate_ipv4("192.168.1.10"));
/// assert!(!validate_ipv4("192.168.1"));
/// assert!(!validate_ipv4("256.1.1.1"));
/// ```
pub fn validate_ipv4(text: &str) -> bool {
    text.parse::<Ipv4Addr>().is_ok()
}

/// Parse a UDP port number given as plain ASCII decimal.
pub fn validate_port(text: &str) -> Result<u16> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KnxError::invalid_port());
    }
    text.parse::<u16>().map_err(|_| KnxError::invalid_port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        let addr: Ipv4Addr = "192.168.1.10".parse().unwrap();
        assert_eq!(addr.octets(), [192, 168, 1, 10]);
        assert_eq!(addr.to_string(), "192.168.1.10");
    }

    #[test]
    fn test_validate_ipv4() {
        assert!(validate_ipv4("0.0.0.0"));
        assert!(validate_ipv4("255.255.255.255"));
        assert!(validate_ipv4("10.0.0.007"));

        for text in [
            "192.168.1",
            "192.168.1.256",
            "192.168.1.10.5",
            "a.b.c.d",
            "",
            "1..2.3",
            "+1.2.3.4",
            " 1.2.3.4",
            "1.2.3.0004",
        ] {
            assert!(!validate_ipv4(text), "{text:?}");
        }
    }

    #[test]
    fn test_validate_port() {
        assert_eq!(validate_port("3671").unwrap(), 3671);
        assert_eq!(validate_port("0").unwrap(), 0);
        assert_eq!(validate_port("65535").unwrap(), 65535);

        for text in ["65536", "-1", "+80", "", "36a1", "99999999999"] {
            let err = validate_port(text).unwrap_err();
            assert_eq!(err.code(), crate::error::ErrorCode::InvalidPort, "{text:?}");
        }
    }

    #[test]
    fn test_endpoint_socket_addr() {
        let endpoint = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);
        let socket: std::net::SocketAddr = endpoint.into();
        assert_eq!(socket.to_string(), "192.168.1.10:3671");
        assert_eq!(endpoint.to_string(), "192.168.1.10:3671");
    }

    #[test]
    fn test_unspecified() {
        assert!(IpEndpoint::UNSPECIFIED.address.is_unspecified());
        assert!(!Ipv4Addr::LOCALHOST.is_unspecified());
    }
}
