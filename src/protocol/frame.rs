//! KNXnet/IP frame parsing and encoding.
//!
//! Zero-copy parsing and building of the KNXnet/IP transport frame: the
//! common header, service identification and body extraction.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  Header (6 bytes)           │
//! │  - Header Length: 0x06      │
//! │  - Protocol Version: 0x10   │
//! │  - Service Type: 2 bytes    │
//! │  - Total Length: 2 bytes    │
//! ├─────────────────────────────┤
//! │  Body (variable)            │
//! │  - Service-specific data    │
//! └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use knx_listener::protocol::frame::KnxnetIpFrame;
//! use knx_listener::protocol::ServiceType;
//!
//! let datagram = [0x06, 0x10, 0x02, 0x0A, 0x00, 0x08, 0x15, 0x00];
//! let frame = KnxnetIpFrame::parse(&datagram).unwrap();
//! assert_eq!(frame.service_type(), ServiceType::DisconnectResponse);
//! assert_eq!(frame.body(), &[0x15, 0x00]);
//! ```
//!
//! All parsers are total: short or inconsistent input is reported as an
//! error, never as an out-of-bounds read.

use crate::error::{KnxError, Result};
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::constants::{
    ServiceType, HEADER_SIZE_10, IPV4_UDP, KNXNETIP_VERSION_10, MAX_FRAME_SIZE,
};

/// Owned outbound frame, sized for the largest frame this crate emits.
pub type FrameBuf = heapless::Vec<u8, MAX_FRAME_SIZE>;

/// Run a `build(&mut [u8])`-style encoder into a fresh [`FrameBuf`].
pub fn frame_buf(build: impl FnOnce(&mut [u8]) -> Result<usize>) -> Result<FrameBuf> {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    let len = build(&mut buf)?;
    FrameBuf::from_slice(&buf[..len]).map_err(|_| KnxError::payload_too_large())
}

/// KNXnet/IP frame header (6 bytes)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Header Len   │ Protocol Ver │  Service Type ID    │
/// │   (1 byte)   │   (1 byte)   │     (2 bytes)       │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │           Total Length (2 bytes)                   │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct KnxnetIpHeader {
    /// Service type identifier
    pub service_type: ServiceType,
    /// Total length of frame (header + body)
    pub total_length: u16,
}

impl KnxnetIpHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 6;

    /// Create a new header
    pub const fn new(service_type: ServiceType, body_length: u16) -> Self {
        Self {
            service_type,
            total_length: Self::SIZE as u16 + body_length,
        }
    }

    /// Parse and validate the header at the start of a datagram.
    ///
    /// # Errors
    ///
    /// - `MalformedHeader` if the datagram is shorter than 6 bytes, the
    ///   header length is not 6, the version is not 1.0, or the total
    ///   length is below 6 or larger than the datagram
    /// - `UnsupportedServiceType` for a well-formed header carrying a
    ///   service this client does not handle
    #[inline(always)]
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(&[header_length, protocol_version, st_hi, st_lo, len_hi, len_lo]) =
            data.first_chunk::<6>()
        else {
            return Err(KnxError::malformed_header());
        };

        if header_length != HEADER_SIZE_10 || protocol_version != KNXNETIP_VERSION_10 {
            return Err(KnxError::malformed_header());
        }

        let total_length = u16::from_be_bytes([len_hi, len_lo]);
        if usize::from(total_length) < Self::SIZE || usize::from(total_length) > data.len() {
            return Err(KnxError::malformed_header());
        }

        let service_type = ServiceType::from_u16(u16::from_be_bytes([st_hi, st_lo]))
            .ok_or_else(KnxError::unsupported_service_type)?;

        Ok(Self {
            service_type,
            total_length,
        })
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let out = buf
            .get_mut(..Self::SIZE)
            .ok_or_else(KnxError::payload_too_large)?;
        out[0] = HEADER_SIZE_10;
        out[1] = KNXNETIP_VERSION_10;
        out[2..4].copy_from_slice(&self.service_type.to_u16().to_be_bytes());
        out[4..6].copy_from_slice(&self.total_length.to_be_bytes());
        Ok(Self::SIZE)
    }

    /// Body length announced by the header
    pub const fn body_length(&self) -> u16 {
        self.total_length.saturating_sub(Self::SIZE as u16)
    }
}

/// Zero-copy view of a KNXnet/IP frame
#[derive(Debug)]
pub struct KnxnetIpFrame<'a> {
    /// Header plus body; trailing bytes of the datagram are cut off
    data: &'a [u8],
    header: KnxnetIpHeader,
}

impl<'a> KnxnetIpFrame<'a> {
    /// Parse a KNXnet/IP frame from a datagram.
    ///
    /// Bytes beyond the announced total length are ignored.
    #[inline(always)]
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = KnxnetIpHeader::parse(data)?;
        let data = data
            .get(..usize::from(header.total_length))
            .ok_or_else(KnxError::malformed_header)?;
        Ok(Self { data, header })
    }

    #[inline(always)]
    pub const fn header(&self) -> &KnxnetIpHeader {
        &self.header
    }

    #[inline(always)]
    pub const fn service_type(&self) -> ServiceType {
        self.header.service_type
    }

    /// Service body (everything after the header)
    #[inline(always)]
    pub fn body(&self) -> &'a [u8] {
        self.data.get(KnxnetIpHeader::SIZE..).unwrap_or_default()
    }

    /// Complete frame including header
    #[inline(always)]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// Builder for creating KNXnet/IP frames
#[derive(Debug)]
pub struct FrameBuilder<'a> {
    service_type: ServiceType,
    body: &'a [u8],
}

impl<'a> FrameBuilder<'a> {
    pub const fn new(service_type: ServiceType, body: &'a [u8]) -> Self {
        Self { service_type, body }
    }

    /// Build the frame into a buffer
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if the frame exceeds [`MAX_FRAME_SIZE`] or `buf`.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let total_size = self.size();
        if total_size > MAX_FRAME_SIZE || buf.len() < total_size {
            return Err(KnxError::payload_too_large());
        }

        let header = KnxnetIpHeader::new(self.service_type, self.body.len() as u16);
        header.encode(buf)?;
        buf[KnxnetIpHeader::SIZE..total_size].copy_from_slice(self.body);

        Ok(total_size)
    }

    /// Total frame size
    pub const fn size(&self) -> usize {
        KnxnetIpHeader::SIZE + self.body.len()
    }
}

/// Host Protocol Address Information (HPAI)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Structure Len│ Host Protocol│   IP Address        │
/// │   (1 byte)   │   (1 byte)   │   (4 bytes IPv4)    │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │                Port (2 bytes)                      │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct Hpai {
    /// Host protocol code
    pub host_protocol: u8,
    pub ip_address: [u8; 4],
    pub port: u16,
}

impl Hpai {
    /// Size of HPAI structure for IPv4
    pub const SIZE: usize = 8;

    /// 0.0.0.0:0, asks the gateway to answer to the datagram source
    pub const NAT: Self = Self::new([0, 0, 0, 0], 0);

    /// Create a new HPAI for IPv4 UDP
    pub const fn new(ip_address: [u8; 4], port: u16) -> Self {
        Self {
            host_protocol: IPV4_UDP,
            ip_address,
            port,
        }
    }

    /// Parse an HPAI from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(&[len, host_protocol, a, b, c, d, port_hi, port_lo]) = data.first_chunk::<8>()
        else {
            return Err(KnxError::malformed_frame());
        };
        if usize::from(len) != Self::SIZE {
            return Err(KnxError::malformed_frame());
        }
        Ok(Self {
            host_protocol,
            ip_address: [a, b, c, d],
            port: u16::from_be_bytes([port_hi, port_lo]),
        })
    }

    /// Encode HPAI into bytes
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let out = buf
            .get_mut(..Self::SIZE)
            .ok_or_else(KnxError::payload_too_large)?;
        out[0] = Self::SIZE as u8;
        out[1] = self.host_protocol;
        out[2..6].copy_from_slice(&self.ip_address);
        out[6..8].copy_from_slice(&self.port.to_be_bytes());
        Ok(Self::SIZE)
    }

    /// Endpoint described by this HPAI
    pub fn endpoint(&self) -> IpEndpoint {
        IpEndpoint::new(Ipv4Addr::from(self.ip_address), self.port)
    }
}

impl From<IpEndpoint> for Hpai {
    fn from(endpoint: IpEndpoint) -> Self {
        Self::new(endpoint.address.octets(), endpoint.port)
    }
}
