//! KNXnet/IP tunneling service builders and parsers.
//!
//! Builders write complete frames (header included) into caller-provided
//! buffers; `to_frame` wraps the same encoder into an owned [`FrameBuf`].
//! Parsers take the frame *body* as returned by
//! [`KnxnetIpFrame::body`](crate::protocol::frame::KnxnetIpFrame::body).
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Gateway
//!   |                                |
//!   |------- CONNECT_REQUEST ------->|
//!   |<------ CONNECT_RESPONSE -------|
//!   |                                |
//!   |<----- TUNNELING_REQUEST -------|  (bus traffic)
//!   |------- TUNNELING_ACK --------->|
//!   |                                |
//!   |--- CONNECTIONSTATE_REQUEST --->|  (every 60s)
//!   |<-- CONNECTIONSTATE_RESPONSE ---|
//!   |                                |
//!   |------ DISCONNECT_REQUEST ----->|
//!   |<----- DISCONNECT_RESPONSE -----|
//! ```
//!
//! ## Example
//!
//! ```rust
//! use knx_listener::protocol::frame::Hpai;
//! use knx_listener::protocol::services::ConnectRequest;
//!
//! let request = ConnectRequest::new(Hpai::NAT, Hpai::NAT);
//! let mut buffer = [0u8; 32];
//! let len = request.build(&mut buffer).unwrap();
//! assert_eq!(len, 26);
//! ```

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{ServiceType, TUNNEL_CONNECTION, TUNNEL_LINKLAYER};
use crate::protocol::frame::{frame_buf, FrameBuf, FrameBuilder, Hpai, KnxnetIpHeader};

/// Largest fixed-layout service body built here (2 HPAIs + CRI)
const MAX_SERVICE_BODY: usize = 2 * Hpai::SIZE + ConnectionRequestInfo::SIZE;

/// Write `header + body` where body is assembled by `fill` into a scratch buffer.
fn build_with(
    service_type: ServiceType,
    buf: &mut [u8],
    fill: impl FnOnce(&mut [u8]) -> Result<usize>,
) -> Result<usize> {
    let mut body = [0u8; MAX_SERVICE_BODY];
    let len = fill(&mut body)?;
    FrameBuilder::new(service_type, &body[..len]).build(buf)
}

/// `channel_id, reserved/status, HPAI` body shared by state and disconnect requests.
fn encode_channel_hpai(buf: &mut [u8], channel_id: u8, second: u8, hpai: &Hpai) -> Result<usize> {
    let out = buf.get_mut(..2).ok_or_else(KnxError::payload_too_large)?;
    out[0] = channel_id;
    out[1] = second;
    Ok(2 + hpai.encode(&mut buf[2..])?)
}

/// `channel_id, status` body of the response services.
fn parse_channel_status(data: &[u8]) -> Result<(u8, u8)> {
    match data {
        [channel_id, status, ..] => Ok((*channel_id, *status)),
        _ => Err(KnxError::malformed_frame()),
    }
}

/// Connection Request Information (CRI) for tunneling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequestInfo {
    /// Connection type (`TUNNEL_CONNECTION` = 0x04)
    pub connection_type: u8,
    /// KNX layer (`TUNNEL_LINKLAYER` = 0x02)
    pub knx_layer: u8,
}

impl ConnectionRequestInfo {
    pub const SIZE: usize = 4;

    /// CRI for a link layer tunnel
    pub const fn tunnel_link_layer() -> Self {
        Self {
            connection_type: TUNNEL_CONNECTION,
            knx_layer: TUNNEL_LINKLAYER,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let out = buf
            .get_mut(..Self::SIZE)
            .ok_or_else(KnxError::payload_too_large)?;
        out.copy_from_slice(&[Self::SIZE as u8, self.connection_type, self.knx_layer, 0x00]);
        Ok(Self::SIZE)
    }
}

/// `CONNECT_REQUEST` service (0x0205)
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest {
    /// Control endpoint (for connection management)
    pub control_endpoint: Hpai,
    /// Data endpoint (for tunneling data)
    pub data_endpoint: Hpai,
    pub cri: ConnectionRequestInfo,
}

impl ConnectRequest {
    /// Frame size on the wire
    pub const SIZE: usize = KnxnetIpHeader::SIZE + MAX_SERVICE_BODY;

    pub const fn new(control_endpoint: Hpai, data_endpoint: Hpai) -> Self {
        Self {
            control_endpoint,
            data_endpoint,
            cri: ConnectionRequestInfo::tunnel_link_layer(),
        }
    }

    /// Build the complete frame, returns the number of bytes written
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        build_with(ServiceType::ConnectRequest, buf, |body| {
            let mut offset = self.control_endpoint.encode(body)?;
            offset += self.data_endpoint.encode(&mut body[offset..])?;
            offset += self.cri.encode(&mut body[offset..])?;
            Ok(offset)
        })
    }

    pub fn to_frame(&self) -> Result<FrameBuf> {
        frame_buf(|buf| self.build(buf))
    }
}

/// `CONNECT_RESPONSE` service (0x0206)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
    /// Data endpoint assigned by the gateway
    pub data_endpoint: Hpai,
    /// Connection response data block, when the gateway sent one
    pub crd: Option<[u8; 4]>,
}

impl ConnectResponse {
    /// Parse from frame body.
    ///
    /// # Errors
    ///
    /// - `ConnectRejected(status)` for any non-zero status, whatever follows
    /// - `MalformedFrame` if an accepted response lacks the data endpoint
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (channel_id, status) = parse_channel_status(data)?;
        if status != 0 {
            return Err(KnxError::connect_rejected(status));
        }

        let data_endpoint = Hpai::parse(&data[2..])?;
        let crd = data
            .get(2 + Hpai::SIZE..)
            .and_then(|rest| rest.first_chunk::<4>())
            .filter(|crd| usize::from(crd[0]) == ConnectionRequestInfo::SIZE)
            .copied();

        Ok(Self {
            channel_id,
            status,
            data_endpoint,
            crd,
        })
    }

    /// Individual address the gateway assigned to this tunnel
    pub fn assigned_address(&self) -> Option<IndividualAddress> {
        self.crd
            .filter(|crd| crd[1] == TUNNEL_CONNECTION)
            .map(|crd| IndividualAddress::from(u16::from_be_bytes([crd[2], crd[3]])))
    }

    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// Build the complete frame (gateway side)
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        build_with(ServiceType::ConnectResponse, buf, |body| {
            let mut offset = encode_channel_hpai(body, self.channel_id, self.status, &self.data_endpoint)?;
            if let Some(crd) = self.crd {
                body[offset..offset + crd.len()].copy_from_slice(&crd);
                offset += crd.len();
            }
            Ok(offset)
        })
    }

    pub fn to_frame(&self) -> Result<FrameBuf> {
        frame_buf(|buf| self.build(buf))
    }
}

/// `CONNECTIONSTATE_REQUEST` service (0x0207)
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStateRequest {
    pub channel_id: u8,
    pub control_endpoint: Hpai,
}

impl ConnectionStateRequest {
    pub const fn new(channel_id: u8, control_endpoint: Hpai) -> Self {
        Self {
            channel_id,
            control_endpoint,
        }
    }

    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        build_with(ServiceType::ConnectionstateRequest, buf, |body| {
            encode_channel_hpai(body, self.channel_id, 0x00, &self.control_endpoint)
        })
    }

    pub fn to_frame(&self) -> Result<FrameBuf> {
        frame_buf(|buf| self.build(buf))
    }
}

/// `CONNECTIONSTATE_RESPONSE` service (0x0208)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateResponse {
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
}

impl ConnectionStateResponse {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (channel_id, status) = parse_channel_status(data)?;
        Ok(Self { channel_id, status })
    }

    /// Check if the connection is still alive
    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// Build the complete frame (gateway side)
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        FrameBuilder::new(ServiceType::ConnectionstateResponse, &[self.channel_id, self.status])
            .build(buf)
    }

    pub fn to_frame(&self) -> Result<FrameBuf> {
        frame_buf(|buf| self.build(buf))
    }
}

/// `DISCONNECT_REQUEST` service (0x0209)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectRequest {
    pub channel_id: u8,
    pub control_endpoint: Hpai,
}

impl DisconnectRequest {
    pub const fn new(channel_id: u8, control_endpoint: Hpai) -> Self {
        Self {
            channel_id,
            control_endpoint,
        }
    }

    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        build_with(ServiceType::DisconnectRequest, buf, |body| {
            encode_channel_hpai(body, self.channel_id, 0x00, &self.control_endpoint)
        })
    }

    pub fn to_frame(&self) -> Result<FrameBuf> {
        frame_buf(|buf| self.build(buf))
    }

    /// Parse a gateway-initiated disconnect.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (channel_id, _reserved) = parse_channel_status(data)?;
        let control_endpoint = Hpai::parse(&data[2..])?;
        Ok(Self {
            channel_id,
            control_endpoint,
        })
    }
}

/// `DISCONNECT_RESPONSE` service (0x020A)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectResponse {
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
}

impl DisconnectResponse {
    pub const fn new(channel_id: u8, status: u8) -> Self {
        Self { channel_id, status }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let (channel_id, status) = parse_channel_status(data)?;
        Ok(Self { channel_id, status })
    }

    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        FrameBuilder::new(ServiceType::DisconnectResponse, &[self.channel_id, self.status])
            .build(buf)
    }

    pub fn to_frame(&self) -> Result<FrameBuf> {
        frame_buf(|buf| self.build(buf))
    }
}

/// Connection header of tunneling requests and acks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHeader {
    pub channel_id: u8,
    pub sequence_counter: u8,
}

impl ConnectionHeader {
    pub const SIZE: usize = 4;

    pub const fn new(channel_id: u8, sequence_counter: u8) -> Self {
        Self {
            channel_id,
            sequence_counter,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let out = buf
            .get_mut(..Self::SIZE)
            .ok_or_else(KnxError::payload_too_large)?;
        out.copy_from_slice(&[Self::SIZE as u8, self.channel_id, self.sequence_counter, 0x00]);
        Ok(Self::SIZE)
    }

    /// Decode from bytes; the structure length byte must be 4.
    pub fn decode(data: &[u8]) -> Result<Self> {
        match data.first_chunk::<4>() {
            Some(&[4, channel_id, sequence_counter, _]) => Ok(Self {
                channel_id,
                sequence_counter,
            }),
            _ => Err(KnxError::malformed_frame()),
        }
    }
}

/// `TUNNELING_REQUEST` service (0x0420)
#[derive(Debug)]
pub struct TunnelingRequest<'a> {
    pub connection_header: ConnectionHeader,
    /// cEMI frame data
    pub cemi_data: &'a [u8],
}

impl<'a> TunnelingRequest<'a> {
    pub const fn new(connection_header: ConnectionHeader, cemi_data: &'a [u8]) -> Self {
        Self {
            connection_header,
            cemi_data,
        }
    }

    /// Build the complete frame (gateway side)
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let body_len = ConnectionHeader::SIZE + self.cemi_data.len();
        let total = KnxnetIpHeader::SIZE + body_len;
        if buf.len() < total {
            return Err(KnxError::payload_too_large());
        }
        let header = KnxnetIpHeader::new(ServiceType::TunnelingRequest, body_len as u16);
        let mut offset = header.encode(buf)?;
        offset += self.connection_header.encode(&mut buf[offset..])?;
        buf[offset..total].copy_from_slice(self.cemi_data);
        Ok(total)
    }

    pub fn to_frame(&self) -> Result<FrameBuf> {
        frame_buf(|buf| self.build(buf))
    }

    /// Parse from frame body
    ///
    /// # Errors
    ///
    /// `MalformedFrame` if the body is shorter than the connection header or
    /// its length byte is not 4. The cEMI part is not validated here.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let connection_header = ConnectionHeader::decode(data)?;
        Ok(Self {
            connection_header,
            cemi_data: &data[ConnectionHeader::SIZE..],
        })
    }
}

/// `TUNNELING_ACK` service (0x0421)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelingAck {
    pub connection_header: ConnectionHeader,
    /// Status code (0 = OK)
    pub status: u8,
}

impl TunnelingAck {
    /// Frame size on the wire
    pub const SIZE: usize = KnxnetIpHeader::SIZE + ConnectionHeader::SIZE + 1;

    pub const fn new(connection_header: ConnectionHeader, status: u8) -> Self {
        Self {
            connection_header,
            status,
        }
    }

    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        build_with(ServiceType::TunnelingAck, buf, |body| {
            let offset = self.connection_header.encode(body)?;
            body[offset] = self.status;
            Ok(offset + 1)
        })
    }

    pub fn to_frame(&self) -> Result<FrameBuf> {
        frame_buf(|buf| self.build(buf))
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let connection_header = ConnectionHeader::decode(data)?;
        let status = *data
            .get(ConnectionHeader::SIZE)
            .ok_or_else(KnxError::malformed_frame)?;
        Ok(Self {
            connection_header,
            status,
        })
    }

    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::protocol::frame::KnxnetIpFrame;

    #[test]
    fn test_connect_request_layout() {
        let control = Hpai::new([192, 168, 1, 100], 50000);
        let request = ConnectRequest::new(control, control);

        let frame = request.to_frame().unwrap();
        assert_eq!(frame.len(), ConnectRequest::SIZE);
        assert_eq!(
            frame.as_slice(),
            &[
                0x06, 0x10, 0x02, 0x05, 0x00, 0x1A, // header, 26 bytes
                0x08, 0x01, 192, 168, 1, 100, 0xC3, 0x50, // control HPAI
                0x08, 0x01, 192, 168, 1, 100, 0xC3, 0x50, // data HPAI
                0x04, 0x04, 0x02, 0x00, // CRI
            ]
        );
    }

    #[test]
    fn test_connect_response_roundtrip() {
        let response = ConnectResponse {
            channel_id: 0x15,
            status: 0,
            data_endpoint: Hpai::new([192, 168, 1, 10], 3671),
            crd: Some([0x04, 0x04, 0x11, 0xFF]),
        };
        let frame = response.to_frame().unwrap();
        let parsed = KnxnetIpFrame::parse(&frame).unwrap();
        assert_eq!(parsed.service_type(), ServiceType::ConnectResponse);

        let decoded = ConnectResponse::parse(parsed.body()).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.assigned_address().unwrap().to_string(), "1.1.255");
    }

    #[test]
    fn test_connect_response_without_crd() {
        let body = [0x07, 0x00, 0x08, 0x01, 10, 0, 0, 1, 0x0E, 0x57];
        let response = ConnectResponse::parse(&body).unwrap();
        assert_eq!(response.channel_id, 7);
        assert_eq!(response.crd, None);
        assert_eq!(response.assigned_address(), None);
    }

    #[test]
    fn test_connect_response_rejected() {
        // A refusal may carry only channel and status
        let err = ConnectResponse::parse(&[0x00, 0x24]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConnectRejected(0x24));
    }

    #[test]
    fn test_connect_response_truncated() {
        let err = ConnectResponse::parse(&[0x01, 0x00, 0x08, 0x01, 10]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedFrame);
        assert!(ConnectResponse::parse(&[0x01]).is_err());
    }

    #[test]
    fn test_connection_state_request_layout() {
        let frame = ConnectionStateRequest::new(0x15, Hpai::NAT).to_frame().unwrap();
        assert_eq!(
            frame.as_slice(),
            &[0x06, 0x10, 0x02, 0x07, 0x00, 0x10, 0x15, 0x00, 0x08, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_disconnect_request_parse() {
        let request = DisconnectRequest::new(0x2A, Hpai::new([192, 168, 1, 10], 3671));
        let frame = request.to_frame().unwrap();
        let parsed = KnxnetIpFrame::parse(&frame).unwrap();
        assert_eq!(DisconnectRequest::parse(parsed.body()).unwrap(), request);
        assert!(DisconnectRequest::parse(&[0x2A, 0x00]).is_err());
    }

    #[test]
    fn test_disconnect_response() {
        let frame = DisconnectResponse::new(0x2A, 0).to_frame().unwrap();
        assert_eq!(frame.as_slice(), &[0x06, 0x10, 0x02, 0x0A, 0x00, 0x08, 0x2A, 0x00]);
        let parsed = DisconnectResponse::parse(&frame[6..]).unwrap();
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_tunneling_ack_layout() {
        let ack = TunnelingAck::new(ConnectionHeader::new(3, 15), 0);
        let frame = ack.to_frame().unwrap();
        assert_eq!(frame.len(), TunnelingAck::SIZE);
        assert_eq!(
            frame.as_slice(),
            &[0x06, 0x10, 0x04, 0x21, 0x00, 0x0B, 0x04, 0x03, 0x0F, 0x00, 0x00]
        );
        assert_eq!(TunnelingAck::parse(&frame[6..]).unwrap(), ack);
    }

    #[test]
    fn test_tunneling_request_parse() {
        let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x01, 0x00, 0x81];
        let frame = TunnelingRequest::new(ConnectionHeader::new(1, 7), &cemi)
            .to_frame()
            .unwrap();
        let parsed = KnxnetIpFrame::parse(&frame).unwrap();
        let request = TunnelingRequest::parse(parsed.body()).unwrap();
        assert_eq!(request.connection_header, ConnectionHeader::new(1, 7));
        assert_eq!(request.cemi_data, &cemi);
    }

    #[test]
    fn test_tunneling_request_malformed() {
        assert!(TunnelingRequest::parse(&[0x04, 0x01, 0x00]).is_err());
        let err = TunnelingRequest::parse(&[0x05, 0x01, 0x00, 0x00, 0x29]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedFrame);
    }
}
