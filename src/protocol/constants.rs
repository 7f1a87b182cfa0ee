//! KNXnet/IP protocol constants and service type identifiers.

/// KNXnet/IP protocol version 1.0
pub const KNXNETIP_VERSION_10: u8 = 0x10;

/// Standard KNXnet/IP header length (6 bytes)
pub const HEADER_SIZE_10: u8 = 0x06;

/// Standard UDP port for KNXnet/IP communication
pub const KNXNETIP_DEFAULT_PORT: u16 = 3671;

/// Maximum size of an outbound KNXnet/IP frame built by this crate
pub const MAX_FRAME_SIZE: usize = 256;

/// Largest inbound TUNNELING_REQUEST: header, connection header, cEMI
/// message code and additional info (up to 255 bytes), `L_Data` fields and
/// a full NPDU (up to 255 bytes after the TPCI)
pub const MAX_DATAGRAM_SIZE: usize = 6 + 4 + 2 + 255 + 8 + 255;

/// Maximum size of a telegram payload: the NPDU length byte also counts the APCI
pub const MAX_PAYLOAD_SIZE: usize = 254;

// =============================================================================
// Service Type Identifiers
// =============================================================================

/// Tunneling service types understood by the client.
///
/// Anything else on the wire is reported as an unsupported service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
#[repr(u16)]
pub enum ServiceType {
    /// `CONNECT_REQUEST` - Open a tunneling channel
    ConnectRequest = 0x0205,
    /// `CONNECT_RESPONSE` - Channel id and status
    ConnectResponse = 0x0206,
    /// `CONNECTIONSTATE_REQUEST` - Heartbeat
    ConnectionstateRequest = 0x0207,
    /// `CONNECTIONSTATE_RESPONSE` - Heartbeat reply
    ConnectionstateResponse = 0x0208,
    /// `DISCONNECT_REQUEST` - Close the channel (either side)
    DisconnectRequest = 0x0209,
    /// `DISCONNECT_RESPONSE` - Channel closed
    DisconnectResponse = 0x020A,
    /// `TUNNELING_REQUEST` - cEMI frame from the bus
    TunnelingRequest = 0x0420,
    /// `TUNNELING_ACK` - Receipt of a tunneling request
    TunnelingAck = 0x0421,
}

impl ServiceType {
    /// Convert a u16 to `ServiceType`
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0205 => Some(Self::ConnectRequest),
            0x0206 => Some(Self::ConnectResponse),
            0x0207 => Some(Self::ConnectionstateRequest),
            0x0208 => Some(Self::ConnectionstateResponse),
            0x0209 => Some(Self::DisconnectRequest),
            0x020A => Some(Self::DisconnectResponse),
            0x0420 => Some(Self::TunnelingRequest),
            0x0421 => Some(Self::TunnelingAck),
            _ => None,
        }
    }

    /// Convert `ServiceType` to u16
    pub const fn to_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Connection Request Information
// =============================================================================

/// Connection type for `TUNNEL_CONNECTION`
pub const TUNNEL_CONNECTION: u8 = 0x04;

/// Tunneling on the data link layer
pub const TUNNEL_LINKLAYER: u8 = 0x02;

// =============================================================================
// Host Protocol Codes
// =============================================================================

/// IPv4 UDP protocol
pub const IPV4_UDP: u8 = 0x01;

// =============================================================================
// Status Codes
// =============================================================================

/// Successful operation
pub const E_NO_ERROR: u8 = 0x00;

/// Gateway does not know the channel id
pub const E_CONNECTION_ID: u8 = 0x21;

/// Connection type not supported
pub const E_CONNECTION_TYPE: u8 = 0x22;

/// Connection option not supported
pub const E_CONNECTION_OPTION: u8 = 0x23;

/// No more connections available
pub const E_NO_MORE_CONNECTIONS: u8 = 0x24;

/// Data connection error
pub const E_DATA_CONNECTION: u8 = 0x26;

/// KNX subnetwork connection error
pub const E_KNX_CONNECTION: u8 = 0x27;

// =============================================================================
// cEMI
// =============================================================================

/// `L_Data.ind` - telegram received from the bus
pub const CEMI_L_DATA_IND: u8 = 0x29;

/// Application layer services recognised by the decoder (10-bit APCI).
pub const APCI_GROUP_VALUE_READ: u16 = 0x000;
pub const APCI_GROUP_VALUE_RESPONSE: u16 = 0x040;
pub const APCI_GROUP_VALUE_WRITE: u16 = 0x080;
