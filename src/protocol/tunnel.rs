//! KNXnet/IP tunneling state machine.
//!
//! [`TunnelClient`] is sans-IO: it consumes frame bodies, produces outbound
//! frames and tracks the connection state. It never touches a socket or a
//! clock on its own; the session task behind
//! [`BusListener`](crate::listener::BusListener) feeds it datagrams and timer
//! expiries.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Connecting → Connected ⇄ Heartbeating → Disconnecting → Closed
//!            ↓                        ↓
//!          Closed → Retrying → Connecting
//! ```
//!
//! The channel session only exists in `Connected` and `Heartbeating`: it is
//! carried by those variants of [`TunnelState`] and nowhere else.
//!
//! ## Example
//!
//! ```rust
//! use knx_listener::net::{IpEndpoint, Ipv4Addr};
//! use knx_listener::protocol::frame::Hpai;
//! use knx_listener::protocol::tunnel::{ConnectionState, TunnelClient};
//!
//! let gateway = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);
//! let mut client = TunnelClient::new(gateway, Hpai::NAT);
//!
//! let request = client.connect().unwrap();
//! assert_eq!(request.len(), 26);
//! assert_eq!(client.state(), ConnectionState::Connecting);
//!
//! // CONNECT_RESPONSE body: channel 0x15, status OK, data endpoint
//! let body = [0x15, 0x00, 0x08, 0x01, 192, 168, 1, 10, 0x0E, 0x57];
//! assert_eq!(client.handle_connect_response(&body).unwrap(), 0x15);
//! assert_eq!(client.state(), ConnectionState::Connected);
//! ```

use core::fmt;
use std::time::Instant;

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::knx_log;
use crate::net::IpEndpoint;
use crate::protocol::cemi::Telegram;
use crate::protocol::constants::E_NO_ERROR;
use crate::protocol::frame::{FrameBuf, Hpai};
use crate::protocol::services::{
    ConnectRequest, ConnectResponse, ConnectionHeader, ConnectionStateRequest,
    ConnectionStateResponse, DisconnectRequest, DisconnectResponse, TunnelingAck,
    TunnelingRequest,
};

// =============================================================================
// Session and state
// =============================================================================

/// An established tunneling channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSession {
    /// Communication channel ID assigned by the gateway
    pub channel_id: u8,
    /// Next expected inbound sequence number (wraps at 256)
    pub sequence_counter: u8,
    /// When the gateway last confirmed the channel
    pub last_heartbeat_ack: Option<Instant>,
    /// Individual address the gateway assigned to the tunnel, if reported
    pub assigned_address: Option<IndividualAddress>,
}

impl ChannelSession {
    const fn new(channel_id: u8, assigned_address: Option<IndividualAddress>) -> Self {
        Self {
            channel_id,
            sequence_counter: 0,
            last_heartbeat_ack: None,
            assigned_address,
        }
    }
}

/// Tunnel state, carrying exactly the data valid in that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    /// CONNECT_REQUEST sent
    Connecting,
    Connected(ChannelSession),
    /// CONNECTIONSTATE_REQUEST sent, session still usable
    Heartbeating(ChannelSession),
    /// Waiting for the retry delay to pass
    Retrying,
    /// DISCONNECT_REQUEST sent for this channel
    Disconnecting { channel_id: u8 },
    Closed,
}

/// Copyable view of [`TunnelState`] without the session data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Heartbeating,
    Retrying,
    Disconnecting,
    Closed,
}

impl ConnectionState {
    /// Connected or Heartbeating
    pub const fn has_session(self) -> bool {
        matches!(self, Self::Connected | Self::Heartbeating)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Heartbeating => "heartbeating",
            Self::Retrying => "retrying",
            Self::Disconnecting => "disconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl From<&TunnelState> for ConnectionState {
    fn from(state: &TunnelState) -> Self {
        match state {
            TunnelState::Idle => Self::Idle,
            TunnelState::Connecting => Self::Connecting,
            TunnelState::Connected(_) => Self::Connected,
            TunnelState::Heartbeating(_) => Self::Heartbeating,
            TunnelState::Retrying => Self::Retrying,
            TunnelState::Disconnecting { .. } => Self::Disconnecting,
            TunnelState::Closed => Self::Closed,
        }
    }
}

// =============================================================================
// Tunneling indications
// =============================================================================

/// How an inbound sequence number relates to the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The expected sequence number
    Fresh,
    /// Repeat of the previous request (our ack was lost); not delivered again
    Duplicate,
    /// Any other number; delivered and the counter resynchronised
    OutOfSequence { expected: u8, received: u8 },
}

/// Result of a TUNNELING_REQUEST for our channel.
///
/// `ack` must be sent before anything else is done with the request.
#[derive(Debug)]
pub struct Indication {
    pub ack: FrameBuf,
    pub delivery: Delivery,
    /// Decoded cEMI; a broken cEMI still gets acked
    pub telegram: Result<Telegram>,
}

impl Indication {
    /// Whether the telegram should reach listeners
    pub fn is_deliverable(&self) -> bool {
        !matches!(self.delivery, Delivery::Duplicate)
    }

    /// Sequence anomaly, if any
    pub fn anomaly(&self) -> Option<KnxError> {
        match self.delivery {
            Delivery::OutOfSequence { expected, received } => {
                Some(KnxError::sequence_mismatch(expected, received))
            }
            _ => None,
        }
    }
}

// =============================================================================
// Tunnel client
// =============================================================================

/// Sans-IO tunneling client for one gateway.
#[derive(Debug)]
pub struct TunnelClient {
    gateway: IpEndpoint,
    /// Announced as both control and data endpoint
    local: Hpai,
    state: TunnelState,
}

impl TunnelClient {
    /// Create an idle client. Pass [`Hpai::NAT`] to let the gateway answer
    /// to the datagram source address.
    pub const fn new(gateway: IpEndpoint, local: Hpai) -> Self {
        Self {
            gateway,
            local,
            state: TunnelState::Idle,
        }
    }

    #[inline]
    pub const fn gateway(&self) -> IpEndpoint {
        self.gateway
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(&self.state)
    }

    #[inline]
    pub const fn tunnel_state(&self) -> &TunnelState {
        &self.state
    }

    /// The channel session, present only while Connected or Heartbeating
    pub const fn session(&self) -> Option<&ChannelSession> {
        match &self.state {
            TunnelState::Connected(session) | TunnelState::Heartbeating(session) => Some(session),
            _ => None,
        }
    }

    fn session_mut(&mut self) -> Option<&mut ChannelSession> {
        match &mut self.state {
            TunnelState::Connected(session) | TunnelState::Heartbeating(session) => Some(session),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Handshake
    // -------------------------------------------------------------------------

    /// Start a handshake (Idle / Retrying / Closed → Connecting).
    ///
    /// Returns the CONNECT_REQUEST to send.
    pub fn connect(&mut self) -> Result<FrameBuf> {
        match self.state {
            TunnelState::Idle | TunnelState::Retrying | TunnelState::Closed => {}
            _ => return Err(KnxError::InvalidState),
        }
        let frame = ConnectRequest::new(self.local, self.local).to_frame()?;
        self.state = TunnelState::Connecting;
        knx_log!(debug, "Connecting to {}", self.gateway);
        Ok(frame)
    }

    /// Handle a CONNECT_RESPONSE body (Connecting → Connected).
    ///
    /// Returns the assigned channel id. A refusal moves the client to Closed;
    /// an undecodable response leaves it waiting.
    pub fn handle_connect_response(&mut self, body: &[u8]) -> Result<u8> {
        if self.state != TunnelState::Connecting {
            return Err(KnxError::InvalidState);
        }

        let response = match ConnectResponse::parse(body) {
            Ok(response) => response,
            Err(e) => {
                if e.code().is_connection_level() {
                    self.state = TunnelState::Closed;
                }
                return Err(e);
            }
        };

        let session = ChannelSession::new(response.channel_id, response.assigned_address());
        knx_log!(
            info,
            "Tunnel open on channel {}, assigned address {:?}",
            response.channel_id,
            session.assigned_address
        );
        self.state = TunnelState::Connected(session);
        Ok(response.channel_id)
    }

    /// No CONNECT_RESPONSE arrived in time (Connecting → Closed).
    pub fn handshake_timed_out(&mut self) -> KnxError {
        if self.state == TunnelState::Connecting {
            self.state = TunnelState::Closed;
        }
        KnxError::handshake_timeout()
    }

    /// Schedule another handshake after a failure (Closed → Retrying).
    pub fn retry(&mut self) -> Result<()> {
        if self.state != TunnelState::Closed {
            return Err(KnxError::InvalidState);
        }
        self.state = TunnelState::Retrying;
        Ok(())
    }

    /// Drop any session and stop (→ Closed). Idempotent.
    pub fn close(&mut self) {
        self.state = TunnelState::Closed;
    }

    // -------------------------------------------------------------------------
    // Heartbeat
    // -------------------------------------------------------------------------

    /// Build the CONNECTIONSTATE_REQUEST (Connected → Heartbeating).
    pub fn heartbeat(&mut self) -> Result<FrameBuf> {
        let TunnelState::Connected(session) = self.state else {
            return Err(KnxError::not_connected());
        };
        let frame = ConnectionStateRequest::new(session.channel_id, self.local).to_frame()?;
        self.state = TunnelState::Heartbeating(session);
        Ok(frame)
    }

    /// Handle a CONNECTIONSTATE_RESPONSE body (Heartbeating → Connected).
    ///
    /// A non-zero status closes the tunnel and is returned as
    /// `ConnectionStateRejected`.
    pub fn handle_connection_state_response(&mut self, body: &[u8], now: Instant) -> Result<()> {
        let TunnelState::Heartbeating(mut session) = self.state else {
            return Err(KnxError::InvalidState);
        };
        let response = ConnectionStateResponse::parse(body)?;
        if response.channel_id != session.channel_id {
            return Err(KnxError::channel_mismatch());
        }
        if !response.is_ok() {
            knx_log!(warn, "Gateway reports channel {} dead (status {:#04x})", session.channel_id, response.status);
            self.state = TunnelState::Closed;
            return Err(KnxError::connection_state_rejected(response.status));
        }

        session.last_heartbeat_ack = Some(now);
        self.state = TunnelState::Connected(session);
        Ok(())
    }

    /// No CONNECTIONSTATE_RESPONSE in time (Heartbeating → Closed).
    pub fn heartbeat_timed_out(&mut self) -> KnxError {
        if matches!(self.state, TunnelState::Heartbeating(_)) {
            self.state = TunnelState::Closed;
        }
        KnxError::heartbeat_timeout()
    }

    // -------------------------------------------------------------------------
    // Tunneling
    // -------------------------------------------------------------------------

    /// Handle a TUNNELING_REQUEST body.
    ///
    /// # Errors
    ///
    /// - `NotConnected` without a session
    /// - `MalformedFrame` if the connection header is broken (nothing to ack)
    /// - `ChannelMismatch` for another channel (not acked)
    pub fn handle_tunneling_request(&mut self, body: &[u8]) -> Result<Indication> {
        let session = self.session_mut().ok_or_else(KnxError::not_connected)?;
        let request = TunnelingRequest::parse(body)?;
        let ConnectionHeader {
            channel_id,
            sequence_counter: received,
        } = request.connection_header;

        if channel_id != session.channel_id {
            knx_log!(debug, "Dropping tunneling request for channel {}", channel_id);
            return Err(KnxError::channel_mismatch());
        }

        let expected = session.sequence_counter;
        let delivery = if received == expected {
            session.sequence_counter = received.wrapping_add(1);
            Delivery::Fresh
        } else if received == expected.wrapping_sub(1) {
            Delivery::Duplicate
        } else {
            knx_log!(warn, "Sequence mismatch: expected {}, received {}", expected, received);
            session.sequence_counter = received.wrapping_add(1);
            Delivery::OutOfSequence { expected, received }
        };

        let ack = TunnelingAck::new(ConnectionHeader::new(channel_id, received), E_NO_ERROR)
            .to_frame()?;

        Ok(Indication {
            ack,
            delivery,
            telegram: Telegram::decode(request.cemi_data),
        })
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Begin an orderly disconnect.
    ///
    /// With a session this returns the DISCONNECT_REQUEST and moves to
    /// Disconnecting. Without one there is nothing to tell the gateway and the
    /// client closes right away.
    pub fn disconnect(&mut self) -> Option<FrameBuf> {
        let Some(channel_id) = self.session().map(|s| s.channel_id) else {
            self.state = TunnelState::Closed;
            return None;
        };
        match DisconnectRequest::new(channel_id, self.local).to_frame() {
            Ok(frame) => {
                self.state = TunnelState::Disconnecting { channel_id };
                Some(frame)
            }
            Err(_) => {
                self.state = TunnelState::Closed;
                None
            }
        }
    }

    /// Handle a DISCONNECT_RESPONSE body (Disconnecting → Closed).
    pub fn handle_disconnect_response(&mut self, body: &[u8]) -> Result<()> {
        let TunnelState::Disconnecting { channel_id } = self.state else {
            return Err(KnxError::InvalidState);
        };
        let response = DisconnectResponse::parse(body)?;
        if response.channel_id != channel_id {
            return Err(KnxError::channel_mismatch());
        }
        self.state = TunnelState::Closed;
        Ok(())
    }

    /// Handle a gateway-initiated DISCONNECT_REQUEST.
    ///
    /// Returns the DISCONNECT_RESPONSE to send; the client is Closed afterwards.
    pub fn handle_disconnect_request(&mut self, body: &[u8]) -> Result<FrameBuf> {
        let request = DisconnectRequest::parse(body)?;
        let ours = match self.state {
            TunnelState::Connected(session) | TunnelState::Heartbeating(session) => {
                session.channel_id
            }
            TunnelState::Disconnecting { channel_id } => channel_id,
            _ => return Err(KnxError::not_connected()),
        };
        if request.channel_id != ours {
            return Err(KnxError::channel_mismatch());
        }

        knx_log!(info, "Gateway closed channel {}", ours);
        self.state = TunnelState::Closed;
        DisconnectResponse::new(ours, E_NO_ERROR).to_frame()
    }
}
