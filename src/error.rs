//! Error types for KNXnet/IP tunneling following M-ERRORS-CANONICAL-STRUCTS guideline.
//!
//! Every failure is a [`KnxError`] carrying one category struct. The kinds
//! inside each category are crate-private; callers inspect errors through the
//! `is_*` helpers or through [`KnxError::code`], which flattens any error into
//! a stable, copyable [`ErrorCode`].

use core::fmt;

#[cfg(feature = "std")]
use std::backtrace::Backtrace;

/// Result type alias for KNX operations.
pub type Result<T> = core::result::Result<T, KnxError>;

// =============================================================================
// Error Kind Enums (Internal)
// =============================================================================

/// Protocol error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub(crate) enum ProtocolErrorKind {
    MalformedHeader,
    MalformedFrame,
    UnsupportedServiceType,
    PayloadTooLarge,
}

/// Connection error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub(crate) enum ConnectionErrorKind {
    Rejected(u8),
    StateRejected(u8),
    HandshakeTimeout,
    HeartbeatTimeout,
    GatewayDisconnected,
    ChannelMismatch,
    NotConnected,
    AlreadyBound,
}

/// Tunneling error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub(crate) enum TunnelingErrorKind {
    SequenceMismatch { expected: u8, received: u8 },
}

/// Transport error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub(crate) enum TransportErrorKind {
    SendFailed,
    ReceiveFailed,
    SocketError,
    Closed,
}

/// Addressing error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub(crate) enum AddressingErrorKind {
    InvalidIpv4,
    InvalidPort,
    InvalidGroupAddress,
    InvalidIndividualAddress,
    OutOfRange,
}

// =============================================================================
// Public error code
// =============================================================================

/// Flat, copyable identification of a [`KnxError`].
///
/// This is what gets handed to event subscribers and printed by the command
/// line tool (`HANDSHAKE_TIMEOUT`, `CONNECT_REJECTED(0x24)`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub enum ErrorCode {
    MalformedHeader,
    MalformedFrame,
    UnsupportedServiceType,
    PayloadTooLarge,
    /// The gateway refused the CONNECT_REQUEST with this status
    ConnectRejected(u8),
    /// The gateway answered a heartbeat with this non-zero status
    ConnectionStateRejected(u8),
    HandshakeTimeout,
    HeartbeatTimeout,
    GatewayDisconnected,
    ChannelMismatch,
    NotConnected,
    AlreadyBound,
    SequenceMismatch,
    Transport,
    InvalidAddress,
    InvalidPort,
    InvalidState,
}

impl ErrorCode {
    /// Whether this code ends a tunneling session.
    pub const fn is_connection_level(self) -> bool {
        matches!(
            self,
            Self::ConnectRejected(_)
                | Self::ConnectionStateRejected(_)
                | Self::HandshakeTimeout
                | Self::HeartbeatTimeout
                | Self::GatewayDisconnected
                | Self::Transport
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader => f.write_str("MALFORMED_HEADER"),
            Self::MalformedFrame => f.write_str("MALFORMED_FRAME"),
            Self::UnsupportedServiceType => f.write_str("UNSUPPORTED_SERVICE_TYPE"),
            Self::PayloadTooLarge => f.write_str("PAYLOAD_TOO_LARGE"),
            Self::ConnectRejected(status) => write!(f, "CONNECT_REJECTED(0x{status:02X})"),
            Self::ConnectionStateRejected(status) => {
                write!(f, "CONNECTIONSTATE_REJECTED(0x{status:02X})")
            }
            Self::HandshakeTimeout => f.write_str("HANDSHAKE_TIMEOUT"),
            Self::HeartbeatTimeout => f.write_str("HEARTBEAT_TIMEOUT"),
            Self::GatewayDisconnected => f.write_str("GATEWAY_DISCONNECTED"),
            Self::ChannelMismatch => f.write_str("CHANNEL_MISMATCH"),
            Self::NotConnected => f.write_str("NOT_CONNECTED"),
            Self::AlreadyBound => f.write_str("ALREADY_BOUND"),
            Self::SequenceMismatch => f.write_str("SEQUENCE_MISMATCH"),
            Self::Transport => f.write_str("TRANSPORT_ERROR"),
            Self::InvalidAddress => f.write_str("INVALID_ADDRESS"),
            Self::InvalidPort => f.write_str("INVALID_PORT"),
            Self::InvalidState => f.write_str("INVALID_STATE"),
        }
    }
}

// =============================================================================
// Main Error Type
// =============================================================================

/// KNX error type.
///
/// This is the main error type returned by all operations of this crate.
/// It contains a backtrace (when std feature is enabled) and detailed
/// error information through helper methods.
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub enum KnxError {
    /// Frame decoding and encoding errors
    Protocol(ProtocolError),
    /// Session level failures (handshake, heartbeat, misuse)
    Connection(ConnectionError),
    /// Tunneling anomalies (sequence counter)
    Tunneling(TunnelingError),
    /// Socket errors
    Transport(TransportError),
    /// Address and port validation errors
    Addressing(AddressingError),
    /// Operation not valid in the current connection state
    InvalidState,
}

// =============================================================================
// Structured Error Types
// =============================================================================

/// Protocol error with optional backtrace
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl ProtocolError {
    pub(crate) fn new(kind: ProtocolErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Where the error was raised, if `RUST_BACKTRACE` enabled capturing
    #[cfg(feature = "std")]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Check if the KNXnet/IP header was rejected
    pub fn is_malformed_header(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::MalformedHeader)
    }

    /// Check if a service body or cEMI frame was rejected
    pub fn is_malformed_frame(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::MalformedFrame)
    }

    /// Check if the service type identifier is not handled by this client
    pub fn is_unsupported_service(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::UnsupportedServiceType)
    }
}

/// Connection error with optional backtrace
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct ConnectionError {
    kind: ConnectionErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl ConnectionError {
    pub(crate) fn new(kind: ConnectionErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Where the error was raised, if `RUST_BACKTRACE` enabled capturing
    #[cfg(feature = "std")]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Check if this is a handshake or heartbeat timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            ConnectionErrorKind::HandshakeTimeout | ConnectionErrorKind::HeartbeatTimeout
        )
    }

    /// Status byte of a refused connect or heartbeat, if this is a refusal
    pub fn rejection_status(&self) -> Option<u8> {
        match self.kind {
            ConnectionErrorKind::Rejected(status) | ConnectionErrorKind::StateRejected(status) => {
                Some(status)
            }
            _ => None,
        }
    }

    /// Check if the session ended (heartbeat failure or gateway disconnect)
    pub fn is_lost(&self) -> bool {
        matches!(
            self.kind,
            ConnectionErrorKind::HeartbeatTimeout
                | ConnectionErrorKind::StateRejected(_)
                | ConnectionErrorKind::GatewayDisconnected
        )
    }
}

/// Tunneling error with optional backtrace
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct TunnelingError {
    kind: TunnelingErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl TunnelingError {
    pub(crate) fn new(kind: TunnelingErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Where the error was raised, if `RUST_BACKTRACE` enabled capturing
    #[cfg(feature = "std")]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Check if this is a sequence mismatch error
    pub fn is_sequence_mismatch(&self) -> bool {
        matches!(self.kind, TunnelingErrorKind::SequenceMismatch { .. })
    }
}

/// Transport error with optional backtrace
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct TransportError {
    kind: TransportErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl TransportError {
    pub(crate) fn new(kind: TransportErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Where the error was raised, if `RUST_BACKTRACE` enabled capturing
    #[cfg(feature = "std")]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Check if the transport was closed underneath the caller
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, TransportErrorKind::Closed)
    }

    /// Check if this is a socket error
    pub fn is_socket_error(&self) -> bool {
        matches!(self.kind, TransportErrorKind::SocketError)
    }
}

/// Addressing error with optional backtrace
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct AddressingError {
    kind: AddressingErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl AddressingError {
    pub(crate) fn new(kind: AddressingErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Where the error was raised, if `RUST_BACKTRACE` enabled capturing
    #[cfg(feature = "std")]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Check if address is out of range
    pub fn is_out_of_range(&self) -> bool {
        matches!(self.kind, AddressingErrorKind::OutOfRange)
    }

    /// Check if a port number was rejected
    pub fn is_invalid_port(&self) -> bool {
        matches!(self.kind, AddressingErrorKind::InvalidPort)
    }
}

// =============================================================================
// Convenience Constructors for KnxError
// =============================================================================

#[cfg_attr(
    not(feature = "std"),
    allow(dead_code, reason = "session errors are raised by the std-only tunnel")
)]
impl KnxError {
    // Protocol errors
    #[inline]
    pub(crate) fn malformed_header() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::MalformedHeader))
    }

    #[inline]
    pub(crate) fn malformed_frame() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::MalformedFrame))
    }

    #[inline]
    pub(crate) fn unsupported_service_type() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnsupportedServiceType))
    }

    #[inline]
    pub(crate) fn payload_too_large() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::PayloadTooLarge))
    }

    // Connection errors
    pub(crate) fn connect_rejected(status: u8) -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Rejected(status)))
    }

    pub(crate) fn connection_state_rejected(status: u8) -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::StateRejected(status)))
    }

    pub(crate) fn handshake_timeout() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::HandshakeTimeout))
    }

    pub(crate) fn heartbeat_timeout() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::HeartbeatTimeout))
    }

    pub(crate) fn gateway_disconnected() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::GatewayDisconnected))
    }

    pub(crate) fn channel_mismatch() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::ChannelMismatch))
    }

    pub(crate) fn not_connected() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::NotConnected))
    }

    pub(crate) fn already_bound() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::AlreadyBound))
    }

    // Tunneling errors
    pub(crate) fn sequence_mismatch(expected: u8, received: u8) -> Self {
        Self::Tunneling(TunnelingError::new(TunnelingErrorKind::SequenceMismatch {
            expected,
            received,
        }))
    }

    // Transport errors
    pub(crate) fn socket_error() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::SocketError))
    }

    pub(crate) fn send_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::SendFailed))
    }

    pub(crate) fn receive_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::ReceiveFailed))
    }

    pub(crate) fn transport_closed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::Closed))
    }

    // Addressing errors
    pub(crate) fn invalid_ipv4() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::InvalidIpv4))
    }

    pub(crate) fn invalid_port() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::InvalidPort))
    }

    pub(crate) fn invalid_group_address() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::InvalidGroupAddress))
    }

    pub(crate) fn invalid_individual_address() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::InvalidIndividualAddress))
    }

    pub(crate) fn address_out_of_range() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::OutOfRange))
    }

    /// Flatten this error into its [`ErrorCode`].
    pub fn code(&self) -> ErrorCode {
        match self {
            KnxError::Protocol(e) => match e.kind {
                ProtocolErrorKind::MalformedHeader => ErrorCode::MalformedHeader,
                ProtocolErrorKind::MalformedFrame => ErrorCode::MalformedFrame,
                ProtocolErrorKind::UnsupportedServiceType => ErrorCode::UnsupportedServiceType,
                ProtocolErrorKind::PayloadTooLarge => ErrorCode::PayloadTooLarge,
            },
            KnxError::Connection(e) => match e.kind {
                ConnectionErrorKind::Rejected(status) => ErrorCode::ConnectRejected(status),
                ConnectionErrorKind::StateRejected(status) => {
                    ErrorCode::ConnectionStateRejected(status)
                }
                ConnectionErrorKind::HandshakeTimeout => ErrorCode::HandshakeTimeout,
                ConnectionErrorKind::HeartbeatTimeout => ErrorCode::HeartbeatTimeout,
                ConnectionErrorKind::GatewayDisconnected => ErrorCode::GatewayDisconnected,
                ConnectionErrorKind::ChannelMismatch => ErrorCode::ChannelMismatch,
                ConnectionErrorKind::NotConnected => ErrorCode::NotConnected,
                ConnectionErrorKind::AlreadyBound => ErrorCode::AlreadyBound,
            },
            KnxError::Tunneling(e) => match e.kind {
                TunnelingErrorKind::SequenceMismatch { .. } => ErrorCode::SequenceMismatch,
            },
            KnxError::Transport(_) => ErrorCode::Transport,
            KnxError::Addressing(e) => match e.kind {
                AddressingErrorKind::InvalidPort => ErrorCode::InvalidPort,
                _ => ErrorCode::InvalidAddress,
            },
            KnxError::InvalidState => ErrorCode::InvalidState,
        }
    }

    /// Check if this is a KNXnet/IP header or frame decoding error
    pub fn is_decode_error(&self) -> bool {
        matches!(self, KnxError::Protocol(_))
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxError::Protocol(e) => write!(f, "Protocol error: {:?}", e.kind),
            KnxError::Connection(e) => write!(f, "Connection error: {:?}", e.kind),
            KnxError::Tunneling(e) => match e.kind {
                TunnelingErrorKind::SequenceMismatch { expected, received } => write!(
                    f,
                    "Tunneling error: sequence mismatch (expected {expected}, received {received})"
                ),
            },
            KnxError::Transport(e) => write!(f, "Transport error: {:?}", e.kind),
            KnxError::Addressing(e) => write!(f, "Addressing error: {:?}", e.kind),
            KnxError::InvalidState => write!(f, "Invalid state"),
        }
    }
}

// Implement std::error::Error for std-based applications
#[cfg(feature = "std")]
impl std::error::Error for KnxError {}
