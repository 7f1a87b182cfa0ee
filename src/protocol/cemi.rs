//! Common External Message Interface (cEMI) decoding.
//!
//! Tunneling requests carry one cEMI frame each. This module turns those
//! bytes into a [`Telegram`], and the read/write/response subset of
//! telegrams into the [`Query`] handed to listeners.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Message Code (1 byte)                    │
//! ├──────────────────────────────────────────┤
//! │ Additional Info Length (1 byte)          │
//! ├──────────────────────────────────────────┤
//! │ Additional Info (variable)               │
//! ├──────────────────────────────────────────┤
//! │ Service Information (L_Data)             │
//! │  ├─ Control Field 1 (1 byte)             │
//! │  ├─ Control Field 2 (1 byte)             │
//! │  ├─ Source Address (2 bytes)             │
//! │  ├─ Destination Address (2 bytes)        │
//! │  ├─ NPDU Length (1 byte)                 │
//! │  ├─ TPCI (1 byte)                        │
//! │  ├─ APCI (1 byte, if NPDU length ≥ 1)    │
//! │  └─ Data (NPDU length - 1 bytes)         │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use knx_listener::protocol::cemi::{Action, Query, Telegram};
//!
//! // L_Data.ind, 1.1.1 -> 1/2/3, GroupValueWrite 0x0C 0xFF
//! let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x03, 0x00, 0x80, 0x0C, 0xFF];
//! let telegram = Telegram::decode(&cemi).unwrap();
//! assert_eq!(telegram.action, Action::Write);
//!
//! let query = Query::from_telegram(&telegram).unwrap();
//! assert_eq!(query.to_string(), "write data 0c:ff to 1/2/3");
//! ```

use core::fmt;

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    APCI_GROUP_VALUE_READ, APCI_GROUP_VALUE_RESPONSE, APCI_GROUP_VALUE_WRITE, CEMI_L_DATA_IND,
    MAX_PAYLOAD_SIZE,
};

/// Telegram payload buffer
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_SIZE>;

/// Control Field 1 of `L_Data` frame
///
/// ```text
/// Bit 7: Frame Type (0=extended, 1=standard)
/// Bit 5: Repeat (0=repeated, 1=not repeated)
/// Bit 3-2: Priority (00=system, 01=normal, 10=urgent, 11=low)
/// Bit 0: Confirm (0=no error, 1=error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct ControlField1 {
    raw: u8,
}

impl From<u8> for ControlField1 {
    #[inline(always)]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl ControlField1 {
    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    #[inline(always)]
    pub const fn is_standard_frame(self) -> bool {
        (self.raw & 0x80) != 0
    }

    /// Whether the bus reported this frame as a repetition
    #[inline(always)]
    pub const fn is_repeated(self) -> bool {
        (self.raw & 0x20) == 0
    }

    /// Priority bits (0 = system .. 3 = low)
    #[inline(always)]
    pub const fn priority(self) -> u8 {
        (self.raw >> 2) & 0x03
    }
}

/// Control Field 2 of `L_Data` frame
///
/// ```text
/// Bit 7: Destination Address Type (0=individual, 1=group)
/// Bit 6-4: Hop Count (0-7)
/// Bit 3-0: Extended Frame Format (0000=standard)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct ControlField2 {
    raw: u8,
}

impl From<u8> for ControlField2 {
    #[inline(always)]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl ControlField2 {
    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    #[inline(always)]
    pub const fn is_group_address(self) -> bool {
        (self.raw & 0x80) != 0
    }

    #[inline(always)]
    pub const fn hop_count(self) -> u8 {
        (self.raw >> 4) & 0x07
    }
}

/// TPCI (Transport Layer Protocol Control Information)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub enum Tpci {
    UnnumberedData,
    NumberedData { sequence: u8 },
    UnnumberedControl,
    NumberedControl { sequence: u8 },
}

impl Tpci {
    /// Parse TPCI from the first byte of the TPDU
    pub const fn from_byte(byte: u8) -> Self {
        let sequence = (byte >> 2) & 0x0F;
        match byte >> 6 {
            0b00 => Self::UnnumberedData,
            0b01 => Self::NumberedData { sequence },
            0b10 => Self::UnnumberedControl,
            _ => Self::NumberedControl { sequence },
        }
    }

    /// Data TPDUs carry an APCI; control TPDUs do not
    pub const fn is_data(self) -> bool {
        matches!(self, Self::UnnumberedData | Self::NumberedData { .. })
    }
}

/// Application service of a telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Action {
    /// `A_GroupValue_Read`
    Read,
    /// `A_GroupValue_Write`
    Write,
    /// `A_GroupValue_Response`
    Response,
    /// Any other service, control TPDUs and non-`L_Data.ind` frames
    Unknown,
}

impl Action {
    /// Map a 10-bit APCI to an action.
    pub const fn from_apci(apci: u16) -> Self {
        match apci {
            APCI_GROUP_VALUE_READ => Self::Read,
            APCI_GROUP_VALUE_RESPONSE => Self::Response,
            APCI_GROUP_VALUE_WRITE => Self::Write,
            _ => Self::Unknown,
        }
    }

    /// APCI command bits of the action (0x00, 0x40, 0x80)
    pub const fn code(self) -> Option<u8> {
        match self {
            Self::Read => Some(APCI_GROUP_VALUE_READ as u8),
            Self::Response => Some(APCI_GROUP_VALUE_RESPONSE as u8),
            Self::Write => Some(APCI_GROUP_VALUE_WRITE as u8),
            Self::Unknown => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Response => "response",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of the destination address, from control field 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub enum DestinationKind {
    Group,
    Individual,
}

/// cEMI `L_Data` service information
#[derive(Debug, Clone)]
pub struct LDataFrame<'a> {
    pub ctrl1: ControlField1,
    pub ctrl2: ControlField2,
    pub source: IndividualAddress,
    pub destination_raw: u16,
    /// Length of the NPDU after the TPCI byte
    pub npdu_length: u8,
    pub tpci: Tpci,
    /// TPCI byte as received, its low bits are APCI bits 9-8
    pub tpci_raw: u8,
    /// APCI byte, absent for 1-byte TPDUs
    pub apci: Option<u8>,
    /// Bytes after the APCI byte
    pub data: &'a [u8],
}

impl<'a> LDataFrame<'a> {
    /// Control fields, addresses, NPDU length and TPCI
    pub const MIN_SIZE: usize = 8;

    /// Parse `L_Data` service information.
    ///
    /// The TPDU is `npdu_length + 1` bytes (TPCI included) and must fit in
    /// `data`, otherwise the frame is malformed. Trailing bytes are ignored.
    #[inline(always)]
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let Some(&[ctrl1, ctrl2, src_hi, src_lo, dst_hi, dst_lo, npdu_length, tpci]) =
            data.first_chunk::<8>()
        else {
            return Err(KnxError::malformed_frame());
        };

        let tpdu_end = Self::MIN_SIZE + usize::from(npdu_length);
        let tpdu_rest = data
            .get(Self::MIN_SIZE..tpdu_end)
            .ok_or_else(KnxError::malformed_frame)?;

        let (apci, data) = match tpdu_rest.split_first() {
            Some((apci, rest)) => (Some(*apci), rest),
            None => (None, tpdu_rest),
        };

        Ok(Self {
            ctrl1: ControlField1::from(ctrl1),
            ctrl2: ControlField2::from(ctrl2),
            source: IndividualAddress::from(u16::from_be_bytes([src_hi, src_lo])),
            destination_raw: u16::from_be_bytes([dst_hi, dst_lo]),
            npdu_length,
            tpci: Tpci::from_byte(tpci),
            tpci_raw: tpci,
            apci,
            data,
        })
    }

    /// Application service; control TPDUs are [`Action::Unknown`].
    pub fn action(&self) -> Action {
        match self.apci {
            Some(apci) if self.tpci.is_data() => {
                Action::from_apci((u16::from(self.tpci_raw & 0x03) << 8) | u16::from(apci & 0xC0))
            }
            _ => Action::Unknown,
        }
    }

    /// Telegram payload: the 6-bit value packed into the APCI byte for
    /// short frames (nothing for a read), else the bytes after the APCI.
    pub fn payload(&self, action: Action) -> Result<Payload> {
        let mut payload = Payload::new();
        match (self.apci, self.data) {
            (None, _) => {}
            (Some(_), []) if action == Action::Read => {}
            (Some(apci), []) => {
                payload
                    .push(apci & 0x3F)
                    .map_err(|_| KnxError::payload_too_large())?;
            }
            (Some(_), data) => {
                payload
                    .extend_from_slice(data)
                    .map_err(|_| KnxError::payload_too_large())?;
            }
        }
        Ok(payload)
    }

    pub fn destination_kind(&self) -> DestinationKind {
        if self.ctrl2.is_group_address() {
            DestinationKind::Group
        } else {
            DestinationKind::Individual
        }
    }

    /// Destination as group address (if applicable)
    pub fn destination_group(&self) -> Option<GroupAddress> {
        self.ctrl2
            .is_group_address()
            .then(|| GroupAddress::from(self.destination_raw))
    }
}

/// cEMI frame view
#[derive(Debug)]
pub struct CEMIFrame<'a> {
    pub message_code: u8,
    data: &'a [u8],
}

impl<'a> CEMIFrame<'a> {
    /// Message code + additional info length
    pub const MIN_SIZE: usize = 2;

    pub fn parse(data: &'a [u8]) -> Result<Self> {
        match data {
            [message_code, _, ..] => Ok(Self {
                message_code: *message_code,
                data,
            }),
            _ => Err(KnxError::malformed_frame()),
        }
    }

    #[inline(always)]
    pub fn additional_info_length(&self) -> u8 {
        self.data[1]
    }

    /// Service information after the additional info block
    pub fn service_info(&self) -> Result<&'a [u8]> {
        let start = Self::MIN_SIZE + usize::from(self.additional_info_length());
        self.data.get(start..).ok_or_else(KnxError::malformed_frame)
    }

    pub fn is_ldata_ind(&self) -> bool {
        self.message_code == CEMI_L_DATA_IND
    }

    pub fn as_ldata(&self) -> Result<LDataFrame<'a>> {
        LDataFrame::parse(self.service_info()?)
    }
}

/// A decoded cEMI telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    pub message_code: u8,
    pub source: IndividualAddress,
    /// Raw destination, group or individual per `destination_kind`
    pub destination: u16,
    pub destination_kind: DestinationKind,
    pub action: Action,
    pub payload: Payload,
}

impl Telegram {
    /// Decode the cEMI frame of a tunneling request.
    ///
    /// Only `L_Data.ind` (0x29) is interpreted. Other message codes come back
    /// as a passthrough telegram with [`Action::Unknown`] and zeroed fields.
    ///
    /// # Errors
    ///
    /// `MalformedFrame` if the frame is truncated.
    pub fn decode(cemi: &[u8]) -> Result<Self> {
        let frame = CEMIFrame::parse(cemi)?;
        if !frame.is_ldata_ind() {
            return Ok(Self::passthrough(frame.message_code));
        }

        let ldata = frame.as_ldata()?;
        let action = ldata.action();
        let payload = ldata.payload(action)?;

        Ok(Self {
            message_code: frame.message_code,
            source: ldata.source,
            destination: ldata.destination_raw,
            destination_kind: ldata.destination_kind(),
            action,
            payload,
        })
    }

    fn passthrough(message_code: u8) -> Self {
        Self {
            message_code,
            source: IndividualAddress::from(0),
            destination: 0,
            destination_kind: DestinationKind::Group,
            action: Action::Unknown,
            payload: Payload::new(),
        }
    }
}

/// The part of a telegram surfaced to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Query {
    pub action: Action,
    /// Raw destination address, render with [`GroupAddress`]
    pub dest: u16,
    pub data: Payload,
}

impl Query {
    /// Project a telegram, dropping anything that is not a read, write or response.
    pub fn from_telegram(telegram: &Telegram) -> Option<Self> {
        if telegram.action == Action::Unknown {
            return None;
        }
        Some(Self {
            action: telegram.action,
            dest: telegram.destination,
            data: telegram.payload.clone(),
        })
    }

    pub fn destination(&self) -> GroupAddress {
        GroupAddress::from(self.dest)
    }
}

impl fmt::Display for Query {
    /// `write data 0c:ff to 1/2/3`, `read 1/2/3`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.action == Action::Read {
            return write!(f, "read {}", self.destination());
        }
        write!(f, "{}", self.action)?;
        for (i, byte) in self.data.iter().enumerate() {
            let sep = if i == 0 { " data " } else { ":" };
            write!(f, "{sep}{byte:02x}")?;
        }
        write!(f, " to {}", self.destination())
    }
}
