//! KNX group addresses.
//!
//! A group address is a 16-bit value shown in the three-level
//! `main/middle/sub` notation:
//! - Main: 5 bits (0-31)
//! - Middle: 3 bits (0-7)
//! - Sub: 8 bits (0-255)
//!
//! Every raw value maps to exactly one textual form and back.

use super::parse_fields;
use crate::error::{KnxError, Result};
use core::fmt;

/// KNX Group Address
///
/// # Examples
///
/// ```
/// use knx_listener::GroupAddress;
///
/// let addr = GroupAddress::new(1, 2, 3).unwrap();
/// assert_eq!(addr.to_string(), "1/2/3");
/// assert_eq!(u16::from(addr), 0x0A03);
///
/// let parsed: GroupAddress = "31/7/255".parse().unwrap();
/// assert_eq!(parsed.raw(), 0xFFFF);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupAddress {
    raw: u16,
}

impl GroupAddress {
    /// Maximum main group value (5 bits)
    pub const MAX_MAIN: u8 = 31;
    /// Maximum middle group value (3 bits)
    pub const MAX_MIDDLE: u8 = 7;

    /// Create a group address from its three components.
    ///
    /// # Errors
    ///
    /// Returns an out-of-range addressing error if `main > 31` or `middle > 7`.
    pub fn new(main: u8, middle: u8, sub: u8) -> Result<Self> {
        if main > Self::MAX_MAIN || middle > Self::MAX_MIDDLE {
            return Err(KnxError::address_out_of_range());
        }
        let raw = (u16::from(main) << 11) | (u16::from(middle) << 8) | u16::from(sub);
        Ok(Self { raw })
    }

    /// Raw 16-bit wire value.
    #[inline(always)]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    /// Main group (bits 15-11).
    #[inline(always)]
    pub const fn main(self) -> u8 {
        ((self.raw >> 11) & 0x1F) as u8
    }

    /// Middle group (bits 10-8).
    #[inline(always)]
    pub const fn middle(self) -> u8 {
        ((self.raw >> 8) & 0x07) as u8
    }

    /// Sub group (bits 7-0).
    #[inline(always)]
    pub const fn sub(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// Render into a fixed-capacity string, usable without an allocator.
    ///
    /// The longest form, `31/7/255`, is 8 characters.
    pub fn to_heapless(self) -> heapless::String<16> {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        // Cannot overflow: at most 8 characters
        let _ = write!(s, "{self}");
        s
    }

    /// Read a big-endian address from the first two bytes of `buf`.
    #[inline]
    pub fn decode(buf: &[u8]) -> Result<Self> {
        match buf {
            [hi, lo, ..] => Ok(Self {
                raw: u16::from_be_bytes([*hi, *lo]),
            }),
            _ => Err(KnxError::malformed_frame()),
        }
    }
}

impl From<u16> for GroupAddress {
    #[inline(always)]
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl From<GroupAddress> for u16 {
    #[inline(always)]
    fn from(addr: GroupAddress) -> u16 {
        addr.raw
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

impl core::str::FromStr for GroupAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let [main, middle, sub] =
            parse_fields(s, '/').ok_or_else(KnxError::invalid_group_address)?;
        Self::new(main, middle, sub)
    }
}

/// Render a raw 16-bit group address as `main/middle/sub`.
///
/// Total over all inputs: `encode_address(0)` is `"0/0/0"` and
/// `encode_address(0xFFFF)` is `"31/7/255"`.
#[cfg(feature = "std")]
pub fn encode_address(raw: u16) -> String {
    GroupAddress::from(raw).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_valid() {
        let addr = GroupAddress::new(1, 2, 3).unwrap();
        assert_eq!(addr.main(), 1);
        assert_eq!(addr.middle(), 2);
        assert_eq!(addr.sub(), 3);
        assert_eq!(addr.raw(), 0x0A03);
    }

    #[test]
    fn test_new_out_of_range() {
        assert!(GroupAddress::new(32, 0, 0).is_err());
        assert!(GroupAddress::new(0, 8, 0).is_err());
    }

    #[test]
    #[cfg(feature = "std")]
    fn test_encode_address_bounds() {
        assert_eq!(encode_address(0x0000), "0/0/0");
        assert_eq!(encode_address(0x0A03), "1/2/3");
        assert_eq!(encode_address(0xFFFF), "31/7/255");
    }

    #[test]
    #[cfg(feature = "std")]
    fn test_encode_address_is_bijective() {
        // Every raw value renders and parses back to itself
        for raw in 0..=u16::MAX {
            let text = encode_address(raw);
            let parsed: GroupAddress = text.parse().unwrap();
            assert_eq!(parsed.raw(), raw, "{text}");
        }
    }

    #[test]
    fn test_to_heapless() {
        let addr = GroupAddress::from(0xFFFF);
        assert_eq!(addr.to_heapless().as_str(), "31/7/255");
    }

    #[test]
    fn test_decode() {
        assert_eq!(GroupAddress::decode(&[0x0A, 0x03, 0xFF]).unwrap().raw(), 0x0A03);
        assert!(GroupAddress::decode(&[0x0A]).is_err());
    }

    #[test]
    fn test_from_str_invalid() {
        for text in ["1", "1/2", "32/0/0", "1/8/0", "1/2/256", "1/2/3/4", "a/b/c", "", "+1/2/3", "1//3"] {
            assert!(text.parse::<GroupAddress>().is_err(), "{text}");
        }
    }
}
