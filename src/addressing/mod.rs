//! KNX addressing.
//!
//! KNX uses two types of addresses:
//! - Individual addresses for physical devices (Area.Line.Device)
//! - Group addresses for logical functions (Main/Middle/Sub)

pub mod group;
pub mod individual;

#[cfg(feature = "std")]
pub use group::encode_address;
pub use group::GroupAddress;
pub use individual::IndividualAddress;

/// Split `s` on `sep` into exactly three plain decimal `u8` fields.
///
/// Signs, whitespace and empty fields are rejected.
pub(crate) fn parse_fields(s: &str, sep: char) -> Option<[u8; 3]> {
    let mut parts = s.split(sep);
    let mut fields = [0u8; 3];
    for field in &mut fields {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *field = part.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(fields)
}
