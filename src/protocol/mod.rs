//! KNXnet/IP protocol implementation.
//!
//! Frame and service codecs are plain data transformations and build without
//! `std`. The tunnel state machine and its async driver need a
//! clock and a runtime and are only available with the `std` feature.

pub mod cemi;
pub mod constants;
pub mod frame;
pub mod services;

#[cfg(feature = "std")]
pub(crate) mod async_tunnel;
#[cfg(feature = "std")]
pub mod tunnel;

pub use cemi::*;
pub use constants::*;
pub use frame::*;
pub use services::*;

#[cfg(feature = "std")]
pub use tunnel::{ConnectionState, TunnelClient};
