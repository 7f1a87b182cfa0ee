#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![doc = include_str!("../README.md")]

//! ## Layout
//!
//! - [`addressing`]: group and individual addresses
//! - [`net`]: IPv4 endpoints, validators and datagram transports
//! - [`protocol`]: KNXnet/IP frames, tunneling services, cEMI telegrams and
//!   the tunneling state machine
//! - [`listener`]: the bus monitor front end
//! - [`configuration`]: timers and listener options

pub mod addressing;
pub mod configuration;
pub mod error;
#[cfg(feature = "std")]
pub mod listener;
pub mod net;
pub mod protocol;

#[macro_use]
pub mod logging;

#[doc(inline)]
pub use addressing::{GroupAddress, IndividualAddress};
#[cfg(feature = "std")]
#[doc(inline)]
pub use addressing::encode_address;
#[cfg(feature = "std")]
#[doc(inline)]
pub use configuration::ListenerOptions;
#[doc(inline)]
pub use configuration::TunnelTimings;
#[doc(inline)]
pub use error::{ErrorCode, KnxError, Result};
#[cfg(feature = "std")]
#[doc(inline)]
pub use listener::{BusEvent, BusListener};
#[doc(inline)]
pub use net::{validate_ipv4, validate_port, IpEndpoint, Ipv4Addr};
#[doc(inline)]
pub use protocol::cemi::{Action, Query};
#[cfg(feature = "std")]
#[doc(inline)]
pub use protocol::tunnel::ConnectionState;
