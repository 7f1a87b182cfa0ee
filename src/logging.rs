//! Unified logging macro for knx-listener
//!
//! The crate logs through a single macro that selects between `log::` and
//! `defmt::` based on the active feature flags.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::knx_log;
//!
//! knx_log!(info, "Tunnel established on channel {}", channel_id);
//! knx_log!(debug, "Received {} bytes", n);
//! knx_log!(warn, "Heartbeat lost");
//! ```
//!
//! # Feature Flags
//!
//! - default / `std` - Uses the `log` facade (pick a backend such as `env_logger`)
//! - `defmt` without `std` - Uses `defmt::` for embedded targets

/// Unified logging macro - automatically selects log:: or defmt:: based on features
#[macro_export]
#[cfg(not(all(feature = "defmt", not(feature = "std"))))]
macro_rules! knx_log {
    (info, $($arg:tt)*) => { log::info!($($arg)*) };
    (debug, $($arg:tt)*) => { log::debug!($($arg)*) };
    (warn, $($arg:tt)*) => { log::warn!($($arg)*) };
    (error, $($arg:tt)*) => { log::error!($($arg)*) };
    (trace, $($arg:tt)*) => { log::trace!($($arg)*) };
}

#[macro_export]
#[cfg(all(feature = "defmt", not(feature = "std")))]
macro_rules! knx_log {
    (info, $($arg:tt)*) => { defmt::info!($($arg)*) };
    (debug, $($arg:tt)*) => { defmt::debug!($($arg)*) };
    (warn, $($arg:tt)*) => { defmt::warn!($($arg)*) };
    (error, $($arg:tt)*) => { defmt::error!($($arg)*) };
    (trace, $($arg:tt)*) => { defmt::trace!($($arg)*) };
}
