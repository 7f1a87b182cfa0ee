//! Session timings and listener options.
//!
//! Timings default to the values KNXnet/IP gateways expect. Each can be
//! overridden by a `KEY=milliseconds` entry, taken either from the process
//! environment or from a `.env`-style block of text:
//!
//! ```text
//! KNX_CONNECT_TIMEOUT_MS=10000
//! KNX_HEARTBEAT_INTERVAL_MS=60000
//! KNX_HEARTBEAT_TIMEOUT_MS=10000
//! KNX_DISCONNECT_TIMEOUT_MS=2000
//! ```

#[cfg(feature = "std")]
use core::fmt;
use core::time::Duration;

#[cfg(feature = "std")]
use std::sync::Arc;

#[cfg(feature = "std")]
use crate::error::KnxError;

pub const CONNECT_TIMEOUT_KEY: &str = "KNX_CONNECT_TIMEOUT_MS";
pub const HEARTBEAT_INTERVAL_KEY: &str = "KNX_HEARTBEAT_INTERVAL_MS";
pub const HEARTBEAT_TIMEOUT_KEY: &str = "KNX_HEARTBEAT_TIMEOUT_MS";
pub const DISCONNECT_TIMEOUT_KEY: &str = "KNX_DISCONNECT_TIMEOUT_MS";

/// Timers driven by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelTimings {
    /// Wait for CONNECT_RESPONSE
    pub connect_timeout: Duration,
    /// Pause between two CONNECTIONSTATE_REQUESTs
    pub heartbeat_interval: Duration,
    /// Wait for CONNECTIONSTATE_RESPONSE
    pub heartbeat_timeout: Duration,
    /// Wait for DISCONNECT_RESPONSE
    pub disconnect_timeout: Duration,
}

impl TunnelTimings {
    pub const DEFAULT: Self = Self {
        connect_timeout: Duration::from_secs(10),
        heartbeat_interval: Duration::from_secs(60),
        heartbeat_timeout: Duration::from_secs(10),
        disconnect_timeout: Duration::from_secs(2),
    };

    /// Apply overrides from `lookup`. Missing or unparsable values keep the
    /// default.
    pub fn from_lookup<F, S>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<S>,
        S: AsRef<str>,
    {
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|value| value.as_ref().trim().parse::<u64>().ok())
                .map_or(default, Duration::from_millis)
        };
        let d = Self::DEFAULT;
        Self {
            connect_timeout: millis(CONNECT_TIMEOUT_KEY, d.connect_timeout),
            heartbeat_interval: millis(HEARTBEAT_INTERVAL_KEY, d.heartbeat_interval),
            heartbeat_timeout: millis(HEARTBEAT_TIMEOUT_KEY, d.heartbeat_timeout),
            disconnect_timeout: millis(DISCONNECT_TIMEOUT_KEY, d.disconnect_timeout),
        }
    }

    /// Read overrides from `KEY=value` lines.
    pub fn from_config_str(config: &str) -> Self {
        Self::from_lookup(|key| config_value(config, key))
    }

    /// Read overrides from the process environment.
    #[cfg(feature = "std")]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl Default for TunnelTimings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Value of the first `key=value` line for `key`.
fn config_value<'a>(config: &'a str, key: &str) -> Option<&'a str> {
    config
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, value)| value.trim())
}

/// Callback invoked on every connection-level failure.
#[cfg(feature = "std")]
pub type FailureHandler = Arc<dyn Fn(&KnxError) + Send + Sync>;

/// Options for [`BusListener::bind`](crate::listener::BusListener::bind).
///
/// ```rust
/// use core::time::Duration;
/// use knx_listener::ListenerOptions;
///
/// let options = ListenerOptions::new(5_000)
///     .on_failure(|e| eprintln!("gateway: {}", e.code()));
/// assert_eq!(options.retry_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(ListenerOptions::new(0).retry_delay(), None);
/// ```
#[cfg(feature = "std")]
#[derive(Clone, Default)]
pub struct ListenerOptions {
    retry_delay: Duration,
    timings: TunnelTimings,
    on_failure: Option<FailureHandler>,
}

#[cfg(feature = "std")]
impl ListenerOptions {
    /// `timeout_ms` is the delay before a reconnection attempt; 0 disables
    /// retrying and the first failure is final.
    pub fn new(timeout_ms: u32) -> Self {
        Self {
            retry_delay: Duration::from_millis(u64::from(timeout_ms)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn on_failure(mut self, handler: impl Fn(&KnxError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn timings(mut self, timings: TunnelTimings) -> Self {
        self.timings = timings;
        self
    }

    /// `None` when retrying is disabled
    pub fn retry_delay(&self) -> Option<Duration> {
        (!self.retry_delay.is_zero()).then_some(self.retry_delay)
    }

    pub fn tunnel_timings(&self) -> TunnelTimings {
        self.timings
    }

    pub(crate) fn report_failure(&self, error: &KnxError) {
        if let Some(handler) = &self.on_failure {
            handler(error);
        }
    }
}

#[cfg(feature = "std")]
impl fmt::Debug for ListenerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerOptions")
            .field("retry_delay", &self.retry_delay)
            .field("timings", &self.timings)
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = TunnelTimings::default();
        assert_eq!(t.connect_timeout, Duration::from_secs(10));
        assert_eq!(t.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(t.heartbeat_timeout, Duration::from_secs(10));
        assert_eq!(t.disconnect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_config_overrides() {
        let config = r#"
KNX_GATEWAY_IP=192.168.1.10
KNX_HEARTBEAT_INTERVAL_MS=30000
KNX_CONNECT_TIMEOUT_MS = 2500
KNX_DISCONNECT_TIMEOUT_MS=soon
"#;
        let t = TunnelTimings::from_config_str(config);
        assert_eq!(t.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(t.connect_timeout, Duration::from_millis(2500));
        assert_eq!(t.disconnect_timeout, Duration::from_secs(2));
        assert_eq!(t.heartbeat_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_lookup_missing_keys() {
        let t = TunnelTimings::from_lookup(|_| None::<&str>);
        assert_eq!(t, TunnelTimings::DEFAULT);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_failure_handler() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let options = ListenerOptions::new(1000).on_failure(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        options.report_failure(&KnxError::handshake_timeout());
        options.clone().report_failure(&KnxError::heartbeat_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(format!("{options:?}").contains("on_failure: true"));

        ListenerOptions::new(0).report_failure(&KnxError::handshake_timeout());
    }
}
