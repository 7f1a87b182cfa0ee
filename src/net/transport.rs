//! Datagram transport abstraction for KNXnet/IP communication.
//!
//! The connection manager only ever talks to an [`AsyncTransport`], so the
//! same session logic runs over a real UDP socket
//! ([`TokioUdpTransport`](crate::net::udp::TokioUdpTransport)) and over the
//! in-memory [`MockTransport`](crate::net::mock_transport::MockTransport)
//! used by the tests.

use core::future::Future;

use crate::error::Result;
use crate::net::IpEndpoint;

/// Asynchronous datagram transport.
///
/// The returned futures are `Send` so a transport can be moved into a spawned
/// task. `recv_from` must be cancel-safe: the session loop races it against
/// timers and drops it when a timer fires first.
///
/// # Implementing
///
/// ```rust,no_run
/// use knx_listener::net::{AsyncTransport, IpEndpoint};
/// use knx_listener::Result;
///
/// struct Loopback;
///
/// impl AsyncTransport for Loopback {
///     async fn send_to(&mut self, _data: &[u8], _addr: IpEndpoint) -> Result<()> {
///         Ok(())
///     }
///
///     async fn recv_from(&mut self, _buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
///         core::future::pending().await
///     }
/// }
/// ```
pub trait AsyncTransport {
    /// Send one datagram to `addr`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the datagram could not be handed to the
    /// network or the transport is closed.
    fn send_to(&mut self, data: &[u8], addr: IpEndpoint) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next datagram, copy it into `buf` and report its sender.
    ///
    /// Datagrams larger than `buf` are truncated.
    fn recv_from(
        &mut self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, IpEndpoint)>> + Send;

    /// Address the gateway should send control and data traffic to.
    ///
    /// `None` (the default) makes the client announce 0.0.0.0:0, asking the
    /// gateway to reply to the datagram's source address (NAT mode).
    fn local_endpoint(&self) -> Option<IpEndpoint> {
        None
    }

    /// Check if the transport can still send and receive.
    fn is_ready(&self) -> bool {
        true
    }

    /// Release the underlying resources. Idempotent.
    fn close(&mut self) {}
}
