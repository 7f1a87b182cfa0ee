//! Mock transport implementation for testing.
//!
//! [`MockTransport::pair`] returns the transport handed to the code under
//! test together with a [`MockGateway`] that plays the other end: it injects
//! datagrams and inspects everything the client sent.
//!
//! Receiving waits on a channel, so a client blocked in `recv_from` behaves
//! like one blocked on a quiet socket. That makes the mock usable with
//! `tokio::time::pause` to drive timeout paths deterministically.
//!
//! ## Example
//!
//! ```rust
//! use knx_listener::net::mock_transport::MockTransport;
//! use knx_listener::net::{AsyncTransport, IpEndpoint, Ipv4Addr};
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let (mut mock, mut gateway) = MockTransport::pair();
//! gateway.add_response(vec![0x06, 0x10, 0x02, 0x06, 0x00, 0x08, 0x01, 0x00]);
//!
//! let dest = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);
//! mock.send_to(&[0xAA], dest).await.unwrap();
//! assert_eq!(gateway.next_sent().await, Some(vec![0xAA]));
//!
//! let mut buf = [0u8; 16];
//! let (n, _) = mock.recv_from(&mut buf).await.unwrap();
//! assert_eq!(n, 8);
//! # }
//! ```

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use crate::net::{IpEndpoint, Ipv4Addr};

type Datagram = (Vec<u8>, IpEndpoint);

/// Default source reported for injected datagrams.
pub const MOCK_GATEWAY: IpEndpoint = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);

/// Client side of the mock link.
#[derive(Debug)]
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Datagram>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    sent: Arc<Mutex<Vec<Datagram>>>,
    local: Option<IpEndpoint>,
    ready: bool,
}

/// Gateway side of the mock link.
#[derive(Debug)]
pub struct MockGateway {
    inbound: mpsc::UnboundedSender<Datagram>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    sent: Arc<Mutex<Vec<Datagram>>>,
}

impl MockTransport {
    /// Create a connected transport/gateway pair.
    pub fn pair() -> (Self, MockGateway) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));

        let transport = Self {
            inbound: in_rx,
            outbound: out_tx,
            sent: Arc::clone(&sent),
            local: None,
            ready: true,
        };
        let gateway = MockGateway {
            inbound: in_tx,
            outbound: out_rx,
            sent,
        };
        (transport, gateway)
    }

    /// Report `endpoint` as the local address instead of NAT mode.
    #[must_use]
    pub fn with_local_endpoint(mut self, endpoint: IpEndpoint) -> Self {
        self.local = Some(endpoint);
        self
    }

    /// Set whether the transport should report as "ready".
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }
}

impl MockGateway {
    /// Queue a datagram for the client, sent from [`MOCK_GATEWAY`].
    pub fn add_response(&self, data: Vec<u8>) {
        self.add_response_from(data, MOCK_GATEWAY);
    }

    /// Queue a datagram for the client with a specific source endpoint.
    pub fn add_response_from(&self, data: Vec<u8>, from: IpEndpoint) {
        // The transport may already be gone; the datagram is lost like on a real link
        let _ = self.inbound.send((data, from));
    }

    /// Wait for the next datagram the client sends.
    ///
    /// Returns `None` once the transport has been dropped and every sent
    /// datagram was consumed.
    pub async fn next_sent(&mut self) -> Option<Vec<u8>> {
        self.outbound.recv().await
    }

    /// Take a datagram the client already sent, without waiting.
    pub fn try_next_sent(&mut self) -> Option<Vec<u8>> {
        self.outbound.try_recv().ok()
    }

    /// Every `(data, destination)` the client sent so far.
    pub fn sent_packets(&self) -> Vec<Datagram> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// The last packet sent, if any.
    pub fn last_sent(&self) -> Option<Datagram> {
        self.sent.lock().ok().and_then(|sent| sent.last().cloned())
    }

    /// Number of datagrams the client sent so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }

    /// Forget the send history.
    pub fn clear_sent(&mut self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
        while self.outbound.try_recv().is_ok() {}
    }
}

impl AsyncTransport for MockTransport {
    async fn send_to(&mut self, data: &[u8], addr: IpEndpoint) -> Result<()> {
        if !self.ready {
            return Err(KnxError::transport_closed());
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((data.to_vec(), addr));
        }
        // Nobody listening is fine, the history above still records the send
        let _ = self.outbound.send(data.to_vec());
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        if !self.ready {
            return Err(KnxError::transport_closed());
        }
        match self.inbound.recv().await {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            None => Err(KnxError::transport_closed()),
        }
    }

    fn local_endpoint(&self) -> Option<IpEndpoint> {
        self.local
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn close(&mut self) {
        self.ready = false;
        self.inbound.close();
    }
}
