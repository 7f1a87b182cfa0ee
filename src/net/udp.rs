//! Tokio UDP transport.
//!
//! Binds an ephemeral local port and connects the socket to the gateway, so
//! the kernel filters out datagrams from any other peer. The connected
//! socket's local address is what gets announced in the HPAIs.

use std::net::{SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;

use crate::error::{KnxError, Result};
use crate::knx_log;
use crate::net::transport::AsyncTransport;
use crate::net::IpEndpoint;

/// [`AsyncTransport`] over a `tokio::net::UdpSocket`.
#[derive(Debug)]
pub struct TokioUdpTransport {
    socket: Option<UdpSocket>,
    local: Option<IpEndpoint>,
}

impl TokioUdpTransport {
    /// Open a socket on `0.0.0.0:0` connected to `gateway`.
    pub async fn connect(gateway: IpEndpoint) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| {
                knx_log!(error, "Failed to bind UDP socket: {}", e);
                KnxError::socket_error()
            })?;

        socket
            .connect(SocketAddr::from(gateway))
            .await
            .map_err(|e| {
                knx_log!(error, "Failed to connect UDP socket to {}: {}", gateway, e);
                KnxError::socket_error()
            })?;

        // An unspecified local address means NAT mode: announce 0.0.0.0:0
        let local = match socket.local_addr() {
            Ok(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => Some(IpEndpoint::from(addr)),
            _ => None,
        };
        knx_log!(debug, "UDP transport ready, local endpoint {:?}", local);

        Ok(Self {
            socket: Some(socket),
            local,
        })
    }
}

impl AsyncTransport for TokioUdpTransport {
    async fn send_to(&mut self, data: &[u8], addr: IpEndpoint) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(KnxError::transport_closed)?;
        socket
            .send_to(data, SocketAddr::from(addr))
            .await
            .map_err(|e| {
                knx_log!(warn, "UDP send to {} failed: {}", addr, e);
                KnxError::send_failed()
            })?;
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        let socket = self.socket.as_ref().ok_or_else(KnxError::transport_closed)?;
        let (n, from) = socket.recv_from(buf).await.map_err(|e| {
            knx_log!(warn, "UDP receive failed: {}", e);
            KnxError::receive_failed()
        })?;
        match from {
            SocketAddr::V4(addr) => Ok((n, addr.into())),
            SocketAddr::V6(_) => Err(KnxError::receive_failed()),
        }
    }

    fn local_endpoint(&self) -> Option<IpEndpoint> {
        self.local
    }

    fn is_ready(&self) -> bool {
        self.socket.is_some()
    }

    fn close(&mut self) {
        self.socket = None;
    }
}
