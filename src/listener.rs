//! Bus monitor front end.
//!
//! [`BusListener`] binds to one gateway at a time, keeps the tunnel alive in
//! a background task and fans decoded telegrams out to every subscriber.
//!
//! ```rust,no_run
//! use knx_listener::{BusEvent, BusListener, Ipv4Addr, ListenerOptions};
//!
//! # async fn run() -> knx_listener::Result<()> {
//! let listener = BusListener::new();
//! let mut events = listener.subscribe();
//!
//! listener
//!     .bind(Ipv4Addr::new(192, 168, 1, 10), 3671, ListenerOptions::new(5_000))
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         BusEvent::Query(query) => println!("{query}"),
//!         BusEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::configuration::ListenerOptions;
use crate::error::{ErrorCode, KnxError, Result};
use crate::knx_log;
use crate::net::udp::TokioUdpTransport;
use crate::net::{AsyncTransport, IpEndpoint, Ipv4Addr};
use crate::protocol::async_tunnel::{Command, ConnectionManager};
use crate::protocol::cemi::Query;
use crate::protocol::tunnel::ConnectionState;

/// Notifications delivered to subscribers, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A group read, write or response seen on the bus
    Query(Query),
    /// Tunnel established (also after a reconnect)
    Connected { channel_id: u8 },
    /// An established tunnel went away
    ConnectionLost(ErrorCode),
    /// A datagram that could not be used; the session carries on
    Anomaly(ErrorCode),
    /// The session ended for good
    Closed,
}

/// Registry of event subscribers. Senders whose receiver is gone are pruned
/// on the next emit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Subscribers(Arc<Mutex<Vec<mpsc::UnboundedSender<BusEvent>>>>);

impl Subscribers {
    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<BusEvent>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<BusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: BusEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[derive(Debug)]
struct Session {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl Session {
    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Listens to a KNX bus through a KNXnet/IP tunneling gateway.
///
/// All methods take `&self`; share the listener behind an `Arc` to
/// disconnect from another task.
#[derive(Debug)]
pub struct BusListener {
    session: Mutex<Option<Session>>,
    subscribers: Subscribers,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Default for BusListener {
    fn default() -> Self {
        Self::new()
    }
}

impl BusListener {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            session: Mutex::new(None),
            subscribers: Subscribers::default(),
            state: Arc::new(state),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BusEvent> {
        self.subscribers.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether a session task is running (connected or retrying).
    pub fn is_bound(&self) -> bool {
        self.lock_session().as_ref().is_some_and(Session::is_alive)
    }

    /// Open a UDP socket towards `address:port` and establish a tunnel.
    ///
    /// Resolves once the first handshake succeeds. With retrying disabled
    /// (`ListenerOptions::new(0)`) a failed handshake is returned here; with
    /// retrying enabled this waits until a handshake eventually succeeds or
    /// [`disconnect`](Self::disconnect) is called, which yields
    /// `NotConnected`.
    ///
    /// Dropping the returned future does not stop the session.
    ///
    /// # Errors
    ///
    /// `AlreadyBound` if a session is running, transport errors if the socket
    /// cannot be opened, and the handshake failure when retrying is disabled.
    pub async fn bind(&self, address: Ipv4Addr, port: u16, options: ListenerOptions) -> Result<()> {
        if self.is_bound() {
            return Err(KnxError::already_bound());
        }
        let gateway = IpEndpoint::new(address, port);
        let transport = TokioUdpTransport::connect(gateway).await?;
        self.bind_with(transport, gateway, options).await
    }

    /// Like [`bind`](Self::bind) over a caller-provided transport.
    pub async fn bind_with<T>(&self, transport: T, gateway: IpEndpoint, options: ListenerOptions) -> Result<()>
    where
        T: AsyncTransport + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut session = self.lock_session();
            if session.as_ref().is_some_and(Session::is_alive) {
                return Err(KnxError::already_bound());
            }

            let (commands, command_rx) = mpsc::channel(4);
            let manager = ConnectionManager::new(
                transport,
                gateway,
                options,
                self.subscribers.clone(),
                Arc::clone(&self.state),
            );
            knx_log!(info, "Binding to gateway {}", gateway);
            let task = tokio::spawn(manager.run(command_rx, ready_tx));
            *session = Some(Session { commands, task });
        }

        match ready_rx.await {
            Ok(Ok(_channel_id)) => Ok(()),
            Ok(Err(error)) => {
                self.reap().await;
                Err(error)
            }
            Err(_) => Err(KnxError::not_connected()),
        }
    }

    /// Close the tunnel and wait for the session task to finish.
    ///
    /// Sends a DISCONNECT_REQUEST if a tunnel is open and waits for the
    /// gateway's answer for at most the configured disconnect timeout. Does
    /// nothing when unbound.
    pub async fn disconnect(&self) {
        let Some(session) = self.lock_session().take() else {
            return;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if session.commands.send(Command::Disconnect(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
        if let Err(e) = session.task.await {
            knx_log!(error, "Session task failed: {}", e);
        }
    }

    /// Drop a session whose task is ending on its own.
    async fn reap(&self) {
        let finished = self.lock_session().take();
        if let Some(session) = finished {
            let _ = session.task.await;
        }
    }
}
