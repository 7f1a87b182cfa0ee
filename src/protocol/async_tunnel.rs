//! Async driver for the tunneling state machine.
//!
//! A [`ConnectionManager`] runs as a single tokio task per bound session. It
//! owns the transport, the [`TunnelClient`] and every timer, so all socket
//! writes are serialised through one place and no timer can outlive the
//! session: when the task ends its pending sleeps are dropped with it.
//!
//! The task multiplexes four sources with `tokio::select!`:
//!
//! - a command channel (disconnect requests from the listener)
//! - the handshake, heartbeat and disconnect deadlines
//! - the retry delay
//! - inbound datagrams

use core::time::Duration;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, sleep_until, Instant};

use crate::configuration::{ListenerOptions, TunnelTimings};
use crate::error::{KnxError, Result};
use crate::knx_log;
use crate::listener::{BusEvent, Subscribers};
use crate::net::{AsyncTransport, IpEndpoint};
use crate::protocol::cemi::Query;
use crate::protocol::constants::{ServiceType, MAX_DATAGRAM_SIZE};
use crate::protocol::frame::{Hpai, KnxnetIpFrame};
use crate::protocol::tunnel::{ConnectionState, TunnelClient};

/// Requests sent to a running manager.
#[derive(Debug)]
pub(crate) enum Command {
    /// Tear the session down; the sender fires once the manager is Closed
    Disconnect(oneshot::Sender<()>),
}

/// Resolves with the channel id of the first established tunnel.
pub(crate) type ReadySender = oneshot::Sender<Result<u8>>;

/// How a phase of the session ended.
enum Exit {
    /// Connection-level failure
    Failed(KnxError),
    /// Disconnect requested; `None` if every command sender is gone
    Stop(Option<oneshot::Sender<()>>),
}

/// What a datagram meant for the running session.
enum Flow {
    Continue,
    HeartbeatConfirmed,
    Lost(KnxError),
}

/// Owns one tunneling session from handshake to Closed.
pub(crate) struct ConnectionManager<T> {
    transport: T,
    client: TunnelClient,
    retry_delay: Option<Duration>,
    timings: TunnelTimings,
    options: ListenerOptions,
    subscribers: Subscribers,
    state: Arc<watch::Sender<ConnectionState>>,
    buffer: [u8; MAX_DATAGRAM_SIZE],
}

impl<T: AsyncTransport> ConnectionManager<T> {
    pub(crate) fn new(
        transport: T,
        gateway: IpEndpoint,
        options: ListenerOptions,
        subscribers: Subscribers,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        let local = transport.local_endpoint().map_or(Hpai::NAT, Hpai::from);
        Self {
            transport,
            client: TunnelClient::new(gateway, local),
            retry_delay: options.retry_delay(),
            timings: options.tunnel_timings(),
            options,
            subscribers,
            state,
            buffer: [0; MAX_DATAGRAM_SIZE],
        }
    }

    /// Drive the session until it is Closed.
    ///
    /// `ready` resolves with the channel id at the first successful
    /// handshake, or with the error if that handshake fails and retrying is
    /// disabled. It is dropped unresolved if the session stops before either.
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>, ready: ReadySender) {
        let mut ready = Some(ready);

        let reply = loop {
            let failure = match self.handshake(&mut commands).await {
                Ok(channel_id) => {
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Ok(channel_id));
                    }
                    self.subscribers.emit(BusEvent::Connected { channel_id });

                    match self.session(&mut commands).await {
                        Exit::Failed(error) => {
                            self.subscribers.emit(BusEvent::ConnectionLost(error.code()));
                            error
                        }
                        Exit::Stop(reply) => {
                            self.teardown().await;
                            break reply;
                        }
                    }
                }
                Err(Exit::Failed(error)) => error,
                Err(Exit::Stop(reply)) => break reply,
            };

            knx_log!(warn, "Connection to {} failed: {}", self.client.gateway(), failure);
            self.options.report_failure(&failure);

            let Some(delay) = self.retry_delay else {
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(failure));
                }
                break None;
            };

            if let Some(Exit::Stop(reply)) = self.wait_retry(delay, &mut commands).await {
                break reply;
            }
        };

        self.finish();
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    fn publish(&self) {
        self.state.send_replace(self.client.state());
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.transport.send_to(frame, self.client.gateway()).await
    }

    // -------------------------------------------------------------------------
    // Phases
    // -------------------------------------------------------------------------

    /// Connecting until a CONNECT_RESPONSE settles it or the deadline passes.
    async fn handshake(&mut self, commands: &mut mpsc::Receiver<Command>) -> core::result::Result<u8, Exit> {
        let frame = self.client.connect().map_err(Exit::Failed)?;
        self.publish();
        if let Err(e) = self.send(&frame).await {
            self.client.close();
            return Err(Exit::Failed(e));
        }

        let deadline = Instant::now() + self.timings.connect_timeout;
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    self.client.close();
                    return Err(Exit::Stop(command.map(|Command::Disconnect(reply)| reply)));
                }
                () = sleep_until(deadline) => {
                    return Err(Exit::Failed(self.client.handshake_timed_out()));
                }
                received = self.transport.recv_from(&mut self.buffer) => {
                    let n = match received {
                        Ok((n, _)) => n,
                        Err(e) => {
                            self.client.close();
                            return Err(Exit::Failed(e));
                        }
                    };
                    if let Some(result) = self.on_handshake_datagram(n) {
                        self.publish();
                        return result.map_err(Exit::Failed);
                    }
                }
            }
        }
    }

    /// `None` while still waiting for the gateway's answer.
    fn on_handshake_datagram(&mut self, n: usize) -> Option<Result<u8>> {
        let frame = match KnxnetIpFrame::parse(&self.buffer[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                self.subscribers.emit(BusEvent::Anomaly(e.code()));
                return None;
            }
        };
        if frame.service_type() != ServiceType::ConnectResponse {
            knx_log!(debug, "Ignoring {:?} while connecting", frame.service_type());
            return None;
        }

        match self.client.handle_connect_response(frame.body()) {
            Ok(channel_id) => Some(Ok(channel_id)),
            Err(e) if self.client.state() == ConnectionState::Closed => Some(Err(e)),
            Err(e) => {
                self.subscribers.emit(BusEvent::Anomaly(e.code()));
                None
            }
        }
    }

    /// Connected / Heartbeating until the link is lost or a stop is requested.
    async fn session(&mut self, commands: &mut mpsc::Receiver<Command>) -> Exit {
        let mut next_heartbeat = Instant::now() + self.timings.heartbeat_interval;
        let mut heartbeat_deadline: Option<Instant> = None;

        loop {
            let timer = heartbeat_deadline.unwrap_or(next_heartbeat);
            tokio::select! {
                biased;
                command = commands.recv() => {
                    return Exit::Stop(command.map(|Command::Disconnect(reply)| reply));
                }
                () = sleep_until(timer) => {
                    if heartbeat_deadline.is_some() {
                        let error = self.client.heartbeat_timed_out();
                        self.publish();
                        return Exit::Failed(error);
                    }
                    let frame = match self.client.heartbeat() {
                        Ok(frame) => frame,
                        Err(e) => return Exit::Failed(e),
                    };
                    self.publish();
                    if let Err(e) = self.send(&frame).await {
                        self.client.close();
                        return Exit::Failed(e);
                    }
                    heartbeat_deadline = Some(Instant::now() + self.timings.heartbeat_timeout);
                }
                received = self.transport.recv_from(&mut self.buffer) => {
                    let flow = match received {
                        Ok((n, _)) => self.on_session_datagram(n).await,
                        Err(e) => {
                            self.client.close();
                            Flow::Lost(e)
                        }
                    };
                    match flow {
                        Flow::Continue => {}
                        Flow::HeartbeatConfirmed => {
                            heartbeat_deadline = None;
                            next_heartbeat = Instant::now() + self.timings.heartbeat_interval;
                        }
                        Flow::Lost(error) => {
                            self.publish();
                            return Exit::Failed(error);
                        }
                    }
                }
            }
        }
    }

    async fn on_session_datagram(&mut self, n: usize) -> Flow {
        let (service, body) = match KnxnetIpFrame::parse(&self.buffer[..n]) {
            Ok(frame) => (frame.service_type(), frame.body()),
            Err(e) => {
                knx_log!(debug, "Dropping datagram: {}", e);
                self.subscribers.emit(BusEvent::Anomaly(e.code()));
                return Flow::Continue;
            }
        };

        match service {
            ServiceType::TunnelingRequest => {
                let indication = match self.client.handle_tunneling_request(body) {
                    Ok(indication) => indication,
                    Err(e) => {
                        self.subscribers.emit(BusEvent::Anomaly(e.code()));
                        return Flow::Continue;
                    }
                };

                // The gateway gets its ack before anything else happens
                if let Err(e) = self.send(&indication.ack).await {
                    self.client.close();
                    return Flow::Lost(e);
                }

                if let Some(anomaly) = indication.anomaly() {
                    self.subscribers.emit(BusEvent::Anomaly(anomaly.code()));
                }
                if !indication.is_deliverable() {
                    knx_log!(debug, "Duplicate tunneling request re-acked");
                    return Flow::Continue;
                }
                match indication.telegram {
                    Ok(telegram) => {
                        if let Some(query) = Query::from_telegram(&telegram) {
                            knx_log!(trace, "{}", query);
                            self.subscribers.emit(BusEvent::Query(query));
                        }
                    }
                    Err(e) => self.subscribers.emit(BusEvent::Anomaly(e.code())),
                }
                Flow::Continue
            }
            ServiceType::ConnectionstateResponse => {
                let now = Instant::now().into_std();
                match self.client.handle_connection_state_response(body, now) {
                    Ok(()) => {
                        self.publish();
                        Flow::HeartbeatConfirmed
                    }
                    Err(e) if self.client.state() == ConnectionState::Closed => Flow::Lost(e),
                    Err(e) => {
                        knx_log!(debug, "Unexpected connection state response: {}", e);
                        Flow::Continue
                    }
                }
            }
            ServiceType::DisconnectRequest => match self.client.handle_disconnect_request(body) {
                Ok(response) => {
                    // Best effort: the channel is gone either way
                    let _ = self.send(&response).await;
                    Flow::Lost(KnxError::gateway_disconnected())
                }
                Err(e) => {
                    self.subscribers.emit(BusEvent::Anomaly(e.code()));
                    Flow::Continue
                }
            },
            other => {
                knx_log!(debug, "Ignoring {:?} on an open tunnel", other);
                Flow::Continue
            }
        }
    }

    /// Disconnecting: one DISCONNECT_REQUEST, a bounded wait, then Closed.
    async fn teardown(&mut self) {
        let Some(frame) = self.client.disconnect() else {
            return;
        };
        self.publish();
        if self.send(&frame).await.is_err() {
            self.client.close();
            return;
        }

        let deadline = Instant::now() + self.timings.disconnect_timeout;
        loop {
            tokio::select! {
                () = sleep_until(deadline) => {
                    knx_log!(debug, "No DISCONNECT_RESPONSE, closing anyway");
                    break;
                }
                received = self.transport.recv_from(&mut self.buffer) => {
                    let Ok((n, _)) = received else { break };
                    let Ok(frame) = KnxnetIpFrame::parse(&self.buffer[..n]) else { continue };
                    if frame.service_type() == ServiceType::DisconnectResponse
                        && self.client.handle_disconnect_response(frame.body()).is_ok()
                    {
                        break;
                    }
                }
            }
        }
        self.client.close();
    }

    /// Retrying for `delay`. Returns the stop that interrupted the wait, if any.
    async fn wait_retry(&mut self, delay: Duration, commands: &mut mpsc::Receiver<Command>) -> Option<Exit> {
        if self.client.retry().is_err() {
            self.client.close();
            let _ = self.client.retry();
        }
        self.publish();
        knx_log!(info, "Reconnecting in {} ms", delay.as_millis());

        tokio::select! {
            biased;
            command = commands.recv() => Some(Exit::Stop(command.map(|Command::Disconnect(reply)| reply))),
            () = sleep(delay) => None,
        }
    }

    fn finish(&mut self) {
        self.client.close();
        self.transport.close();
        self.publish();
        knx_log!(info, "Session with {} closed", self.client.gateway());
        self.subscribers.emit(BusEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::error::ErrorCode;
    use crate::net::mock_transport::{MockGateway, MockTransport, MOCK_GATEWAY};
    use crate::protocol::constants::MAX_FRAME_SIZE;
    use crate::protocol::services::{
        ConnectResponse, ConnectionHeader, ConnectionStateResponse, DisconnectRequest,
        DisconnectResponse, TunnelingRequest,
    };

    const CHANNEL: u8 = 0x15;
    const WRITE_CEMI: [u8; 12] = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x09, 0x01, 0x02, 0x00, 0x80, 0xFF];

    struct Harness {
        gateway: MockGateway,
        events: UnboundedReceiver<BusEvent>,
        commands: mpsc::Sender<Command>,
        ready: oneshot::Receiver<Result<u8>>,
        state: watch::Receiver<ConnectionState>,
        failures: Arc<Mutex<Vec<ErrorCode>>>,
        task: JoinHandle<()>,
    }

    fn start(timeout_ms: u32) -> Harness {
        let (transport, gateway) = MockTransport::pair();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let options = ListenerOptions::new(timeout_ms)
            .on_failure(move |e| sink.lock().unwrap().push(e.code()));

        let subscribers = Subscribers::default();
        let events = subscribers.subscribe();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let (commands, command_rx) = mpsc::channel(4);
        let (ready_tx, ready) = oneshot::channel();

        let manager =
            ConnectionManager::new(transport, MOCK_GATEWAY, options, subscribers, Arc::new(state_tx));
        let task = tokio::spawn(manager.run(command_rx, ready_tx));

        Harness {
            gateway,
            events,
            commands,
            ready,
            state,
            failures,
            task,
        }
    }

    fn service(frame: &[u8]) -> u16 {
        u16::from_be_bytes([frame[2], frame[3]])
    }

    fn connect_response(channel_id: u8, status: u8) -> Vec<u8> {
        let response = ConnectResponse {
            channel_id,
            status,
            data_endpoint: Hpai::from(MOCK_GATEWAY),
            crd: Some([0x04, 0x04, 0x11, 0xFE]),
        };
        response.to_frame().unwrap().to_vec()
    }

    fn state_response(status: u8) -> Vec<u8> {
        let response = ConnectionStateResponse {
            channel_id: CHANNEL,
            status,
        };
        response.to_frame().unwrap().to_vec()
    }

    fn tunneling(channel_id: u8, seq: u8) -> Vec<u8> {
        TunnelingRequest::new(ConnectionHeader::new(channel_id, seq), &WRITE_CEMI)
            .to_frame()
            .unwrap()
            .to_vec()
    }

    /// Write of 250 bytes to 1/1/1 behind 16 bytes of additional info.
    fn long_tunneling(seq: u8) -> Vec<u8> {
        let mut cemi = vec![0x29, 0x10];
        for _ in 0..4 {
            cemi.extend_from_slice(&[0x03, 0x02, 0x00, 0x00]);
        }
        cemi.extend_from_slice(&[0xBC, 0xE0, 0x11, 0x01, 0x09, 0x01, 251, 0x00, 0x80]);
        cemi.resize(cemi.len() + 250, 0x5A);

        let mut frame = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = TunnelingRequest::new(ConnectionHeader::new(CHANNEL, seq), &cemi)
            .build(&mut frame)
            .unwrap();
        frame.truncate(len);
        frame
    }

    async fn connected(timeout_ms: u32) -> Harness {
        let mut h = start(timeout_ms);
        let request = h.gateway.next_sent().await.unwrap();
        assert_eq!(service(&request), 0x0205);
        h.gateway.add_response(connect_response(CHANNEL, 0x00));
        assert_eq!((&mut h.ready).await.unwrap().unwrap(), CHANNEL);
        assert_eq!(h.events.recv().await, Some(BusEvent::Connected { channel_id: CHANNEL }));
        h
    }

    fn assert_elapsed(start: Instant, secs: u64) {
        let elapsed = start.elapsed();
        let expected = Duration::from_secs(secs);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(10),
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    async fn next_query(events: &mut UnboundedReceiver<BusEvent>) -> Query {
        loop {
            match events.recv().await {
                Some(BusEvent::Query(query)) => return query,
                Some(_) => {}
                None => panic!("event stream ended"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_and_heartbeat_keep_session() {
        let mut h = connected(0).await;
        let start = Instant::now();

        for round in 1..=3u64 {
            let request = h.gateway.next_sent().await.unwrap();
            assert_eq!(service(&request), 0x0207);
            assert_eq!(request[6], CHANNEL);
            assert_elapsed(start, 60 * round);
            h.gateway.add_response(state_response(0x00));
        }

        h.state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
        let services: Vec<u16> = h.gateway.sent_packets().iter().map(|(f, _)| service(f)).collect();
        assert_eq!(services, [0x0205, 0x0207, 0x0207, 0x0207]);
        assert!(h.events.try_recv().is_err());
        assert!(h.failures.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tunneling_request_acked_before_query() {
        let mut h = connected(0).await;
        h.gateway.add_response(tunneling(CHANNEL, 0));

        let query = next_query(&mut h.events).await;
        let sent = h.gateway.sent_packets();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].0,
            [0x06, 0x10, 0x04, 0x21, 0x00, 0x0B, 0x04, CHANNEL, 0x00, 0x00, 0x00]
        );
        assert_eq!(sent[1].1, MOCK_GATEWAY);
        assert_eq!(query.to_string(), "write data ff to 1/1/1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_tunneling_request_acked_and_emitted() {
        let mut h = connected(0).await;
        let request = long_tunneling(0);
        assert_eq!(request.len(), 287);
        assert!(request.len() > MAX_FRAME_SIZE);
        h.gateway.add_response(request);

        let Some(BusEvent::Query(query)) = h.events.recv().await else {
            panic!("expected a query");
        };
        assert_eq!(query.dest, 0x0901);
        assert_eq!(query.data.len(), 250);
        assert!(query.data.iter().all(|&b| b == 0x5A));
        assert_eq!(
            h.gateway.last_sent().unwrap().0,
            [0x06, 0x10, 0x04, 0x21, 0x00, 0x0B, 0x04, CHANNEL, 0x00, 0x00, 0x00]
        );
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_datagrams_leave_session_up() {
        let mut h = connected(0).await;

        let mut bad_version = tunneling(CHANNEL, 0);
        bad_version[1] = 0x20;
        let mut bad_connection_header = tunneling(CHANNEL, 0);
        bad_connection_header[6] = 0x05;
        let garbage = [
            (vec![0x06, 0x10, 0x04], ErrorCode::MalformedHeader),
            (bad_version, ErrorCode::MalformedHeader),
            (bad_connection_header, ErrorCode::MalformedFrame),
            (vec![0x06, 0x10, 0x05, 0x30, 0x00, 0x08, 0x00, 0x00], ErrorCode::UnsupportedServiceType),
        ];

        for (seq, (datagram, code)) in (0u8..).zip(garbage) {
            h.gateway.add_response(datagram);
            assert_eq!(h.events.recv().await, Some(BusEvent::Anomaly(code)));
            assert_eq!(*h.state.borrow(), ConnectionState::Connected);

            h.gateway.add_response(tunneling(CHANNEL, seq));
            assert!(matches!(h.events.recv().await, Some(BusEvent::Query(_))));
            let (ack, _) = h.gateway.last_sent().unwrap();
            assert_eq!(service(&ack), 0x0421);
            assert_eq!(ack[8], seq);
        }

        assert_eq!(h.gateway.sent_count(), 5);
        assert!(h.failures.lock().unwrap().is_empty());
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_reacked_not_reemitted() {
        let mut h = connected(0).await;
        h.gateway.add_response(tunneling(CHANNEL, 0));
        h.gateway.add_response(tunneling(CHANNEL, 0));
        h.gateway.add_response(tunneling(CHANNEL, 1));

        next_query(&mut h.events).await;
        next_query(&mut h.events).await;
        let acks = h.gateway.sent_packets().iter().filter(|(f, _)| service(f) == 0x0421).count();
        assert_eq!(acks, 3);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_gap_reported_and_delivered() {
        let mut h = connected(0).await;
        h.gateway.add_response(tunneling(CHANNEL, 7));

        assert_eq!(h.events.recv().await, Some(BusEvent::Anomaly(ErrorCode::SequenceMismatch)));
        next_query(&mut h.events).await;
        assert_eq!(h.gateway.last_sent().unwrap().0[8], 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_channel_not_acked() {
        let mut h = connected(0).await;
        h.gateway.add_response(tunneling(0x33, 0));
        assert_eq!(h.events.recv().await, Some(BusEvent::Anomaly(ErrorCode::ChannelMismatch)));
        assert_eq!(h.gateway.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_bounded_without_response() {
        let mut h = connected(0).await;
        let start = Instant::now();

        let (reply_tx, reply_rx) = oneshot::channel();
        h.commands.send(Command::Disconnect(reply_tx)).await.unwrap();
        let request = h.gateway.next_sent().await.unwrap();
        assert_eq!(service(&request), 0x0209);

        reply_rx.await.unwrap();
        assert_elapsed(start, 2);
        h.task.await.unwrap();
        assert_eq!(*h.state.borrow(), ConnectionState::Closed);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.gateway.sent_count(), 2);
        assert_eq!(h.events.recv().await, Some(BusEvent::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_response_closes_early() {
        let mut h = connected(0).await;
        let (reply_tx, reply_rx) = oneshot::channel();
        h.commands.send(Command::Disconnect(reply_tx)).await.unwrap();
        h.gateway.next_sent().await.unwrap();

        let start = Instant::now();
        h.gateway.add_response(DisconnectResponse::new(CHANNEL, 0).to_frame().unwrap().to_vec());
        reply_rx.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_fails_once() {
        let mut h = start(0);
        let start = Instant::now();

        let err = (&mut h.ready).await.unwrap().unwrap_err();
        assert_eq!(err.code(), ErrorCode::HandshakeTimeout);
        assert_elapsed(start, 10);
        h.task.await.unwrap();

        assert_eq!(h.gateway.sent_count(), 1);
        assert_eq!(*h.failures.lock().unwrap(), [ErrorCode::HandshakeTimeout]);
        assert_eq!(*h.state.borrow(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_without_retry() {
        let mut h = start(0);
        h.gateway.next_sent().await.unwrap();
        h.gateway.add_response(connect_response(0, 0x24));

        let err = (&mut h.ready).await.unwrap().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConnectRejected(0x24));
        h.task.await.unwrap();
        assert_eq!(h.gateway.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_delay() {
        let mut h = start(5000);
        let start = Instant::now();

        assert_eq!(service(&h.gateway.next_sent().await.unwrap()), 0x0205);
        let retry = h.gateway.next_sent().await.unwrap();
        assert_eq!(service(&retry), 0x0205);
        assert_elapsed(start, 15);
        assert_eq!(*h.failures.lock().unwrap(), [ErrorCode::HandshakeTimeout]);

        h.gateway.add_response(connect_response(CHANNEL, 0x00));
        assert_eq!((&mut h.ready).await.unwrap().unwrap(), CHANNEL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_rejected_reconnects() {
        let mut h = connected(1000).await;
        assert_eq!(service(&h.gateway.next_sent().await.unwrap()), 0x0207);
        h.gateway.add_response(state_response(0x21));

        assert_eq!(
            h.events.recv().await,
            Some(BusEvent::ConnectionLost(ErrorCode::ConnectionStateRejected(0x21)))
        );
        assert_eq!(service(&h.gateway.next_sent().await.unwrap()), 0x0205);
        assert_eq!(*h.failures.lock().unwrap(), [ErrorCode::ConnectionStateRejected(0x21)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_without_retry() {
        let mut h = connected(0).await;
        h.gateway.next_sent().await.unwrap();

        assert_eq!(h.events.recv().await, Some(BusEvent::ConnectionLost(ErrorCode::HeartbeatTimeout)));
        assert_eq!(h.events.recv().await, Some(BusEvent::Closed));
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_disconnect() {
        let mut h = connected(0).await;
        let request = DisconnectRequest::new(CHANNEL, Hpai::from(MOCK_GATEWAY));
        h.gateway.add_response(request.to_frame().unwrap().to_vec());

        assert_eq!(
            h.events.recv().await,
            Some(BusEvent::ConnectionLost(ErrorCode::GatewayDisconnected))
        );
        let response = h.gateway.last_sent().unwrap().0;
        assert_eq!(response, [0x06, 0x10, 0x02, 0x0A, 0x00, 0x08, CHANNEL, 0x00]);
        assert_eq!(*h.failures.lock().unwrap(), [ErrorCode::GatewayDisconnected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_retrying() {
        let mut h = start(60_000);
        h.gateway.next_sent().await.unwrap();
        h.state.wait_for(|s| *s == ConnectionState::Retrying).await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        h.commands.send(Command::Disconnect(reply_tx)).await.unwrap();
        reply_rx.await.unwrap();
        assert!((&mut h.ready).await.is_err());
        assert_eq!(h.gateway.sent_count(), 1);
    }
}
