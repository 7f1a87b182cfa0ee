//! End-to-end tests against a fake gateway on the loopback interface.
//!
//! The gateway side is a plain tokio UDP socket scripted with the crate's own
//! service builders, so these tests exercise the real UDP transport, the
//! session task and the listener together.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use knx_listener::protocol::frame::{Hpai, KnxnetIpFrame, KnxnetIpHeader};
use knx_listener::protocol::services::{
    ConnectResponse, ConnectionHeader, DisconnectResponse, TunnelingRequest,
};
use knx_listener::protocol::ServiceType;
use knx_listener::{
    encode_address, BusEvent, BusListener, ConnectionState, ErrorCode, GroupAddress, IpEndpoint,
    Ipv4Addr, ListenerOptions,
};

const CHANNEL: u8 = 0x2C;
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// `L_Data.ind` GroupValue_Write of `0c ff` to 1/2/3 from 1.1.5
const WRITE_CEMI: [u8; 13] = [
    0x29, 0x00, 0xBC, 0xE0, 0x11, 0x05, 0x0A, 0x03, 0x03, 0x00, 0x80, 0x0C, 0xFF,
];

async fn fake_gateway() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

async fn recv(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = [0u8; 256];
    let (n, peer) = timeout(TEST_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("gateway timed out")
        .unwrap();
    (buf[..n].to_vec(), peer)
}

fn service(frame: &[u8]) -> ServiceType {
    KnxnetIpFrame::parse(frame).unwrap().service_type()
}

#[tokio::test]
async fn test_tunnel_session_over_udp() {
    let (gateway, port) = fake_gateway().await;
    let gateway_endpoint = IpEndpoint::new(Ipv4Addr::LOCALHOST, port);

    let script = tokio::spawn(async move {
        let (request, peer) = recv(&gateway).await;
        assert_eq!(request.len(), 26);
        assert_eq!(service(&request), ServiceType::ConnectRequest);
        // Control endpoint announces the client's own socket
        let control = Hpai::parse(&request[6..]).unwrap();
        assert_eq!(control.endpoint().port, peer.port());
        assert_eq!(&request[22..], &[0x04, 0x04, 0x02, 0x00]);

        let response = ConnectResponse {
            channel_id: CHANNEL,
            status: 0,
            data_endpoint: Hpai::from(gateway_endpoint),
            crd: Some([0x04, 0x04, 0x11, 0xFF]),
        };
        gateway.send_to(&response.to_frame().unwrap(), peer).await.unwrap();

        let indication = TunnelingRequest::new(ConnectionHeader::new(CHANNEL, 0), &WRITE_CEMI);
        gateway.send_to(&indication.to_frame().unwrap(), peer).await.unwrap();

        let (ack, _) = recv(&gateway).await;
        assert_eq!(ack, [0x06, 0x10, 0x04, 0x21, 0x00, 0x0B, 0x04, CHANNEL, 0x00, 0x00, 0x00]);

        let (disconnect, _) = recv(&gateway).await;
        assert_eq!(service(&disconnect), ServiceType::DisconnectRequest);
        assert_eq!(disconnect[6], CHANNEL);
        let response = DisconnectResponse::new(CHANNEL, 0);
        gateway.send_to(&response.to_frame().unwrap(), peer).await.unwrap();
    });

    let listener = BusListener::new();
    let mut events = listener.subscribe();
    timeout(TEST_TIMEOUT, listener.bind(Ipv4Addr::LOCALHOST, port, ListenerOptions::new(0)))
        .await
        .expect("bind timed out")
        .unwrap();
    assert_eq!(listener.state(), ConnectionState::Connected);

    assert_eq!(events.recv().await, Some(BusEvent::Connected { channel_id: CHANNEL }));
    let Some(BusEvent::Query(query)) = timeout(TEST_TIMEOUT, events.recv()).await.unwrap() else {
        panic!("expected a query");
    };
    assert_eq!(query.destination(), GroupAddress::new(1, 2, 3).unwrap());
    assert_eq!(query.to_string(), "write data 0c:ff to 1/2/3");

    listener.disconnect().await;
    assert_eq!(listener.state(), ConnectionState::Closed);
    assert_eq!(events.recv().await, Some(BusEvent::Closed));
    script.await.unwrap();
}

#[tokio::test]
async fn test_rejected_connection_fails_bind() {
    let (gateway, port) = fake_gateway().await;

    let script = tokio::spawn(async move {
        let (_, peer) = recv(&gateway).await;
        let busy = [0x06, 0x10, 0x02, 0x06, 0x00, 0x08, 0x00, 0x24];
        gateway.send_to(&busy, peer).await.unwrap();
    });

    let failures = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&failures);
    let options = ListenerOptions::new(0).on_failure(move |e| sink.lock().unwrap().push(e.code()));

    let listener = BusListener::new();
    let err = timeout(TEST_TIMEOUT, listener.bind(Ipv4Addr::LOCALHOST, port, options))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectRejected(0x24));
    assert_eq!(*failures.lock().unwrap(), [ErrorCode::ConnectRejected(0x24)]);
    assert!(!listener.is_bound());
    script.await.unwrap();
}

#[test]
fn test_group_address_text_round_trip() {
    for raw in [0x0000, 0x0A03, 0x7FFF, 0xFFFF] {
        let text = encode_address(raw);
        let parsed: GroupAddress = text.parse().unwrap();
        assert_eq!(u16::from(parsed), raw);
    }
    assert_eq!(encode_address(0x0A03), "1/2/3");
}

#[test]
fn test_short_header_rejected() {
    for len in 0..6 {
        let data = [0x06, 0x10, 0x02, 0x06, 0x00, 0x08];
        let err = KnxnetIpHeader::parse(&data[..len]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedHeader);
    }
}

#[test]
fn test_connect_response_round_trip() {
    let response = ConnectResponse {
        channel_id: 0x15,
        status: 0,
        data_endpoint: Hpai::new([192, 168, 1, 10], 3671),
        crd: None,
    };
    let frame = response.to_frame().unwrap();
    let parsed = KnxnetIpFrame::parse(&frame).unwrap();
    assert_eq!(parsed.service_type(), ServiceType::ConnectResponse);

    let decoded = ConnectResponse::parse(parsed.body()).unwrap();
    assert_eq!(decoded.channel_id, 0x15);
    assert!(decoded.is_ok());
    assert_eq!(decoded.data_endpoint.endpoint().to_string(), "192.168.1.10:3671");
}
