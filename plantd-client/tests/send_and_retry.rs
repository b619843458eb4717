//! Integration tests against a hand-rolled fake broker: exercises the
//! client's happy path, MMI discovery, and timeout-with-retry behavior
//! (spec §8 scenarios 1, 2, and the boundary "unknown service" case).

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncReadExt, AsyncWriteExt};
use plantd_client::Client;
use plantd_core::error::PlantdError;
use plantd_protocol::codec::encode_multipart;
use plantd_protocol::message::Message;
use plantd_protocol::session::{Session, SessionEvent};

async fn bind_ephemeral() -> (compio::net::TcpListener, SocketAddr) {
    let port = portpicker::pick_unused_port().expect("free port");
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let listener = compio::net::TcpListener::bind(addr).await.unwrap();
    (listener, addr)
}

async fn recv_one(stream: &mut compio::net::TcpStream) -> Message {
    let mut session = Session::new();
    loop {
        let buf = vec![0u8; 4096];
        let BufResult(n, buf) = stream.read(buf).await;
        let n = n.unwrap();
        assert!(n > 0, "peer closed before sending a full message");
        for event in session.on_bytes(Bytes::copy_from_slice(&buf[..n])) {
            if let SessionEvent::Message(message) = event {
                return message;
            }
        }
    }
}

async fn send_one(stream: &mut compio::net::TcpStream, message: &Message) {
    let mut buf = BytesMut::new();
    encode_multipart(&message.encode(), &mut buf);
    let BufResult(res, _) = stream.write_all(buf.freeze().to_vec()).await;
    res.unwrap();
}

#[compio::test]
async fn happy_path_request_reply() {
    let (listener, addr) = bind_ephemeral().await;

    let server = compio::runtime::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = recv_one(&mut stream).await;
        let Message::ClientRequest { service, payload } = request else {
            panic!("expected a ClientRequest");
        };
        assert_eq!(&service[..], b"echo");
        assert_eq!(payload, vec![Bytes::from_static(b"hello")]);

        let reply = Message::ClientReply {
            service,
            payload: vec![Bytes::from_static(b"world")],
        };
        send_one(&mut stream, &reply).await;
    });

    let mut client = Client::connect(addr).await.unwrap();
    let reply = client
        .send("echo", vec![Bytes::from_static(b"hello")])
        .await
        .unwrap();
    assert_eq!(reply, vec![Bytes::from_static(b"world")]);

    server.await.unwrap();
}

#[compio::test]
async fn mmi_discovery_reports_present_and_absent_services() {
    let (listener, addr) = bind_ephemeral().await;

    let server = compio::runtime::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        for _ in 0..2 {
            let request = recv_one(&mut stream).await;
            let Message::ClientRequest { service, payload } = request else {
                panic!("expected a ClientRequest");
            };
            assert_eq!(&service[..], b"mmi.service");
            let queried = &payload[0];
            let status: &[u8] = if queried.as_ref() == b"S" { b"200" } else { b"404" };
            let reply = Message::ClientReply {
                service,
                payload: vec![Bytes::from_static(status)],
            };
            send_one(&mut stream, &reply).await;
        }
    });

    let mut client = Client::connect(addr).await.unwrap();
    assert!(client.lookup_service("S").await.unwrap());
    assert!(!client.lookup_service("Q").await.unwrap());

    server.await.unwrap();
}

#[compio::test]
async fn timeout_exhausts_retries_then_fails() {
    let (listener, addr) = bind_ephemeral().await;

    // Accept connections and never reply -- every retry's reconnect
    // lands here too, so just keep accepting and dropping the requests.
    compio::runtime::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let _ = recv_one(&mut stream).await;
            // Hold the connection open without replying.
            compio::time::sleep(Duration::from_secs(5)).await;
        }
    })
    .detach();

    let mut client = Client::connect(addr).await.unwrap();
    client.set_timeout(Duration::from_millis(30));
    client.set_retries(1);

    let err = client
        .send("unknown-service", vec![Bytes::from_static(b"x")])
        .await
        .unwrap_err();
    assert!(matches!(err, PlantdError::Timeout(_)));
}
