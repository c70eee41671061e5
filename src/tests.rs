//! Integration tests exercising the codec, commands, session, and
//! failover components together, including the literal wire exchanges a
//! 1.0 and a 1.1 broker would produce.

use crate::codec::{compile, Parser};
use crate::failover::Failover;
use crate::frame::{Frame, HeaderMap, Transmission};
use crate::protocol::{Command, ProtocolError, Version};
use crate::session::{Session, SessionConfig, SessionError, SessionState};
use bytes::Bytes;
use std::time::Duration;

fn no_headers() -> HeaderMap {
    HeaderMap::new()
}

/// Parse one frame out of a byte string, asserting nothing is left over.
fn parse_one(bytes: &[u8], version: Version) -> Frame {
    let mut parser = Parser::new(version);
    parser.feed(bytes);
    let frame = match parser.next_transmission().unwrap() {
        Some(Transmission::Frame(frame)) => frame,
        other => panic!("expected a frame, got {other:?}"),
    };
    assert_eq!(parser.next_transmission().unwrap(), None);
    parser.finish().unwrap();
    frame
}

#[test]
fn minimal_connect_against_a_1_0_broker() {
    let config = SessionConfig::new("tcp://localhost:61613")
        .with_versions(vec![Version::V1_0])
        .with_login("admin")
        .with_passcode("secret");
    let mut session: Session = Session::new(config);

    let connect = session.connect(&no_headers()).unwrap();
    let wire = compile(&connect, Version::V1_0).unwrap();
    assert_eq!(&wire[..], b"CONNECT\nlogin:admin\npasscode:secret\n\n\x00");

    let connected = parse_one(b"CONNECTED\nsession:s1\n\n\x00", Version::V1_0);
    session.connected(&connected).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.negotiated_version(), Some(Version::V1_0));
    assert_eq!(session.session_id(), Some("s1"));
}

#[test]
fn version_negotiation_and_send_against_a_1_1_broker() {
    let config = SessionConfig::new("tcp://localhost:61613").with_virtual_host("vh");
    let mut session: Session = Session::new(config);

    let connect = session.connect(&no_headers()).unwrap();
    assert_eq!(connect.header("accept-version"), Some("1.0,1.1"));
    assert_eq!(connect.header("host"), Some("vh"));

    let connected = parse_one(b"CONNECTED\nversion:1.1\n\n\x00", Version::V1_0);
    session.connected(&connected).unwrap();
    assert_eq!(session.negotiated_version(), Some(Version::V1_1));

    let send = session
        .send("/q", Bytes::from_static(b"hi"), None, &no_headers())
        .unwrap();
    let wire = compile(&send, Version::V1_1).unwrap();
    assert_eq!(&wire[..], b"SEND\ndestination:/q\ncontent-length:2\n\nhi\x00");
}

#[test]
fn duplicate_transaction_ids_are_refused() {
    let mut session = connected_session();
    session.begin("t1", &no_headers()).unwrap();
    assert!(matches!(
        session.begin("t1", &no_headers()),
        Err(SessionError::State { .. })
    ));
    session.commit("t1", &no_headers()).unwrap();
    assert!(matches!(
        session.commit("t1", &no_headers()),
        Err(SessionError::State { .. })
    ));
}

#[test]
fn binary_bodies_round_trip_with_content_length() {
    let mut session = connected_session();
    let body = Bytes::from_static(&[0x00, 0x01, 0x00]);
    let send = session
        .send("/q", body.clone(), None, &no_headers())
        .unwrap();
    let wire = compile(&send, Version::V1_1).unwrap();
    assert!(wire
        .windows(b"content-length:3".len())
        .any(|w| w == b"content-length:3"));

    let parsed = parse_one(&wire, Version::V1_1);
    assert_eq!(parsed.body, body);
}

#[test]
fn replay_preserves_subscribe_order_across_loss() {
    let mut session = connected_session();
    session.subscribe(Some("s1"), "/a", &no_headers(), ()).unwrap();
    session.subscribe(Some("s2"), "/b", &no_headers(), ()).unwrap();
    session.unsubscribe(Some("s1"), None, &no_headers()).unwrap();
    session.subscribe(Some("s3"), "/c", &no_headers(), ()).unwrap();

    session.transport_lost();
    session.reset();

    let plan: Vec<(String, String)> = session
        .replay()
        .into_iter()
        .map(|s| (s.destination, s.token))
        .collect();
    assert_eq!(
        plan,
        vec![
            ("/b".to_string(), "s2".to_string()),
            ("/c".to_string(), "s3".to_string()),
        ]
    );
}

#[test]
fn failover_cycle_delays() {
    let failover = Failover::from_uri(
        "failover:(tcp://a:1,tcp://b:2)?randomize=false&initialReconnectDelay=100&maxReconnectDelay=400&backOffMultiplier=2",
    )
    .unwrap();
    let observed: Vec<(String, u16, Duration)> = failover
        .targets()
        .take(5)
        .map(|t| (t.host, t.port, t.delay))
        .collect();
    assert_eq!(
        observed,
        vec![
            ("a".to_string(), 1, Duration::ZERO),
            ("b".to_string(), 2, Duration::from_millis(100)),
            ("a".to_string(), 1, Duration::from_millis(200)),
            ("b".to_string(), 2, Duration::from_millis(400)),
            ("a".to_string(), 1, Duration::from_millis(400)),
        ]
    );
}

#[test]
fn compiled_stream_reparses_under_any_chunking() {
    let mut frames = Vec::new();

    let mut connected = Frame::new(Command::Connected);
    connected.headers.push("version", "1.1");
    connected.headers.push("session", "s-1");
    frames.push(connected);

    let mut message = Frame::new(Command::Message);
    message.headers.push("destination", "/topic/prices");
    message.headers.push("message-id", "m:1");
    message.headers.push("subscription", "s-1");
    message.headers.push("note", "escaped\nvalue:with\\stuff");
    message.headers.push("content-length", "18");
    message.body = Bytes::from_static(b"payload \x00 with nul");
    frames.push(message);

    let mut receipt = Frame::new(Command::Receipt);
    receipt.headers.push("receipt-id", "r-77");
    frames.push(receipt);

    let mut stream = Vec::new();
    for frame in &frames {
        stream.extend_from_slice(&compile(frame, Version::V1_1).unwrap());
        // Heart-beats interleave freely between frames.
        stream.push(b'\n');
    }

    for chunk_size in [1, 2, 3, 5, 8, stream.len()] {
        let mut parser = Parser::new(Version::V1_1);
        let mut seen = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            parser.feed(chunk);
            while let Some(transmission) = parser.next_transmission().unwrap() {
                seen.push(transmission);
            }
        }
        parser.finish().unwrap();

        let expected: Vec<Transmission> = frames
            .iter()
            .flat_map(|f| [Transmission::Frame(f.clone()), Transmission::Heartbeat])
            .collect();
        assert_eq!(seen, expected, "chunk size {chunk_size}");
    }
}

#[test]
fn full_conversation_with_receipts_and_acks() {
    let mut session = connected_session();

    // Subscribe, asking for a receipt.
    let extra: HeaderMap = [("receipt", "r-sub")].into_iter().collect();
    let subscribe = session.subscribe(Some("s-1"), "/q", &extra, ()).unwrap();
    assert_eq!(subscribe.header("receipt"), Some("r-sub"));
    assert_eq!(session.outstanding_receipts(), ["r-sub".to_string()]);

    let receipt = parse_one(b"RECEIPT\nreceipt-id:r-sub\n\n\x00", Version::V1_1);
    session.receipt(&receipt).unwrap();
    assert!(session.outstanding_receipts().is_empty());

    // A message arrives and gets acknowledged inside a transaction.
    let message = parse_one(
        b"MESSAGE\ndestination:/q\nmessage-id:m-1\nsubscription:s-1\n\nhello\x00",
        Version::V1_1,
    );
    session.message(&message).unwrap();
    session.begin("t1", &no_headers()).unwrap();
    let ack = session.ack_frame(&message, Some("t1")).unwrap();
    assert_eq!(ack.header("message-id"), Some("m-1"));
    assert_eq!(ack.header("subscription"), Some("s-1"));
    assert_eq!(ack.header("transaction"), Some("t1"));
    session.commit("t1", &no_headers()).unwrap();

    // Graceful shutdown awaits the disconnect receipt.
    session.disconnect(Some("dc"), &no_headers()).unwrap();
    assert_eq!(session.state(), SessionState::Disconnecting);
    let receipt = parse_one(b"RECEIPT\nreceipt-id:dc\n\n\x00", Version::V1_1);
    session.receipt(&receipt).unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn vendor_headers_survive_build_compile_parse() {
    let mut session = connected_session();
    let extra: HeaderMap = [("amq-msg-type", "text"), ("x-trace", "abc:123")]
        .into_iter()
        .collect();
    let send = session
        .send("/q", Bytes::from_static(b"x"), None, &extra)
        .unwrap();
    let wire = compile(&send, Version::V1_1).unwrap();
    let parsed = parse_one(&wire, Version::V1_1);
    assert_eq!(parsed.header("amq-msg-type"), Some("text"));
    assert_eq!(parsed.header("x-trace"), Some("abc:123"));
}

#[test]
fn broker_error_during_connect_disconnects() {
    let config = SessionConfig::new("tcp://localhost:61613").with_virtual_host("vh");
    let mut session: Session = Session::new(config);
    session.connect(&no_headers()).unwrap();

    let error = parse_one(
        b"ERROR\nmessage:access denied\n\nCONNECT rejected\x00",
        Version::V1_0,
    );
    session.error(&error).unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn unknown_receipt_is_a_protocol_error() {
    let mut session = connected_session();
    let receipt = parse_one(b"RECEIPT\nreceipt-id:ghost\n\n\x00", Version::V1_1);
    let err = session.receipt(&receipt).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Protocol(ProtocolError::UnknownReceipt(_))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
}

/// A session already negotiated to 1.1, for tests that start connected.
fn connected_session() -> Session {
    let config = SessionConfig::new("tcp://localhost:61613").with_virtual_host("vh");
    let mut session: Session = Session::new(config);
    session.connect(&no_headers()).unwrap();
    let connected = parse_one(b"CONNECTED\nversion:1.1\n\n\x00", Version::V1_0);
    session.connected(&connected).unwrap();
    session
}
