//! Stateless command factory: builders for every client-originated frame
//! and validators for every server-originated frame.
//!
//! Everything here is a pure function over the tables in
//! [`crate::protocol`]. Builders enforce the headers the requested version
//! needs, merge caller-supplied extension headers verbatim (vendor
//! prefixes and all), and reject headers the library manages itself.
//! Validators check inbound frames and hand back typed views. Keeping this
//! layer free of state lets it be tested without a session and reused by
//! alternative session implementations.

use crate::frame::{Frame, HeaderMap, Transmission};
use crate::protocol::{headers, Command, ProtocolError, Version};
use bytes::Bytes;

/// Build a CONNECT frame for the requested version set.
///
/// `accept-version` is emitted as a comma-separated list when anything
/// newer than 1.0 is requested; a 1.0-only request produces the bare 1.0
/// CONNECT. The `host` virtual host and the `heart-beat` offer are 1.1
/// concepts and are only written alongside `accept-version`.
pub fn connect(
    versions: &[Version],
    virtual_host: Option<&str>,
    login: Option<&str>,
    passcode: Option<&str>,
    heart_beat: Option<(u32, u32)>,
    extra: &HeaderMap,
) -> Result<Frame, ProtocolError> {
    if versions.is_empty() {
        return Err(ProtocolError::NoVersionsRequested);
    }
    let mut frame = Frame::new(Command::Connect);
    let beyond_1_0 = versions.iter().any(|v| *v != Version::V1_0);
    if beyond_1_0 {
        let mut sorted = versions.to_vec();
        sorted.sort();
        sorted.dedup();
        let list = sorted
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(",");
        frame.headers.push(headers::ACCEPT_VERSION, list);
        let host = virtual_host.ok_or(ProtocolError::MissingHeader {
            command: Command::Connect,
            header: headers::HOST,
        })?;
        frame.headers.push(headers::HOST, host);
    }
    if let Some(login) = login {
        frame.headers.push(headers::LOGIN, login);
    }
    if let Some(passcode) = passcode {
        frame.headers.push(headers::PASSCODE, passcode);
    }
    if beyond_1_0 {
        if let Some((cx, cy)) = heart_beat {
            frame.headers.push(headers::HEART_BEAT, format!("{cx},{cy}"));
        }
    }
    merge_extra(&mut frame, extra)?;
    Ok(frame)
}

/// Build a SEND frame. `message-id` is broker-assigned and rejected if
/// supplied as an extension header.
pub fn send(
    destination: &str,
    body: Bytes,
    transaction: Option<&str>,
    extra: &HeaderMap,
) -> Result<Frame, ProtocolError> {
    let mut frame = Frame::new(Command::Send);
    frame.headers.push(headers::DESTINATION, destination);
    if let Some(transaction) = transaction {
        frame.headers.push(headers::TRANSACTION, transaction);
    }
    merge_extra(&mut frame, extra)?;
    frame.body = body;
    Ok(frame)
}

/// Build a SUBSCRIBE frame. 1.1 requires the subscription token on the
/// wire; under 1.0 the `id` header is only written when the caller chose
/// one.
pub fn subscribe(
    version: Version,
    token: Option<&str>,
    destination: &str,
    extra: &HeaderMap,
) -> Result<Frame, ProtocolError> {
    let mut frame = Frame::new(Command::Subscribe);
    frame.headers.push(headers::DESTINATION, destination);
    match version {
        Version::V1_1 => {
            let token = token.ok_or(ProtocolError::MissingHeader {
                command: Command::Subscribe,
                header: headers::ID,
            })?;
            frame.headers.push(headers::ID, token);
        }
        Version::V1_0 => {
            if let Some(token) = token {
                frame.headers.push(headers::ID, token);
            }
        }
    }
    merge_extra(&mut frame, extra)?;
    Ok(frame)
}

/// Build an UNSUBSCRIBE frame, by token (1.1, or 1.0 when one was chosen)
/// or by destination (1.0 fallback).
pub fn unsubscribe(
    version: Version,
    token: Option<&str>,
    destination: Option<&str>,
    extra: &HeaderMap,
) -> Result<Frame, ProtocolError> {
    let mut frame = Frame::new(Command::Unsubscribe);
    match (version, token, destination) {
        (_, Some(token), _) => frame.headers.push(headers::ID, token),
        (Version::V1_1, None, _) => {
            return Err(ProtocolError::MissingHeader {
                command: Command::Unsubscribe,
                header: headers::ID,
            });
        }
        (Version::V1_0, None, Some(destination)) => {
            frame.headers.push(headers::DESTINATION, destination);
        }
        (Version::V1_0, None, None) => {
            return Err(ProtocolError::MissingHeader {
                command: Command::Unsubscribe,
                header: headers::DESTINATION,
            });
        }
    }
    merge_extra(&mut frame, extra)?;
    Ok(frame)
}

/// Build an ACK frame. 1.1 additionally scopes the acknowledgment to a
/// subscription token.
pub fn ack(
    version: Version,
    message_id: &str,
    subscription: Option<&str>,
    transaction: Option<&str>,
    extra: &HeaderMap,
) -> Result<Frame, ProtocolError> {
    build_acknowledgment(Command::Ack, version, message_id, subscription, transaction, extra)
}

/// Build a NACK frame. NACK does not exist in STOMP 1.0.
pub fn nack(
    version: Version,
    message_id: &str,
    subscription: Option<&str>,
    transaction: Option<&str>,
    extra: &HeaderMap,
) -> Result<Frame, ProtocolError> {
    if !Command::Nack.available_in(version) {
        return Err(ProtocolError::UnsupportedCommand {
            command: Command::Nack,
            version,
        });
    }
    build_acknowledgment(Command::Nack, version, message_id, subscription, transaction, extra)
}

fn build_acknowledgment(
    command: Command,
    version: Version,
    message_id: &str,
    subscription: Option<&str>,
    transaction: Option<&str>,
    extra: &HeaderMap,
) -> Result<Frame, ProtocolError> {
    let mut frame = Frame::new(command);
    frame.headers.push(headers::MESSAGE_ID, message_id);
    match (version, subscription) {
        (_, Some(subscription)) => frame.headers.push(headers::SUBSCRIPTION, subscription),
        (Version::V1_1, None) => {
            return Err(ProtocolError::MissingHeader {
                command,
                header: headers::SUBSCRIPTION,
            });
        }
        (Version::V1_0, None) => {}
    }
    if let Some(transaction) = transaction {
        frame.headers.push(headers::TRANSACTION, transaction);
    }
    merge_extra(&mut frame, extra)?;
    Ok(frame)
}

pub fn begin(transaction: &str, extra: &HeaderMap) -> Result<Frame, ProtocolError> {
    transaction_frame(Command::Begin, transaction, extra)
}

pub fn commit(transaction: &str, extra: &HeaderMap) -> Result<Frame, ProtocolError> {
    transaction_frame(Command::Commit, transaction, extra)
}

pub fn abort(transaction: &str, extra: &HeaderMap) -> Result<Frame, ProtocolError> {
    transaction_frame(Command::Abort, transaction, extra)
}

fn transaction_frame(
    command: Command,
    transaction: &str,
    extra: &HeaderMap,
) -> Result<Frame, ProtocolError> {
    let mut frame = Frame::new(command);
    frame.headers.push(headers::TRANSACTION, transaction);
    merge_extra(&mut frame, extra)?;
    Ok(frame)
}

/// Build a DISCONNECT frame, optionally asking for a closing receipt.
pub fn disconnect(receipt: Option<&str>, extra: &HeaderMap) -> Result<Frame, ProtocolError> {
    let mut frame = Frame::new(Command::Disconnect);
    if let Some(receipt) = receipt {
        frame.headers.push(headers::RECEIPT, receipt);
    }
    merge_extra(&mut frame, extra)?;
    Ok(frame)
}

/// Produce an outgoing heart-beat. Heart-beats entered the protocol with
/// STOMP 1.1.
pub fn beat(version: Version) -> Result<Transmission, ProtocolError> {
    if !version.escapes_headers() {
        return Err(ProtocolError::HeartBeatUnsupported(version));
    }
    Ok(Transmission::Heartbeat)
}

fn merge_extra(frame: &mut Frame, extra: &HeaderMap) -> Result<(), ProtocolError> {
    for (name, value) in extra.iter() {
        if frame.command.reserved_headers().contains(&name) {
            return Err(ProtocolError::ReservedHeader {
                command: frame.command,
                header: name.to_string(),
            });
        }
        frame.headers.push(name, value);
    }
    Ok(())
}

/// Validated view of a CONNECTED frame.
///
/// A missing `version` header means the broker only speaks 1.0; the
/// session decides whether that satisfies the requested set.
#[derive(Debug, PartialEq, Eq)]
pub struct Connected<'a> {
    pub version: Option<&'a str>,
    pub session: Option<&'a str>,
    pub server: Option<&'a str>,
    pub heart_beat: Option<(u32, u32)>,
}

pub fn connected(frame: &Frame) -> Result<Connected<'_>, ProtocolError> {
    expect_command(frame, Command::Connected)?;
    let heart_beat = frame
        .header(headers::HEART_BEAT)
        .map(parse_heart_beat)
        .transpose()?;
    Ok(Connected {
        version: frame.header(headers::VERSION),
        session: frame.header(headers::SESSION),
        server: frame.header(headers::SERVER),
        heart_beat,
    })
}

/// Validated view of a MESSAGE frame.
#[derive(Debug, PartialEq, Eq)]
pub struct MessageView<'a> {
    pub destination: &'a str,
    pub message_id: &'a str,
    pub subscription: Option<&'a str>,
    pub body: &'a Bytes,
}

pub fn message<'a>(frame: &'a Frame, version: Version) -> Result<MessageView<'a>, ProtocolError> {
    expect_command(frame, Command::Message)?;
    let destination = require(frame, headers::DESTINATION)?;
    let message_id = require(frame, headers::MESSAGE_ID)?;
    let subscription = match version {
        Version::V1_1 => Some(require(frame, headers::SUBSCRIPTION)?),
        Version::V1_0 => frame.header(headers::SUBSCRIPTION),
    };
    Ok(MessageView {
        destination,
        message_id,
        subscription,
        body: &frame.body,
    })
}

/// Validate a RECEIPT frame and return its `receipt-id`.
pub fn receipt(frame: &Frame) -> Result<&str, ProtocolError> {
    expect_command(frame, Command::Receipt)?;
    require(frame, headers::RECEIPT_ID)
}

/// Validated view of an ERROR frame.
#[derive(Debug, PartialEq, Eq)]
pub struct ErrorView<'a> {
    pub message: Option<&'a str>,
    pub body: &'a Bytes,
}

pub fn error(frame: &Frame) -> Result<ErrorView<'_>, ProtocolError> {
    expect_command(frame, Command::Error)?;
    Ok(ErrorView {
        message: frame.header(headers::MESSAGE),
        body: &frame.body,
    })
}

fn expect_command(frame: &Frame, expected: Command) -> Result<(), ProtocolError> {
    if frame.command != expected {
        return Err(ProtocolError::UnexpectedFrame(frame.command));
    }
    Ok(())
}

fn require<'a>(frame: &'a Frame, header: &'static str) -> Result<&'a str, ProtocolError> {
    frame.header(header).ok_or(ProtocolError::MissingHeader {
        command: frame.command,
        header,
    })
}

fn parse_heart_beat(value: &str) -> Result<(u32, u32), ProtocolError> {
    let malformed = || ProtocolError::MalformedHeader {
        header: headers::HEART_BEAT,
        value: value.to_string(),
    };
    let (cx, cy) = value.split_once(',').ok_or_else(malformed)?;
    let cx = cx.trim().parse().map_err(|_| malformed())?;
    let cy = cy.trim().parse().map_err(|_| malformed())?;
    Ok((cx, cy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_1_0_is_bare() {
        let frame = connect(
            &[Version::V1_0],
            None,
            Some("admin"),
            Some("secret"),
            Some((1000, 1000)),
            &HeaderMap::new(),
        )
        .unwrap();
        assert_eq!(frame.header(headers::LOGIN), Some("admin"));
        assert_eq!(frame.header(headers::PASSCODE), Some("secret"));
        assert!(!frame.headers.contains(headers::ACCEPT_VERSION));
        assert!(!frame.headers.contains(headers::HOST));
        assert!(!frame.headers.contains(headers::HEART_BEAT));
    }

    #[test]
    fn connect_1_1_negotiates() {
        let frame = connect(
            &[Version::V1_1, Version::V1_0],
            Some("vh"),
            None,
            None,
            Some((0, 2000)),
            &HeaderMap::new(),
        )
        .unwrap();
        assert_eq!(frame.header(headers::ACCEPT_VERSION), Some("1.0,1.1"));
        assert_eq!(frame.header(headers::HOST), Some("vh"));
        assert_eq!(frame.header(headers::HEART_BEAT), Some("0,2000"));
    }

    #[test]
    fn connect_1_1_requires_virtual_host() {
        let err = connect(&[Version::V1_1], None, None, None, None, &HeaderMap::new()).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MissingHeader {
                command: Command::Connect,
                header: headers::HOST
            }
        );
    }

    #[test]
    fn connect_requires_a_version() {
        assert_eq!(
            connect(&[], None, None, None, None, &HeaderMap::new()).unwrap_err(),
            ProtocolError::NoVersionsRequested
        );
    }

    #[test]
    fn send_rejects_reserved_header() {
        let extra: HeaderMap = [("message-id", "forged")].into_iter().collect();
        let err = send("/q", Bytes::new(), None, &extra).unwrap_err();
        assert!(matches!(err, ProtocolError::ReservedHeader { .. }));
    }

    #[test]
    fn send_passes_vendor_headers_through() {
        let extra: HeaderMap = [("amq-msg-type", "text"), ("priority", "9")]
            .into_iter()
            .collect();
        let frame = send("/q", Bytes::from_static(b"x"), Some("tx-1"), &extra).unwrap();
        assert_eq!(frame.header(headers::TRANSACTION), Some("tx-1"));
        assert_eq!(frame.header("amq-msg-type"), Some("text"));
        assert_eq!(frame.header("priority"), Some("9"));
    }

    #[test]
    fn subscribe_token_rules() {
        let frame = subscribe(Version::V1_1, Some("s-1"), "/q", &HeaderMap::new()).unwrap();
        assert_eq!(frame.header(headers::ID), Some("s-1"));

        let err = subscribe(Version::V1_1, None, "/q", &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingHeader { .. }));

        let frame = subscribe(Version::V1_0, None, "/q", &HeaderMap::new()).unwrap();
        assert!(!frame.headers.contains(headers::ID));
    }

    #[test]
    fn unsubscribe_falls_back_to_destination_under_1_0() {
        let frame = unsubscribe(Version::V1_0, None, Some("/q"), &HeaderMap::new()).unwrap();
        assert_eq!(frame.header(headers::DESTINATION), Some("/q"));
        assert!(unsubscribe(Version::V1_1, None, Some("/q"), &HeaderMap::new()).is_err());
        assert!(unsubscribe(Version::V1_0, None, None, &HeaderMap::new()).is_err());
    }

    #[test]
    fn ack_requires_subscription_under_1_1() {
        let err = ack(Version::V1_1, "m-1", None, None, &HeaderMap::new()).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MissingHeader {
                command: Command::Ack,
                header: headers::SUBSCRIPTION
            }
        );
        let frame = ack(Version::V1_0, "m-1", None, Some("tx"), &HeaderMap::new()).unwrap();
        assert_eq!(frame.header(headers::MESSAGE_ID), Some("m-1"));
        assert_eq!(frame.header(headers::TRANSACTION), Some("tx"));
    }

    #[test]
    fn nack_and_beat_fail_under_1_0() {
        assert_eq!(
            nack(Version::V1_0, "m-1", Some("s"), None, &HeaderMap::new()).unwrap_err(),
            ProtocolError::UnsupportedCommand {
                command: Command::Nack,
                version: Version::V1_0
            }
        );
        assert!(matches!(
            beat(Version::V1_0),
            Err(ProtocolError::HeartBeatUnsupported(Version::V1_0))
        ));
        assert_eq!(beat(Version::V1_1).unwrap(), Transmission::Heartbeat);
    }

    #[test]
    fn connected_view() {
        let mut frame = Frame::new(Command::Connected);
        frame.headers.push("version", "1.1");
        frame.headers.push("session", "s1");
        frame.headers.push("heart-beat", "1000,2000");
        let view = connected(&frame).unwrap();
        assert_eq!(view.version, Some("1.1"));
        assert_eq!(view.session, Some("s1"));
        assert_eq!(view.server, None);
        assert_eq!(view.heart_beat, Some((1000, 2000)));
    }

    #[test]
    fn connected_rejects_bad_heart_beat() {
        let mut frame = Frame::new(Command::Connected);
        frame.headers.push("heart-beat", "fast");
        assert!(matches!(
            connected(&frame),
            Err(ProtocolError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn message_requires_subscription_only_under_1_1() {
        let mut frame = Frame::new(Command::Message);
        frame.headers.push("destination", "/q");
        frame.headers.push("message-id", "m-1");
        assert!(matches!(
            message(&frame, Version::V1_1),
            Err(ProtocolError::MissingHeader {
                header: headers::SUBSCRIPTION,
                ..
            })
        ));
        let view = message(&frame, Version::V1_0).unwrap();
        assert_eq!(view.message_id, "m-1");
        assert_eq!(view.subscription, None);
    }

    #[test]
    fn receipt_requires_id() {
        let frame = Frame::new(Command::Receipt);
        assert!(matches!(
            receipt(&frame),
            Err(ProtocolError::MissingHeader { .. })
        ));
    }

    #[test]
    fn validators_reject_wrong_command() {
        let frame = Frame::new(Command::Message);
        assert_eq!(
            connected(&frame).unwrap_err(),
            ProtocolError::UnexpectedFrame(Command::Message)
        );
    }

    #[test]
    fn error_view_is_lenient() {
        let mut frame = Frame::new(Command::Error);
        frame.headers.push("message", "bad destination");
        frame.body = Bytes::from_static(b"detail");
        let view = error(&frame).unwrap();
        assert_eq!(view.message, Some("bad destination"));
        assert_eq!(&view.body[..], b"detail");
    }
}
