//! Protocol tables for STOMP 1.0 and 1.1.
//!
//! Single source of truth for the wire verbs, header names, required-header
//! rules, and escape sequences of both supported protocol versions. The
//! codec, the command builders, and the session all consult these tables
//! instead of spelling out wire strings themselves.

use core::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Frame terminator octet.
pub const NUL: u8 = 0x00;

/// Wire names of the headers recognized by STOMP 1.0 and 1.1.
///
/// Vendor extension headers (e.g. `amq-msg-type`) are passed through
/// untouched and intentionally have no constant here.
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SERVER: &str = "server";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const TRANSACTION: &str = "transaction";
    pub const VERSION: &str = "version";
}

/// STOMP wire protocol version.
///
/// Ordering follows protocol age, so a descending sort yields versions in
/// preference order (newest first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
}

impl Version {
    pub const fn as_str(self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
        }
    }

    /// Header escaping was introduced in STOMP 1.1; 1.0 ships header
    /// octets verbatim.
    pub const fn escapes_headers(self) -> bool {
        matches!(self, Version::V1_1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(Version::V1_0),
            "1.1" => Ok(Version::V1_1),
            other => Err(ProtocolError::UnknownVersion(other.to_string())),
        }
    }
}

/// A STOMP frame verb, client- or server-originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    // Client verbs
    Connect,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // Server verbs
    Connected,
    Message,
    Receipt,
    Error,
}

/// Client verbs available under STOMP 1.0.
pub const CLIENT_COMMANDS_1_0: &[Command] = &[
    Command::Connect,
    Command::Send,
    Command::Subscribe,
    Command::Unsubscribe,
    Command::Ack,
    Command::Begin,
    Command::Commit,
    Command::Abort,
    Command::Disconnect,
];

/// Client verbs available under STOMP 1.1.
pub const CLIENT_COMMANDS_1_1: &[Command] = &[
    Command::Connect,
    Command::Send,
    Command::Subscribe,
    Command::Unsubscribe,
    Command::Ack,
    Command::Nack,
    Command::Begin,
    Command::Commit,
    Command::Abort,
    Command::Disconnect,
];

/// Server verbs, identical in both versions.
pub const SERVER_COMMANDS: &[Command] = &[
    Command::Connected,
    Command::Message,
    Command::Receipt,
    Command::Error,
];

impl Command {
    pub const fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Look up a verb from its wire token.
    pub fn from_bytes(token: &[u8]) -> Option<Command> {
        match token {
            b"CONNECT" => Some(Command::Connect),
            b"SEND" => Some(Command::Send),
            b"SUBSCRIBE" => Some(Command::Subscribe),
            b"UNSUBSCRIBE" => Some(Command::Unsubscribe),
            b"ACK" => Some(Command::Ack),
            b"NACK" => Some(Command::Nack),
            b"BEGIN" => Some(Command::Begin),
            b"COMMIT" => Some(Command::Commit),
            b"ABORT" => Some(Command::Abort),
            b"DISCONNECT" => Some(Command::Disconnect),
            b"CONNECTED" => Some(Command::Connected),
            b"MESSAGE" => Some(Command::Message),
            b"RECEIPT" => Some(Command::Receipt),
            b"ERROR" => Some(Command::Error),
            _ => None,
        }
    }

    pub fn is_client(self) -> bool {
        CLIENT_COMMANDS_1_1.contains(&self)
    }

    pub fn is_server(self) -> bool {
        SERVER_COMMANDS.contains(&self)
    }

    /// Whether this verb exists in the given protocol version.
    pub fn available_in(self, version: Version) -> bool {
        match version {
            Version::V1_0 => CLIENT_COMMANDS_1_0.contains(&self) || self.is_server(),
            Version::V1_1 => CLIENT_COMMANDS_1_1.contains(&self) || self.is_server(),
        }
    }

    /// Verbs whose frames may carry a body. All others must be sent with
    /// an empty body per the protocol.
    pub const fn allows_body(self) -> bool {
        matches!(self, Command::Send | Command::Message | Command::Error)
    }

    /// Headers the given version requires on this verb.
    pub fn required_headers(self, version: Version) -> &'static [&'static str] {
        use self::headers::*;
        match (self, version) {
            (Command::Connect, Version::V1_0) => &[],
            (Command::Connect, Version::V1_1) => &[ACCEPT_VERSION, HOST],
            (Command::Send, _) => &[DESTINATION],
            (Command::Subscribe, Version::V1_0) => &[DESTINATION],
            (Command::Subscribe, Version::V1_1) => &[DESTINATION, ID],
            (Command::Unsubscribe, Version::V1_0) => &[],
            (Command::Unsubscribe, Version::V1_1) => &[ID],
            (Command::Ack, Version::V1_0) => &[MESSAGE_ID],
            (Command::Ack, Version::V1_1) => &[MESSAGE_ID, SUBSCRIPTION],
            (Command::Nack, _) => &[MESSAGE_ID, SUBSCRIPTION],
            (Command::Begin, _) | (Command::Commit, _) | (Command::Abort, _) => &[TRANSACTION],
            (Command::Disconnect, _) => &[],
            // CONNECTED carries no mandatory headers: a missing `version`
            // means the broker only speaks 1.0.
            (Command::Connected, _) => &[],
            (Command::Message, Version::V1_0) => &[DESTINATION, MESSAGE_ID],
            (Command::Message, Version::V1_1) => &[DESTINATION, MESSAGE_ID, SUBSCRIPTION],
            (Command::Receipt, _) => &[RECEIPT_ID],
            (Command::Error, _) => &[],
        }
    }

    /// Headers the library sets itself; callers must not supply them as
    /// extension headers.
    pub fn reserved_headers(self) -> &'static [&'static str] {
        match self {
            Command::Send => &[headers::MESSAGE_ID],
            _ => &[],
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// STOMP 1.1 header escape table: raw octet and the character following
/// the backslash on the wire.
pub const ESCAPES: &[(u8, u8)] = &[(b'\n', b'n'), (b':', b'c'), (b'\\', b'\\')];

/// A syntactically valid frame violated the protocol tables, or a builder
/// was asked for something the negotiated version cannot express.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown STOMP version '{0}'")]
    UnknownVersion(String),

    #[error("{command} frame is missing the required '{header}' header")]
    MissingHeader {
        command: Command,
        header: &'static str,
    },

    #[error("'{header}' is managed by the library and must not be supplied on {command}")]
    ReservedHeader { command: Command, header: String },

    #[error("{command} is not part of STOMP {version}")]
    UnsupportedCommand { command: Command, version: Version },

    #[error("unexpected {0} frame from the broker")]
    UnexpectedFrame(Command),

    #[error("heart-beats are not part of STOMP {0}")]
    HeartBeatUnsupported(Version),

    #[error("RECEIPT '{0}' does not match any outstanding receipt")]
    UnknownReceipt(String),

    #[error("MESSAGE for unknown subscription '{0}'")]
    UnknownSubscription(String),

    #[error("malformed '{header}' header value '{value}'")]
    MalformedHeader { header: &'static str, value: String },

    #[error("at least one protocol version must be requested")]
    NoVersionsRequested,
}
