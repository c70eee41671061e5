//! Transport-agnostic protocol engine for STOMP 1.0 and 1.1 clients.
//!
//! The crate contains the four pieces every STOMP client needs and no
//! I/O: a wire codec ([`codec`]), a stateless command factory
//! ([`commands`]), a session state machine ([`session`]), and a failover
//! target generator ([`failover`]). A transport — blocking socket,
//! evented, whatever — feeds bytes in, writes the frames the session
//! hands back, and owns all timing.
//!
//! ```
//! use stomp::frame::HeaderMap;
//! use stomp::{Parser, Session, SessionConfig, Transmission, Version};
//!
//! # fn main() -> Result<(), stomp::Error> {
//! let config = SessionConfig::new("tcp://localhost:61613")
//!     .with_virtual_host("broker")
//!     .with_login("admin")
//!     .with_passcode("secret");
//! let mut session: Session = Session::new(config);
//!
//! // CONNECT: the returned frame is what the transport writes.
//! let connect = session.connect(&HeaderMap::new())?;
//! let wire = stomp::compile(&connect, Version::V1_0)?;
//! assert!(wire.starts_with(b"CONNECT\n"));
//!
//! // Feed whatever the broker answers back through the parser.
//! let mut parser = Parser::new(Version::V1_0);
//! parser.feed(b"CONNECTED\nversion:1.1\nsession:s-1\n\n\x00");
//! if let Some(Transmission::Frame(frame)) = parser.next_transmission()? {
//!     session.connected(&frame)?;
//! }
//! assert_eq!(session.negotiated_version(), Some(Version::V1_1));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod commands;
pub mod failover;
pub mod frame;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod tests;

// Re-export the types a transport touches on every frame.
pub use codec::{compile, compile_transmission, ParseError, Parser};
pub use failover::{Failover, FailoverError, FailoverIter, FailoverOptions, FailoverUri, Target};
pub use frame::{Frame, HeaderMap, Transmission};
pub use protocol::{Command, ProtocolError, Version};
pub use session::{
    ResetReport, Session, SessionConfig, SessionError, SessionState, Subscription,
};

/// Error returned by the convenience [`Result`] alias.
///
/// The components keep their own typed errors (`ParseError`,
/// `ProtocolError`, `SessionError`, `FailoverError`); boxing is only for
/// callers that funnel them into one channel, such as a transport loop.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for STOMP operations.
pub type Result<T> = std::result::Result<T, Error>;
