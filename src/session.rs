// ABOUTME: Connection lifecycle state machine for a client-side STOMP session
// ABOUTME: Tracks version negotiation, subscriptions, transactions, and receipts without performing I/O

//! The session is the stateful heart of the client: it owns the
//! subscription, transaction, and receipt registries and walks the
//! connection lifecycle
//!
//! ```text
//! INITIAL -> CONNECTING -> CONNECTED -> DISCONNECTING -> DISCONNECTED
//! ```
//!
//! Every method is synchronous and I/O-free. Outbound operations return
//! the [`Frame`] the transport should write and update the registries
//! atomically; inbound operations consume frames the transport read. The
//! surrounding transport owns scheduling, timeouts, and the socket; one
//! session must only ever be driven from one place at a time.

use crate::commands;
use crate::frame::{Frame, HeaderMap, Transmission};
use crate::protocol::{headers, Command, ProtocolError, Version};
use bytes::Bytes;
use core::fmt;
use std::time::Instant;
use thiserror::Error;

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SessionState::Initial => "initial",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
        })
    }
}

/// Session-level failure.
///
/// `State` is recoverable: the operation was refused and the session is
/// unchanged. `Protocol` and `UnsupportedVersion` raised while consuming
/// an inbound frame are fatal and leave the session disconnected.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {action} while the session is {state}")]
    State {
        state: SessionState,
        action: String,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("broker offered version '{offered}', which was not requested")]
    UnsupportedVersion { offered: String },
}

/// Connection parameters handed to [`Session::new`].
///
/// `uri` is either a single `tcp://host:port` endpoint or a full failover
/// URI; the session stores it for the transport and never parses it
/// itself. Requested versions are kept in descending preference order.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub uri: String,
    pub versions: Vec<Version>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub virtual_host: Option<String>,
    pub heart_beat: Option<(u32, u32)>,
}

impl SessionConfig {
    pub fn new(uri: impl Into<String>) -> SessionConfig {
        SessionConfig {
            uri: uri.into(),
            versions: vec![Version::V1_1, Version::V1_0],
            login: None,
            passcode: None,
            virtual_host: None,
            heart_beat: None,
        }
    }

    /// Restrict the requested protocol versions. The list is normalized
    /// to descending preference order.
    pub fn with_versions(mut self, mut versions: Vec<Version>) -> SessionConfig {
        versions.sort();
        versions.dedup();
        versions.reverse();
        self.versions = versions;
        self
    }

    pub fn with_login(mut self, login: impl Into<String>) -> SessionConfig {
        self.login = Some(login.into());
        self
    }

    pub fn with_passcode(mut self, passcode: impl Into<String>) -> SessionConfig {
        self.passcode = Some(passcode.into());
        self
    }

    pub fn with_virtual_host(mut self, host: impl Into<String>) -> SessionConfig {
        self.virtual_host = Some(host.into());
        self
    }

    /// Offer heart-beating (1.1): `cx` is the interval this client can
    /// send at, `cy` the interval it would like to receive at, both in
    /// milliseconds and with `0` meaning "none".
    pub fn with_heart_beat(mut self, cx: u32, cy: u32) -> SessionConfig {
        self.heart_beat = Some((cx, cy));
        self
    }
}

/// One entry in the session's subscription registry.
///
/// `headers` are the extension headers originally passed to
/// [`Session::subscribe`], so a replay can re-issue the same SUBSCRIBE.
/// `context` is an opaque caller-owned handle (typically whatever the
/// caller uses to re-bind a message handler); the session stores it and
/// hands it back verbatim, never looking inside.
#[derive(Debug)]
pub struct Subscription<C> {
    pub token: String,
    pub destination: String,
    pub headers: HeaderMap,
    pub context: C,
    pub(crate) synthetic: bool,
}

/// What a [`Session::reset`] threw away: transactions that were still
/// active and receipts that never arrived. Neither is replayed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub transactions: Vec<String>,
    pub receipts: Vec<String>,
}

/// A client-side STOMP session.
///
/// Generic over the caller's subscription context type `C`; use the
/// default `()` when no context is needed.
#[derive(Debug)]
pub struct Session<C = ()> {
    config: SessionConfig,
    state: SessionState,
    requested: Vec<Version>,
    negotiated: Option<Version>,
    session_id: Option<String>,
    server_id: Option<String>,
    server_heart_beat: Option<(u32, u32)>,
    subscriptions: Vec<Subscription<C>>,
    transactions: Vec<String>,
    receipts: Vec<String>,
    disconnect_receipt: Option<String>,
    last_message: Option<(String, Option<String>)>,
    next_token: u64,
    last_sent: Option<Instant>,
    last_received: Option<Instant>,
}

impl<C> Session<C> {
    pub fn new(config: SessionConfig) -> Session<C> {
        Session {
            config,
            state: SessionState::Initial,
            requested: Vec::new(),
            negotiated: None,
            session_id: None,
            server_id: None,
            server_heart_beat: None,
            subscriptions: Vec::new(),
            transactions: Vec::new(),
            receipts: Vec::new(),
            disconnect_receipt: None,
            last_message: None,
            next_token: 0,
            last_sent: None,
            last_received: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The version agreed with the broker, once CONNECTED has been seen.
    pub fn negotiated_version(&self) -> Option<Version> {
        self.negotiated
    }

    /// The broker's `session` header, if it sent one.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The broker's `server` header, if it sent one.
    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    pub fn subscriptions(&self) -> &[Subscription<C>] {
        &self.subscriptions
    }

    pub fn active_transactions(&self) -> &[String] {
        &self.transactions
    }

    /// Receipt ids requested on outbound frames that no RECEIPT has
    /// matched yet.
    pub fn outstanding_receipts(&self) -> &[String] {
        &self.receipts
    }

    pub fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent
    }

    pub fn last_received_at(&self) -> Option<Instant> {
        self.last_received
    }

    /// The effective heart-beat intervals `(send_every, expect_every)` in
    /// milliseconds, combining this client's offer with the broker's.
    /// Zero disables a direction. The session records timestamps only;
    /// actual timers belong to the transport.
    pub fn negotiated_heart_beat(&self) -> (u32, u32) {
        let (cx, cy) = self.config.heart_beat.unwrap_or((0, 0));
        let (sx, sy) = self.server_heart_beat.unwrap_or((0, 0));
        let send_every = if cx == 0 || sy == 0 { 0 } else { cx.max(sy) };
        let expect_every = if cy == 0 || sx == 0 { 0 } else { cy.max(sx) };
        (send_every, expect_every)
    }

    // ----- outbound operations -----

    /// Build the CONNECT frame and move to CONNECTING.
    pub fn connect(&mut self, extra: &HeaderMap) -> Result<Frame, SessionError> {
        self.require_state(&[SessionState::Initial], "connect")?;
        let frame = commands::connect(
            &self.config.versions,
            self.config.virtual_host.as_deref(),
            self.config.login.as_deref(),
            self.config.passcode.as_deref(),
            self.config.heart_beat,
            extra,
        )?;
        self.requested = self.config.versions.clone();
        self.transition(SessionState::Connecting);
        self.note_sent();
        Ok(frame)
    }

    pub fn send(
        &mut self,
        destination: &str,
        body: Bytes,
        transaction: Option<&str>,
        extra: &HeaderMap,
    ) -> Result<Frame, SessionError> {
        self.require_state(&[SessionState::Connected], "send")?;
        if let Some(transaction) = transaction {
            self.require_transaction(transaction, "send in")?;
        }
        let frame = commands::send(destination, body, transaction, extra)?;
        self.claim_receipt(&frame)?;
        self.note_sent();
        Ok(frame)
    }

    /// Register a subscription and build its SUBSCRIBE frame.
    ///
    /// Under 1.1 the caller must choose a token; under 1.0 a token is
    /// synthesized internally (and kept off the wire) when none is given.
    /// Duplicate tokens are refused with the registries untouched.
    pub fn subscribe(
        &mut self,
        token: Option<&str>,
        destination: &str,
        extra: &HeaderMap,
        context: C,
    ) -> Result<Frame, SessionError> {
        self.require_state(&[SessionState::Connected], "subscribe")?;
        if let Some(token) = token {
            if self.subscriptions.iter().any(|s| s.token == token) {
                return Err(SessionError::State {
                    state: self.state,
                    action: format!("subscribe with duplicate token '{token}'"),
                });
            }
        }
        let version = self.wire_version();
        let (token, synthetic) = match token {
            Some(token) => (token.to_string(), false),
            None => {
                if version == Version::V1_1 {
                    return Err(ProtocolError::MissingHeader {
                        command: Command::Subscribe,
                        header: headers::ID,
                    }
                    .into());
                }
                (self.synthesize_token(), true)
            }
        };
        let wire_token = if synthetic { None } else { Some(token.as_str()) };
        let frame = commands::subscribe(version, wire_token, destination, extra)?;
        self.claim_receipt(&frame)?;
        self.subscriptions.push(Subscription {
            token,
            destination: destination.to_string(),
            headers: extra.clone(),
            context,
            synthetic,
        });
        self.note_sent();
        Ok(frame)
    }

    /// Drop a subscription by token, or by destination as the 1.0
    /// fallback, and build its UNSUBSCRIBE frame.
    pub fn unsubscribe(
        &mut self,
        token: Option<&str>,
        destination: Option<&str>,
        extra: &HeaderMap,
    ) -> Result<Frame, SessionError> {
        self.require_state(&[SessionState::Connected], "unsubscribe")?;
        let index = match (token, destination) {
            (Some(token), _) => self.subscriptions.iter().position(|s| s.token == token),
            (None, Some(destination)) => self
                .subscriptions
                .iter()
                .position(|s| s.destination == destination),
            (None, None) => None,
        };
        let Some(index) = index else {
            return Err(SessionError::State {
                state: self.state,
                action: format!(
                    "unsubscribe from unknown subscription (token {token:?}, destination {destination:?})"
                ),
            });
        };
        let version = self.wire_version();
        let frame = {
            let subscription = &self.subscriptions[index];
            let wire_token = if subscription.synthetic {
                None
            } else {
                Some(subscription.token.as_str())
            };
            commands::unsubscribe(version, wire_token, Some(&subscription.destination), extra)?
        };
        self.claim_receipt(&frame)?;
        self.subscriptions.remove(index);
        self.note_sent();
        Ok(frame)
    }

    /// Build an ACK for a message id. When the 1.1 subscription token is
    /// not given it is resolved from the last observed MESSAGE.
    pub fn ack(
        &mut self,
        message_id: &str,
        subscription: Option<&str>,
        transaction: Option<&str>,
        extra: &HeaderMap,
    ) -> Result<Frame, SessionError> {
        self.acknowledge(commands::ack, "ack", message_id, subscription, transaction, extra)
    }

    /// Build a NACK (1.1 only); token resolution as for [`Session::ack`].
    pub fn nack(
        &mut self,
        message_id: &str,
        subscription: Option<&str>,
        transaction: Option<&str>,
        extra: &HeaderMap,
    ) -> Result<Frame, SessionError> {
        self.acknowledge(commands::nack, "nack", message_id, subscription, transaction, extra)
    }

    /// ACK straight from a received MESSAGE frame.
    pub fn ack_frame(
        &mut self,
        frame: &Frame,
        transaction: Option<&str>,
    ) -> Result<Frame, SessionError> {
        let (message_id, subscription) = self.acknowledgment_target(frame)?;
        self.ack(&message_id, subscription.as_deref(), transaction, &HeaderMap::new())
    }

    /// NACK straight from a received MESSAGE frame (1.1 only).
    pub fn nack_frame(
        &mut self,
        frame: &Frame,
        transaction: Option<&str>,
    ) -> Result<Frame, SessionError> {
        let (message_id, subscription) = self.acknowledgment_target(frame)?;
        self.nack(&message_id, subscription.as_deref(), transaction, &HeaderMap::new())
    }

    /// Open a transaction. Duplicate ids are refused, state untouched.
    pub fn begin(&mut self, transaction: &str, extra: &HeaderMap) -> Result<Frame, SessionError> {
        self.require_state(&[SessionState::Connected], "begin")?;
        if self.transactions.iter().any(|t| t == transaction) {
            return Err(SessionError::State {
                state: self.state,
                action: format!("begin transaction '{transaction}' (already active)"),
            });
        }
        let frame = commands::begin(transaction, extra)?;
        self.claim_receipt(&frame)?;
        self.transactions.push(transaction.to_string());
        self.note_sent();
        Ok(frame)
    }

    pub fn commit(&mut self, transaction: &str, extra: &HeaderMap) -> Result<Frame, SessionError> {
        self.require_state(&[SessionState::Connected], "commit")?;
        let index = self.require_transaction(transaction, "commit")?;
        let frame = commands::commit(transaction, extra)?;
        self.claim_receipt(&frame)?;
        self.transactions.remove(index);
        self.note_sent();
        Ok(frame)
    }

    pub fn abort(&mut self, transaction: &str, extra: &HeaderMap) -> Result<Frame, SessionError> {
        self.require_state(&[SessionState::Connected], "abort")?;
        let index = self.require_transaction(transaction, "abort")?;
        let frame = commands::abort(transaction, extra)?;
        self.claim_receipt(&frame)?;
        self.transactions.remove(index);
        self.note_sent();
        Ok(frame)
    }

    /// Build the DISCONNECT frame and move to DISCONNECTING. With a
    /// receipt id the session completes only once that RECEIPT arrives;
    /// without one the transport simply closes after writing the frame.
    pub fn disconnect(
        &mut self,
        receipt: Option<&str>,
        extra: &HeaderMap,
    ) -> Result<Frame, SessionError> {
        self.require_state(&[SessionState::Connected], "disconnect")?;
        let frame = commands::disconnect(receipt, extra)?;
        self.claim_receipt(&frame)?;
        self.disconnect_receipt = receipt.map(str::to_string);
        self.transition(SessionState::Disconnecting);
        self.note_sent();
        Ok(frame)
    }

    /// Produce an outgoing heart-beat (1.1 only).
    pub fn beat(&mut self) -> Result<Transmission, SessionError> {
        self.require_state(&[SessionState::Connected], "beat")?;
        let transmission = commands::beat(self.wire_version())?;
        self.note_sent();
        Ok(transmission)
    }

    // ----- inbound operations -----

    /// Consume the broker's CONNECTED frame and negotiate the version.
    pub fn connected(&mut self, frame: &Frame) -> Result<(), SessionError> {
        self.require_state(&[SessionState::Connecting], "handle CONNECTED")?;
        let view = match commands::connected(frame) {
            Ok(view) => view,
            Err(err) => {
                self.transition(SessionState::Disconnected);
                return Err(err.into());
            }
        };
        let offered = view.version.unwrap_or(Version::V1_0.as_str());
        let negotiated = match offered.parse::<Version>() {
            Ok(version) if self.requested.contains(&version) => version,
            _ => {
                self.transition(SessionState::Disconnected);
                return Err(SessionError::UnsupportedVersion {
                    offered: offered.to_string(),
                });
            }
        };
        self.negotiated = Some(negotiated);
        self.session_id = view.session.map(str::to_string);
        self.server_id = view.server.map(str::to_string);
        self.server_heart_beat = view.heart_beat;
        self.transition(SessionState::Connected);
        self.note_received();
        Ok(())
    }

    /// Consume an inbound MESSAGE frame, remembering it for later
    /// ACK/NACK token resolution.
    pub fn message(&mut self, frame: &Frame) -> Result<(), SessionError> {
        self.require_state(
            &[SessionState::Connected, SessionState::Disconnecting],
            "handle MESSAGE",
        )?;
        let version = self.wire_version();
        let view = match commands::message(frame, version) {
            Ok(view) => view,
            Err(err) => {
                self.transition(SessionState::Disconnected);
                return Err(err.into());
            }
        };
        let token = match view.subscription {
            Some(token) => {
                if !self.subscriptions.iter().any(|s| s.token == token) {
                    self.transition(SessionState::Disconnected);
                    return Err(ProtocolError::UnknownSubscription(token.to_string()).into());
                }
                Some(token.to_string())
            }
            // 1.0 brokers do not echo the token; fall back to the
            // destination for resolution.
            None => self
                .subscriptions
                .iter()
                .find(|s| s.destination == view.destination)
                .map(|s| s.token.clone()),
        };
        self.last_message = Some((view.message_id.to_string(), token));
        self.note_received();
        Ok(())
    }

    /// Consume an inbound RECEIPT frame, clearing the matching slot.
    pub fn receipt(&mut self, frame: &Frame) -> Result<(), SessionError> {
        self.require_state(
            &[SessionState::Connected, SessionState::Disconnecting],
            "handle RECEIPT",
        )?;
        let receipt_id = match commands::receipt(frame) {
            Ok(id) => id.to_string(),
            Err(err) => {
                self.transition(SessionState::Disconnected);
                return Err(err.into());
            }
        };
        let Some(index) = self.receipts.iter().position(|r| *r == receipt_id) else {
            self.transition(SessionState::Disconnected);
            return Err(ProtocolError::UnknownReceipt(receipt_id).into());
        };
        self.receipts.remove(index);
        if self.disconnect_receipt.as_deref() == Some(receipt_id.as_str()) {
            self.disconnect_receipt = None;
            self.transition(SessionState::Disconnected);
        }
        self.note_received();
        Ok(())
    }

    /// Consume an inbound ERROR frame. Brokers close the connection after
    /// sending one, so the session ends up disconnected; use
    /// [`commands::error`] to inspect the frame's message and body.
    pub fn error(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let view = commands::error(frame)?;
        tracing::debug!(message = view.message, "broker reported an error");
        self.transition(SessionState::Disconnected);
        self.note_received();
        Ok(())
    }

    /// Note that the transport failed (connection refused, reset, or a
    /// timeout the transport enforced). Terminal for this session object
    /// until [`Session::reset`].
    pub fn transport_lost(&mut self) {
        self.transition(SessionState::Disconnected);
    }

    // ----- reconnection -----

    /// Re-arm the session after a transport loss: back to INITIAL with a
    /// fresh negotiation, keeping subscriptions for [`Session::replay`].
    /// Active transactions and unmatched receipts are discarded and
    /// reported; the broker forgot them with the connection.
    pub fn reset(&mut self) -> ResetReport {
        let report = ResetReport {
            transactions: std::mem::take(&mut self.transactions),
            receipts: std::mem::take(&mut self.receipts),
        };
        self.requested.clear();
        self.negotiated = None;
        self.session_id = None;
        self.server_id = None;
        self.server_heart_beat = None;
        self.disconnect_receipt = None;
        self.last_message = None;
        self.transition(SessionState::Initial);
        report
    }

    /// Drain the replay plan: the surviving subscriptions, in original
    /// SUBSCRIBE order. The reconnection logic re-issues each one with
    /// [`Session::subscribe`] after the new CONNECTED.
    pub fn replay(&mut self) -> Vec<Subscription<C>> {
        std::mem::take(&mut self.subscriptions)
    }

    // ----- internals -----

    fn require_state(
        &self,
        allowed: &[SessionState],
        action: &'static str,
    ) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::State {
                state: self.state,
                action: action.to_string(),
            })
        }
    }

    fn require_transaction(
        &self,
        transaction: &str,
        action: &'static str,
    ) -> Result<usize, SessionError> {
        self.transactions
            .iter()
            .position(|t| t == transaction)
            .ok_or_else(|| SessionError::State {
                state: self.state,
                action: format!("{action} transaction '{transaction}' (not active)"),
            })
    }

    fn acknowledge(
        &mut self,
        build: fn(
            Version,
            &str,
            Option<&str>,
            Option<&str>,
            &HeaderMap,
        ) -> Result<Frame, ProtocolError>,
        action: &'static str,
        message_id: &str,
        subscription: Option<&str>,
        transaction: Option<&str>,
        extra: &HeaderMap,
    ) -> Result<Frame, SessionError> {
        self.require_state(&[SessionState::Connected], action)?;
        if let Some(transaction) = transaction {
            self.require_transaction(transaction, action)?;
        }
        let resolved = match subscription {
            Some(token) => Some(token.to_string()),
            None => self.resolve_subscription(message_id),
        };
        let frame = build(
            self.wire_version(),
            message_id,
            resolved.as_deref(),
            transaction,
            extra,
        )?;
        self.claim_receipt(&frame)?;
        self.note_sent();
        Ok(frame)
    }

    fn acknowledgment_target(
        &self,
        frame: &Frame,
    ) -> Result<(String, Option<String>), SessionError> {
        let view = commands::message(frame, self.wire_version())?;
        Ok((
            view.message_id.to_string(),
            view.subscription.map(str::to_string),
        ))
    }

    fn resolve_subscription(&self, message_id: &str) -> Option<String> {
        self.last_message
            .as_ref()
            .filter(|(id, _)| id == message_id)
            .and_then(|(_, token)| token.clone())
    }

    fn claim_receipt(&mut self, frame: &Frame) -> Result<(), SessionError> {
        if let Some(receipt) = frame.header(headers::RECEIPT) {
            if self.receipts.iter().any(|r| r == receipt) {
                return Err(SessionError::State {
                    state: self.state,
                    action: format!("request duplicate receipt '{receipt}'"),
                });
            }
            self.receipts.push(receipt.to_string());
        }
        Ok(())
    }

    fn synthesize_token(&mut self) -> String {
        loop {
            let token = format!("sub-{}", self.next_token);
            self.next_token += 1;
            if !self.subscriptions.iter().any(|s| s.token == token) {
                return token;
            }
        }
    }

    fn wire_version(&self) -> Version {
        self.negotiated.unwrap_or(Version::V1_0)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "session state change");
            self.state = next;
        }
    }

    fn note_sent(&mut self) {
        self.last_sent = Some(Instant::now());
    }

    fn note_received(&mut self) {
        self.last_received = Some(Instant::now());
    }
}
