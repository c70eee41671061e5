//! Wire codec for STOMP 1.0 and 1.1.
//!
//! This module separates the byte-level framing from the protocol model:
//! [`Parser`] turns an arbitrarily chunked byte stream into
//! [`Transmission`]s, and [`compile`] performs the inverse. Both consult
//! the tables in [`crate::protocol`] for verbs, escape rules, and the NUL
//! terminator; neither knows anything about session state.
//!
//! The frame grammar is `COMMAND LF (HEADER LF)* LF BODY NUL`, with a
//! bare LF (or CR LF) between frames counting as a heart-beat. When a
//! `content-length` header is present the body is read as exactly that
//! many octets and the next octet must be NUL; otherwise the body extends
//! to the first NUL.

use crate::frame::{Frame, HeaderMap, Transmission};
use crate::protocol::{headers, Command, Version, ESCAPES, NUL};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// The wire bytes could not be decoded, or a frame could not be encoded
/// for the requested version.
///
/// Decode-side variants carry the absolute byte offset (counted from the
/// first byte ever fed to the parser) at which decoding failed. A parser
/// that has returned one of these is poisoned: the connection must be torn
/// down and a fresh parser created.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed command token at byte {offset}")]
    BadCommand { offset: usize },

    #[error("unknown command '{command}' at byte {offset}")]
    UnknownCommand { command: String, offset: usize },

    #[error("header line without ':' separator at byte {offset}")]
    MalformedHeader { offset: usize },

    #[error("empty header name at byte {offset}")]
    EmptyHeaderName { offset: usize },

    #[error("invalid escape sequence '\\{found}' at byte {offset}")]
    BadEscape { found: char, offset: usize },

    #[error("header bytes are not valid UTF-8 at byte {offset}")]
    BadUtf8 { offset: usize },

    #[error("invalid content-length value '{value}' at byte {offset}")]
    BadContentLength { value: String, offset: usize },

    #[error("expected NUL frame terminator at byte {offset}")]
    MissingNul { offset: usize },

    #[error("stream ended inside a frame at byte {offset}")]
    TruncatedFrame { offset: usize },

    #[error("header octet {octet:#04x} cannot be represented in STOMP {version}")]
    Unrepresentable { octet: u8, version: Version },
}

/// Incremental STOMP frame parser.
///
/// Feed it byte chunks of any size; a frame split across any number of
/// [`Parser::feed`] calls parses identically to the same bytes delivered
/// at once. The parser owns its buffer and performs no I/O.
#[derive(Debug)]
pub struct Parser {
    buffer: BytesMut,
    consumed: usize,
    version: Version,
    error: Option<ParseError>,
}

impl Parser {
    /// A parser applying the header rules of `version`.
    ///
    /// A client typically starts at 1.0 (escaping off) and upgrades with
    /// [`Parser::set_version`] once the CONNECTED frame has negotiated 1.1.
    pub fn new(version: Version) -> Parser {
        Parser {
            buffer: BytesMut::with_capacity(4 * 1024),
            consumed: 0,
            version,
            error: None,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Switch header decoding rules, effective from the next frame.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Number of bytes buffered but not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append raw bytes from the transport.
    #[tracing::instrument(level = "trace", skip_all, fields(len = bytes.len()))]
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Decode the next complete transmission, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Once this returns an
    /// error the parser is poisoned and every later call repeats it.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn next_transmission(&mut self) -> Result<Option<Transmission>, ParseError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        // A bare LF or CR LF before any command byte is a heart-beat.
        match self.buffer.first() {
            Some(b'\n') => {
                self.advance(1);
                return Ok(Some(Transmission::Heartbeat));
            }
            Some(b'\r') => match self.buffer.get(1) {
                Some(b'\n') => {
                    self.advance(2);
                    return Ok(Some(Transmission::Heartbeat));
                }
                Some(_) => {
                    return self.poison(ParseError::BadCommand {
                        offset: self.consumed,
                    });
                }
                None => return Ok(None),
            },
            _ => {}
        }

        match self.try_frame() {
            Ok(Some((frame, len))) => {
                self.advance(len);
                Ok(Some(Transmission::Frame(frame)))
            }
            Ok(None) => Ok(None),
            Err(err) => self.poison(err),
        }
    }

    /// Signal end of stream. Errors if bytes of a partial frame remain
    /// buffered, which means the peer closed mid-frame.
    pub fn finish(&self) -> Result<(), ParseError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(ParseError::TruncatedFrame {
                offset: self.consumed,
            })
        }
    }

    fn advance(&mut self, n: usize) {
        use bytes::Buf;
        self.buffer.advance(n);
        self.consumed += n;
    }

    fn poison(&mut self, err: ParseError) -> Result<Option<Transmission>, ParseError> {
        self.error = Some(err.clone());
        Err(err)
    }

    /// Attempt to decode one frame from the front of the buffer. Returns
    /// the frame and the number of bytes it occupied, or `None` when the
    /// buffer does not yet hold a complete frame.
    fn try_frame(&self) -> Result<Option<(Frame, usize)>, ParseError> {
        let buf = &self.buffer[..];

        let Some(command_end) = find_byte(buf, 0, b'\n') else {
            return Ok(None);
        };
        let token = strip_cr(&buf[..command_end]);
        if token.is_empty() || !token.iter().all(u8::is_ascii_uppercase) {
            return Err(ParseError::BadCommand {
                offset: self.consumed,
            });
        }
        let command = Command::from_bytes(token).ok_or_else(|| ParseError::UnknownCommand {
            command: String::from_utf8_lossy(token).into_owned(),
            offset: self.consumed,
        })?;

        let mut header_map = HeaderMap::new();
        let mut pos = command_end + 1;
        loop {
            let Some(line_end) = find_byte(buf, pos, b'\n') else {
                return Ok(None);
            };
            let line = strip_cr(&buf[pos..line_end]);
            if line.is_empty() {
                pos = line_end + 1;
                break;
            }
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or(ParseError::MalformedHeader {
                    offset: self.consumed + pos,
                })?;
            if colon == 0 {
                return Err(ParseError::EmptyHeaderName {
                    offset: self.consumed + pos,
                });
            }
            let name = decode_token(&line[..colon], self.version, self.consumed + pos)?;
            let value = decode_token(
                &line[colon + 1..],
                self.version,
                self.consumed + pos + colon + 1,
            )?;
            header_map.push(name, value);
            pos = line_end + 1;
        }

        let body_start = pos;
        let declared_length = match header_map.get(headers::CONTENT_LENGTH) {
            Some(value) => Some(value.parse::<usize>().map_err(|_| {
                ParseError::BadContentLength {
                    value: value.to_string(),
                    offset: self.consumed,
                }
            })?),
            None => None,
        };

        let (body_end, frame_end) = match declared_length {
            Some(len) => {
                if buf.len() < body_start + len + 1 {
                    return Ok(None);
                }
                if buf[body_start + len] != NUL {
                    return Err(ParseError::MissingNul {
                        offset: self.consumed + body_start + len,
                    });
                }
                (body_start + len, body_start + len + 1)
            }
            None => {
                let Some(nul) = find_byte(buf, body_start, NUL) else {
                    return Ok(None);
                };
                (nul, nul + 1)
            }
        };

        let frame = Frame {
            command,
            headers: header_map,
            body: Bytes::copy_from_slice(&buf[body_start..body_end]),
        };
        Ok(Some((frame, frame_end)))
    }
}

/// Serialize a frame for the given protocol version.
///
/// Headers are written in insertion order with duplicates kept verbatim.
/// A `content-length` header is appended when the frame carries a body on
/// a body-bearing verb, or whenever the body contains NUL octets, unless
/// the caller already supplied one.
pub fn compile(frame: &Frame, version: Version) -> Result<Bytes, ParseError> {
    let mut out = BytesMut::with_capacity(
        frame.command.as_str().len()
            + frame
                .headers
                .iter()
                .map(|(n, v)| n.len() + v.len() + 4)
                .sum::<usize>()
            + frame.body.len()
            + 32,
    );
    out.put_slice(frame.command.as_str().as_bytes());
    out.put_u8(b'\n');
    for (name, value) in frame.headers.iter() {
        encode_token(&mut out, name, version)?;
        out.put_u8(b':');
        encode_token(&mut out, value, version)?;
        out.put_u8(b'\n');
    }
    let needs_length = !frame.headers.contains(headers::CONTENT_LENGTH)
        && ((frame.command.allows_body() && frame.has_body()) || frame.body.contains(&NUL));
    if needs_length {
        out.put_slice(headers::CONTENT_LENGTH.as_bytes());
        out.put_u8(b':');
        out.put_slice(frame.body.len().to_string().as_bytes());
        out.put_u8(b'\n');
    }
    out.put_u8(b'\n');
    out.put_slice(&frame.body);
    out.put_u8(NUL);
    Ok(out.freeze())
}

/// Serialize one transmission: a frame, or the single-LF heart-beat.
pub fn compile_transmission(
    transmission: &Transmission,
    version: Version,
) -> Result<Bytes, ParseError> {
    match transmission {
        Transmission::Frame(frame) => compile(frame, version),
        Transmission::Heartbeat => Ok(Bytes::from_static(b"\n")),
    }
}

fn find_byte(buf: &[u8], from: usize, needle: u8) -> Option<usize> {
    buf.get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// Decode a raw header name or value, applying the 1.1 escape table when
/// the version calls for it.
fn decode_token(raw: &[u8], version: Version, offset: usize) -> Result<String, ParseError> {
    if !version.escapes_headers() {
        return std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ParseError::BadUtf8 { offset });
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b == b'\\' {
            let next = raw.get(i + 1).copied().ok_or(ParseError::BadEscape {
                found: '\\',
                offset: offset + i,
            })?;
            let decoded = ESCAPES
                .iter()
                .find(|(_, escaped)| *escaped == next)
                .map(|(raw_byte, _)| *raw_byte)
                .ok_or(ParseError::BadEscape {
                    found: next as char,
                    offset: offset + i,
                })?;
            out.push(decoded);
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| ParseError::BadUtf8 { offset })
}

/// Encode a header name or value. 1.1 escapes the reserved octets; 1.0
/// has no escape mechanism and rejects them outright.
fn encode_token(out: &mut BytesMut, token: &str, version: Version) -> Result<(), ParseError> {
    for &b in token.as_bytes() {
        if version.escapes_headers() {
            match ESCAPES.iter().find(|(raw_byte, _)| *raw_byte == b) {
                Some((_, escaped)) => {
                    out.put_u8(b'\\');
                    out.put_u8(*escaped);
                }
                None if b == b'\r' => {
                    return Err(ParseError::Unrepresentable { octet: b, version });
                }
                None => out.put_u8(b),
            }
        } else if matches!(b, b':' | b'\n' | b'\r') {
            return Err(ParseError::Unrepresentable { octet: b, version });
        } else {
            out.put_u8(b);
        }
    }
    Ok(())
}
