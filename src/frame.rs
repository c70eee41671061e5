//! Provides the in-memory representation of a STOMP frame: a verb, an
//! ordered header list, and an opaque body.

use crate::protocol::Command;
use bytes::Bytes;
use core::fmt;

/// An ordered multimap of STOMP headers.
///
/// Headers keep their insertion order, and duplicate names are preserved.
/// The default accessor [`HeaderMap::get`] exposes only the first
/// occurrence of a name, which is the authoritative value under STOMP 1.1;
/// the full list remains available through [`HeaderMap::all`] and
/// [`HeaderMap::iter`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> HeaderMap {
        HeaderMap::default()
    }

    pub fn with_capacity(capacity: usize) -> HeaderMap {
        HeaderMap {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a header, keeping any earlier occurrence of the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace the first occurrence of `name`, or append if absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// First occurrence of `name`, the authoritative value on receive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every occurrence of `name`, in wire order.
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> HeaderMap {
        HeaderMap {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// A single STOMP frame.
///
/// Frames are plain values: the parser produces them, the command builders
/// construct them, and the compiler serializes them. No component holds a
/// reference into another's frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Frame {
    /// An empty frame for the given verb.
    pub fn new(command: Command) -> Frame {
        Frame {
            command,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Shortcut for `headers.get`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ({} headers, {} byte body)",
            self.command,
            self.headers.len(),
            self.body.len()
        )
    }
}

/// One unit of traffic on a STOMP connection: a complete frame, or a
/// heart-beat (a bare LF or CR LF between frames).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transmission {
    Frame(Frame),
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_wins() {
        let mut headers = HeaderMap::new();
        headers.push("foo", "bar");
        headers.push("foo", "baz");
        assert_eq!(headers.get("foo"), Some("bar"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn duplicates_preserved_in_order() {
        let headers: HeaderMap = [("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();
        let all: Vec<_> = headers.all("a").collect();
        assert_eq!(all, vec!["1", "3"]);
        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2"), ("a", "3")]);
    }

    #[test]
    fn set_replaces_first_occurrence() {
        let mut headers: HeaderMap = [("a", "1"), ("a", "2")].into_iter().collect();
        headers.set("a", "9");
        headers.set("b", "3");
        assert_eq!(headers.get("a"), Some("9"));
        assert_eq!(headers.all("a").collect::<Vec<_>>(), vec!["9", "2"]);
        assert_eq!(headers.get("b"), Some("3"));
    }

    #[test]
    fn frame_display() {
        let mut frame = Frame::new(Command::Send);
        frame.headers.push("destination", "/queue/a");
        frame.body = Bytes::from_static(b"hello");
        assert_eq!(frame.to_string(), "SEND (1 headers, 5 byte body)");
    }
}
