// ABOUTME: Failover URI parsing and broker endpoint iteration with reconnect back-off
// ABOUTME: Yields (host, port, delay) targets; the transport owns the actual connecting and sleeping

//! Broker failover in the ActiveMQ URI dialect:
//!
//! ```text
//! failover:(tcp://primary:61613,tcp://backup:61613)?initialReconnectDelay=100&randomize=false
//! ```
//!
//! Parsing a [`FailoverUri`] yields the endpoint list and retry policy;
//! [`Failover::targets`] then produces a lazy, possibly infinite sequence
//! of connection targets with the delay to wait before each attempt. The
//! consumer marks a successful connect on the [`Failover`] and builds a
//! fresh iterator on the next failure, which resets the delay and attempt
//! counters.

use rand::seq::SliceRandom;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("invalid failover URI: {0}")]
    InvalidUri(String),

    #[error("no reconnect attempts remain after {attempts} attempts")]
    Exhausted { attempts: u64 },
}

/// One broker address from the endpoint list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Retry policy options, with the ActiveMQ defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct FailoverOptions {
    /// Delay before the first retry.
    pub initial_reconnect_delay: Duration,
    /// Cap on any single delay.
    pub max_reconnect_delay: Duration,
    /// Grow the delay by `back_off_multiplier` after each attempt.
    pub use_exponential_back_off: bool,
    pub back_off_multiplier: f64,
    /// Retries allowed once a connect has ever succeeded; negative means
    /// unlimited.
    pub max_reconnect_attempts: i64,
    /// Retries allowed before the first successful connect; `0` falls
    /// back to `max_reconnect_attempts`.
    pub startup_max_reconnect_attempts: i64,
    /// Shuffle the endpoint order at the start of each full pass.
    pub randomize: bool,
}

impl Default for FailoverOptions {
    fn default() -> FailoverOptions {
        FailoverOptions {
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(30_000),
            use_exponential_back_off: true,
            back_off_multiplier: 2.0,
            max_reconnect_attempts: -1,
            startup_max_reconnect_attempts: 0,
            randomize: true,
        }
    }
}

/// A parsed failover URI: ordered endpoints plus retry options.
///
/// Accepted forms are `failover:(...)?opts`, `failover://(...)?opts`, the
/// bracketless `failover:tcp://h:p,tcp://h2:p2?opts`, and a plain single
/// `tcp://host:port`. Whitespace around commas is tolerated; unknown
/// option keys are rejected.
#[derive(Clone, Debug, PartialEq)]
pub struct FailoverUri {
    pub endpoints: Vec<Endpoint>,
    pub options: FailoverOptions,
}

impl FromStr for FailoverUri {
    type Err = FailoverError;

    fn from_str(s: &str) -> Result<FailoverUri, FailoverError> {
        let trimmed = s.trim();
        let rest = trimmed
            .strip_prefix("failover://")
            .or_else(|| trimmed.strip_prefix("failover:"))
            .unwrap_or(trimmed);

        let (endpoint_list, query) = if let Some(inner) = rest.strip_prefix('(') {
            let (inner, after) = inner.split_once(')').ok_or_else(|| {
                FailoverError::InvalidUri("unterminated '(' in endpoint list".to_string())
            })?;
            let query = match after {
                "" => "",
                _ => after.strip_prefix('?').ok_or_else(|| {
                    FailoverError::InvalidUri(format!("unexpected trailing '{after}'"))
                })?,
            };
            (inner, query)
        } else {
            match rest.split_once('?') {
                Some((endpoints, query)) => (endpoints, query),
                None => (rest, ""),
            }
        };

        let endpoints = endpoint_list
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(parse_endpoint)
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(FailoverError::InvalidUri(
                "endpoint list is empty".to_string(),
            ));
        }

        let mut options = FailoverOptions::default();
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                FailoverError::InvalidUri(format!("option '{pair}' is not key=value"))
            })?;
            apply_option(&mut options, key.trim(), value.trim())?;
        }

        Ok(FailoverUri { endpoints, options })
    }
}

fn parse_endpoint(part: &str) -> Result<Endpoint, FailoverError> {
    let address = part.strip_prefix("tcp://").ok_or_else(|| {
        FailoverError::InvalidUri(format!("endpoint '{part}' must use the tcp:// scheme"))
    })?;
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        FailoverError::InvalidUri(format!("endpoint '{part}' is missing a port"))
    })?;
    if host.is_empty() {
        return Err(FailoverError::InvalidUri(format!(
            "endpoint '{part}' is missing a host"
        )));
    }
    let port = port.parse::<u16>().map_err(|_| {
        FailoverError::InvalidUri(format!("endpoint '{part}' has an invalid port"))
    })?;
    Ok(Endpoint {
        host: host.to_string(),
        port,
    })
}

fn apply_option(
    options: &mut FailoverOptions,
    key: &str,
    value: &str,
) -> Result<(), FailoverError> {
    let bad_value =
        || FailoverError::InvalidUri(format!("invalid value '{value}' for option '{key}'"));
    match key {
        "initialReconnectDelay" => {
            options.initial_reconnect_delay =
                Duration::from_millis(value.parse().map_err(|_| bad_value())?);
        }
        "maxReconnectDelay" => {
            options.max_reconnect_delay =
                Duration::from_millis(value.parse().map_err(|_| bad_value())?);
        }
        "useExponentialBackOff" => {
            options.use_exponential_back_off = value.parse().map_err(|_| bad_value())?;
        }
        // ActiveMQ spells it backOffMultiplier; some clients call the
        // same knob reconnectDelayExponent.
        "backOffMultiplier" | "reconnectDelayExponent" => {
            let multiplier: f64 = value.parse().map_err(|_| bad_value())?;
            if !multiplier.is_finite() || multiplier <= 0.0 {
                return Err(bad_value());
            }
            options.back_off_multiplier = multiplier;
        }
        "maxReconnectAttempts" => {
            options.max_reconnect_attempts = value.parse().map_err(|_| bad_value())?;
        }
        "startupMaxReconnectAttempts" => {
            options.startup_max_reconnect_attempts = value.parse().map_err(|_| bad_value())?;
        }
        "randomize" => {
            options.randomize = value.parse().map_err(|_| bad_value())?;
        }
        _ => {
            return Err(FailoverError::InvalidUri(format!("unknown option '{key}'")));
        }
    }
    Ok(())
}

/// A connection target: where to connect next and how long to wait first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub delay: Duration,
}

/// Failover state shared across reconnect episodes.
///
/// Owns the parsed URI plus the one bit of history the attempt caps need:
/// whether any connect has ever succeeded.
#[derive(Clone, Debug)]
pub struct Failover {
    uri: FailoverUri,
    connected_once: bool,
}

impl Failover {
    pub fn new(uri: FailoverUri) -> Failover {
        Failover {
            uri,
            connected_once: false,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Failover, FailoverError> {
        uri.parse().map(Failover::new)
    }

    pub fn uri(&self) -> &FailoverUri {
        &self.uri
    }

    /// Record a successful connect; later iterators use the post-startup
    /// attempt cap.
    pub fn mark_connected(&mut self) {
        self.connected_once = true;
    }

    /// A fresh iterator over connection targets, with delay and attempt
    /// counters reset.
    pub fn targets(&self) -> FailoverIter {
        let options = &self.uri.options;
        let cap = if !self.connected_once && options.startup_max_reconnect_attempts != 0 {
            options.startup_max_reconnect_attempts
        } else {
            options.max_reconnect_attempts
        };
        FailoverIter {
            endpoints: self.uri.endpoints.clone(),
            current_delay: options.initial_reconnect_delay.min(options.max_reconnect_delay),
            max_retries: u64::try_from(cap).ok(),
            options: options.clone(),
            cursor: 0,
            yielded: 0,
        }
    }
}

/// Lazy sequence of connection targets for one reconnect episode.
#[derive(Debug)]
pub struct FailoverIter {
    endpoints: Vec<Endpoint>,
    options: FailoverOptions,
    /// `None` means unlimited retries.
    max_retries: Option<u64>,
    current_delay: Duration,
    cursor: usize,
    yielded: u64,
}

impl FailoverIter {
    /// The next target, or [`FailoverError::Exhausted`] once the attempt
    /// cap is spent. The very first target of a fresh iterator carries a
    /// zero delay.
    pub fn next_target(&mut self) -> Result<Target, FailoverError> {
        if self.cursor == self.endpoints.len() {
            self.cursor = 0;
        }
        if self.cursor == 0 && self.options.randomize {
            self.endpoints.shuffle(&mut rand::thread_rng());
        }

        let delay = if self.yielded == 0 {
            Duration::ZERO
        } else {
            if let Some(cap) = self.max_retries {
                if self.yielded > cap {
                    return Err(FailoverError::Exhausted {
                        attempts: self.yielded,
                    });
                }
            }
            let delay = self.current_delay;
            if self.options.use_exponential_back_off {
                self.current_delay = self
                    .current_delay
                    .mul_f64(self.options.back_off_multiplier)
                    .min(self.options.max_reconnect_delay);
            }
            delay
        };

        let endpoint = &self.endpoints[self.cursor];
        self.cursor += 1;
        self.yielded += 1;
        Ok(Target {
            host: endpoint.host.clone(),
            port: endpoint.port,
            delay,
        })
    }
}

impl Iterator for FailoverIter {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        self.next_target().ok()
    }
}
