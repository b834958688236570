//! `host:port` endpoint parsing (component B).

use std::fmt;
use thiserror::Error;

/// A parsed `host:port` pair.
///
/// `host` retains whatever the caller wrote (a hostname, an IPv4 literal, or an
/// IPv6 literal with its brackets stripped); this crate never resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Builds an endpoint directly from already-validated parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The host portion (hostname or IP literal, brackets stripped).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port portion.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parses a `host:port` string.
    ///
    /// Accepts plain hostnames and IPv4 literals as `host:port`, and IPv6
    /// literals enclosed in brackets as `[host]:port`. Rejects an empty host,
    /// a missing port, a non-numeric port, and a port outside `1..=65535`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| ParseError::MalformedIpv6Literal(s.to_string()))?;
            let host = &rest[..close];
            let after = &rest[close + 1..];
            let port = after
                .strip_prefix(':')
                .ok_or_else(|| ParseError::MissingPort(s.to_string()))?;
            (host, port)
        } else {
            let idx = s
                .rfind(':')
                .ok_or_else(|| ParseError::MissingPort(s.to_string()))?;
            (&s[..idx], &s[idx + 1..])
        };

        if host.is_empty() {
            return Err(ParseError::EmptyHost(s.to_string()));
        }

        if port.is_empty() {
            return Err(ParseError::MissingPort(s.to_string()));
        }
        let port: u32 = port
            .parse()
            .map_err(|_| ParseError::NonNumericPort(port.to_string()))?;
        let port = u16::try_from(port).map_err(|_| ParseError::PortOutOfRange(port))?;
        if port == 0 {
            return Err(ParseError::PortOutOfRange(0));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors returned by [`Endpoint::parse`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The input was empty.
    #[error("endpoint string is empty")]
    Empty,
    /// No `:port` suffix was found.
    #[error("{0:?} has no port")]
    MissingPort(String),
    /// An IPv6 literal's opening `[` was never closed.
    #[error("{0:?} has an unterminated IPv6 literal")]
    MalformedIpv6Literal(String),
    /// The host portion was empty (e.g. `:9000`).
    #[error("{0:?} has an empty host")]
    EmptyHost(String),
    /// The port portion was not a base-10 integer.
    #[error("{0:?} is not a valid port number")]
    NonNumericPort(String),
    /// The port was `0` or did not fit in a `u16`.
    #[error("port {0} is out of range (must be 1..=65535)")]
    PortOutOfRange(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let ep = Endpoint::parse("10.0.0.1:9000").unwrap();
        assert_eq!(ep.host(), "10.0.0.1");
        assert_eq!(ep.port(), 9000);
    }

    #[test]
    fn parses_hostname() {
        let ep = Endpoint::parse("seed-0.cluster.internal:443").unwrap();
        assert_eq!(ep.host(), "seed-0.cluster.internal");
        assert_eq!(ep.port(), 443);
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let ep = Endpoint::parse("[::1]:9000").unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.port(), 9000);
    }

    #[test]
    fn rejects_empty_host() {
        assert_eq!(
            Endpoint::parse(":9000").unwrap_err(),
            ParseError::EmptyHost(":9000".to_string())
        );
    }

    #[test]
    fn rejects_missing_port() {
        assert!(matches!(
            Endpoint::parse("10.0.0.1").unwrap_err(),
            ParseError::MissingPort(_)
        ));
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(matches!(
            Endpoint::parse("10.0.0.1:http").unwrap_err(),
            ParseError::NonNumericPort(_)
        ));
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(matches!(
            Endpoint::parse("10.0.0.1:0").unwrap_err(),
            ParseError::PortOutOfRange(0)
        ));
        assert!(matches!(
            Endpoint::parse("10.0.0.1:70000").unwrap_err(),
            ParseError::PortOutOfRange(70000)
        ));
    }

    #[test]
    fn rejects_unterminated_ipv6() {
        assert!(matches!(
            Endpoint::parse("[::1:9000").unwrap_err(),
            ParseError::MalformedIpv6Literal(_)
        ));
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(Endpoint::parse("a:1").unwrap().to_string(), "a:1");
        assert_eq!(Endpoint::parse("[::1]:1").unwrap().to_string(), "[::1]:1");
    }
}
