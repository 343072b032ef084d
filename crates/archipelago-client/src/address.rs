//! Server address parsing.
//!
//! Accepts `host:port`, optionally prefixed with `ws://` or `wss://`.
//! IPv6 hosts must be bracketed (`[::1]:38281`). Anything else is rejected
//! before any I/O happens.

use std::fmt;
use std::str::FromStr;

/// Errors produced while parsing a server address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The address string was empty.
    #[error("address is empty")]
    Empty,
    /// No `:port` suffix was found.
    #[error("address `{0}` has no port")]
    MissingPort(String),
    /// The host part is empty or contains forbidden characters.
    #[error("address `{0}` has an invalid host")]
    InvalidHost(String),
    /// The port is not a number in 1..=65535.
    #[error("address `{0}` has an invalid port")]
    InvalidPort(String),
}

/// A validated `host:port` target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Whether to use `wss://`.
    pub secure: bool,
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ServerAddress {
    /// WebSocket URL for this address.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        if self.host.contains(':') {
            format!("{scheme}://[{}]:{}", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl FromStr for ServerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        let (secure, rest) = if let Some(rest) = s.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = s.strip_prefix("ws://") {
            (false, rest)
        } else {
            (false, s)
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| AddressError::InvalidHost(s.to_string()))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
            if host.is_empty()
                || !host
                    .chars()
                    .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.')
            {
                return Err(AddressError::InvalidHost(s.to_string()));
            }
            (host, port)
        } else {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
            if host.is_empty() || !host.chars().all(is_host_char) {
                return Err(AddressError::InvalidHost(s.to_string()));
            }
            (host, port)
        };

        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddressError::InvalidPort(s.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| AddressError::InvalidPort(s.to_string()))?;
        if port == 0 {
            return Err(AddressError::InvalidPort(s.to_string()));
        }

        Ok(Self {
            secure,
            host: host.to_string(),
            port,
        })
    }
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_host_port() {
        let addr: ServerAddress = "archipelago.gg:38281".parse().unwrap();
        assert_eq!(addr.host, "archipelago.gg");
        assert_eq!(addr.port, 38281);
        assert!(!addr.secure);
        assert_eq!(addr.url(), "ws://archipelago.gg:38281");
    }

    #[test]
    fn test_scheme_prefixes() {
        let secure: ServerAddress = "wss://localhost:1234".parse().unwrap();
        assert!(secure.secure);
        assert_eq!(secure.url(), "wss://localhost:1234");
        let plain: ServerAddress = "ws://127.0.0.1:80/".parse().unwrap();
        assert_eq!(plain.url(), "ws://127.0.0.1:80");
    }

    #[test]
    fn test_ipv6_bracketed() {
        let addr: ServerAddress = "[::1]:38281".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.url(), "ws://[::1]:38281");
    }

    #[test]
    fn test_rejects_malformed() {
        let cases = [
            ("", AddressError::Empty),
            ("localhost", AddressError::MissingPort("localhost".into())),
            (":38281", AddressError::InvalidHost(":38281".into())),
            ("host:", AddressError::InvalidPort("host:".into())),
            ("host:+80", AddressError::InvalidPort("host:+80".into())),
            ("host:0", AddressError::InvalidPort("host:0".into())),
            ("host:70000", AddressError::InvalidPort("host:70000".into())),
            ("ho st:80", AddressError::InvalidHost("ho st:80".into())),
            ("http://host:80", AddressError::InvalidHost("http://host:80".into())),
            ("a:b:80", AddressError::InvalidHost("a:b:80".into())),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<ServerAddress>(), Err(expected), "input {input:?}");
        }
    }
}
