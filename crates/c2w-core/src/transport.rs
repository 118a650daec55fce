//! Transport binding selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 1900;

/// Lowest port accepted on the command line or in the config file.
pub const MIN_PORT: u16 = 1501;

/// Returns true if `port` may be used for the chat service.
pub fn is_valid_port(port: u16) -> bool {
    port >= MIN_PORT
}

/// The transport a client or server speaks the protocol over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Byte stream; frames are length-prefixed and reassembled.
    #[default]
    Tcp,
    /// Datagrams; one frame per datagram, subject to simulated loss.
    Udp,
}

impl TransportKind {
    /// Returns true for the datagram binding.
    pub fn is_datagram(self) -> bool {
        matches!(self, TransportKind::Udp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Udp => write!(f, "udp"),
        }
    }
}

/// Error returned when a transport name is not recognized.
#[derive(Debug, Error)]
#[error("unknown transport {0:?} (expected \"tcp\" or \"udp\")")]
pub struct ParseTransportError(String);

impl FromStr for TransportKind {
    type Err = ParseTransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "udp" => Ok(TransportKind::Udp),
            _ => Err(ParseTransportError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!("TCP".parse::<TransportKind>().unwrap(), TransportKind::Tcp);
        assert_eq!("udp".parse::<TransportKind>().unwrap(), TransportKind::Udp);
        assert!("sctp".parse::<TransportKind>().is_err());
    }

    #[test]
    fn port_range() {
        assert!(is_valid_port(DEFAULT_PORT));
        assert!(is_valid_port(MIN_PORT));
        assert!(is_valid_port(u16::MAX));
        assert!(!is_valid_port(80));
        assert!(!is_valid_port(1500));
    }

    #[test]
    fn serde_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            transport: TransportKind,
        }

        let parsed: Wrapper = toml::from_str("transport = \"udp\"").unwrap();
        assert_eq!(parsed.transport, TransportKind::Udp);
    }
}
