//! Errors surfaced by connection and session operations.

use crate::address::AddressError;
use crate::events::DisconnectReason;
use crate::packets::ConnectionRefusedReason;
use crate::transport::TransportError;

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager),
/// [`Session`](crate::Session) and the trackers that send through them.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The address did not parse; nothing was opened.
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// The server did not answer in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The server rejected `Connect`.
    #[error("connection refused: {}", join_reasons(.0))]
    ConnectionRefused(Vec<ConnectionRefusedReason>),

    /// The transport failed while opening or during the handshake.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Packets can only be sent on a connected link.
    #[error("not connected")]
    NotConnected,

    /// The connection ended while a request was outstanding.
    #[error("connection lost: {0}")]
    Disconnected(DisconnectReason),

    /// A packet could not be serialized.
    #[error("could not encode packets: {0}")]
    Encode(#[from] serde_json::Error),
}

fn join_reasons(reasons: &[ConnectionRefusedReason]) -> String {
    if reasons.is_empty() {
        return "no reason given".to_string();
    }
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_message_lists_reasons() {
        let err = SessionError::ConnectionRefused(vec![
            ConnectionRefusedReason::InvalidSlot,
            ConnectionRefusedReason::Other("Banned".into()),
        ]);
        assert_eq!(err.to_string(), "connection refused: InvalidSlot, Banned");
        assert_eq!(
            SessionError::ConnectionRefused(Vec::new()).to_string(),
            "connection refused: no reason given"
        );
    }

    #[test]
    fn test_address_error_converts() {
        let err: SessionError = AddressError::Empty.into();
        assert!(matches!(err, SessionError::InvalidAddress(AddressError::Empty)));
    }
}
