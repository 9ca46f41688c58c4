//! Error types for the forwarding bridge.

use std::fmt;

/// Why a transport exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportReason {
    /// The downstream address could not be reached.
    Unreachable,
    /// Reading or writing the socket failed.
    Io,
    /// The peer closed the connection.
    Closed,
    /// The send or receive deadline elapsed.
    Timeout,
}

impl TransportReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::Io => "io",
            Self::Closed => "closed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TransportReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a [`Transport`](super::Transport) implementation.
///
/// Carries no request identity; the bridge attaches correlation and operation
/// ids when it turns a fault into a [`BridgeError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct TransportFault {
    pub reason: TransportReason,
    pub detail: String,
}

impl TransportFault {
    #[must_use]
    pub fn new(reason: TransportReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn closed() -> Self {
        Self::new(TransportReason::Closed, "connection closed by peer")
    }
}

impl From<std::io::Error> for TransportFault {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let reason = match err.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::NotFound | ErrorKind::AddrNotAvailable => {
                TransportReason::Unreachable
            }
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
                TransportReason::Closed
            }
            _ => TransportReason::Io,
        };
        Self::new(reason, err.to_string())
    }
}

/// Errors returned by [`ForwardingBridge`](super::ForwardingBridge).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The request was rejected before anything was sent.
    #[error("{0}")]
    Validation(String),

    /// Sending or receiving failed, or a deadline elapsed.
    #[error("downstream transport {reason}: {detail}")]
    Transport {
        reason: TransportReason,
        detail: String,
        correlation_id: String,
        operation_id: String,
    },

    /// A reply arrived but was not a JSON object.
    #[error("invalid downstream reply: {detail}")]
    Protocol {
        detail: String,
        correlation_id: String,
        operation_id: String,
    },
}

impl BridgeError {
    /// Operation id of the request that failed, if one was assigned.
    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::Validation(_) => None,
            Self::Transport { operation_id, .. } | Self::Protocol { operation_id, .. } => {
                Some(operation_id)
            }
        }
    }

    /// Correlation id stamped on the failed request, if it got that far.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Validation(_) => None,
            Self::Transport { correlation_id, .. } | Self::Protocol { correlation_id, .. } => {
                Some(correlation_id)
            }
        }
    }

    /// Label used for the `outcome` metric dimension.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid",
            Self::Transport {
                reason: TransportReason::Timeout,
                ..
            } => "timeout",
            Self::Transport { .. } => "transport_error",
            Self::Protocol { .. } => "protocol_error",
        }
    }
}
