use crate::connection::{ConnectionId, ConnectionStatus};

/// Errors surfaced by [`Endpoint`](crate::Endpoint) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// No connection was ever issued under this handle
    #[error("unknown connection id {0}")]
    UnknownHandle(ConnectionId),

    /// The connection exists but is not open
    #[error("connection {id} is not open (status: {status})")]
    NotConnected {
        id: ConnectionId,
        status: ConnectionStatus,
    },

    /// The address could not be turned into a connection attempt
    #[error("failed to connect: {0}")]
    ConnectFailure(String),

    /// A request or stream is already outstanding on this handle
    #[error("connection {0} already has a request in flight")]
    RequestInFlight(ConnectionId),

    /// The transport task rejected or dropped an outgoing frame
    #[error("transport error: {0}")]
    Transport(String),
}

impl EndpointError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::UnknownHandle(_) => "unknown_handle",
            Self::NotConnected { .. } => "not_connected",
            Self::ConnectFailure(_) => "connect_failure",
            Self::RequestInFlight(_) => "request_in_flight",
            Self::Transport(_) => "transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            EndpointError::UnknownHandle(ConnectionId(3)).error_code(),
            "unknown_handle"
        );
        assert_eq!(
            EndpointError::NotConnected {
                id: ConnectionId(0),
                status: ConnectionStatus::Connecting,
            }
            .error_code(),
            "not_connected"
        );
        assert_eq!(
            EndpointError::RequestInFlight(ConnectionId(1)).error_code(),
            "request_in_flight"
        );
    }

    #[test]
    fn messages_name_the_handle() {
        let err = EndpointError::UnknownHandle(ConnectionId(7));
        assert_eq!(err.to_string(), "unknown connection id 7");

        let err = EndpointError::NotConnected {
            id: ConnectionId(2),
            status: ConnectionStatus::Closed {
                code: 1000,
                reason: String::new(),
            },
        };
        assert!(err.to_string().contains("connection 2 is not open"));
        assert!(err.to_string().contains("Closed"));
    }
}
