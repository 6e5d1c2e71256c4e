//! Errors surfaced to the operator by a single command.

use ws_endpoint::EndpointError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("Unrecognized command")]
    Unrecognized(String),

    #[error("cannot build a request from '{0}'")]
    UnsupportedRequest(String),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

impl CommandError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::MalformedCommand(_) => "malformed_command",
            Self::Unrecognized(_) => "unrecognized_command",
            Self::UnsupportedRequest(_) => "unsupported_request",
            Self::Endpoint(e) => e.error_code(),
        }
    }

    /// Usage hint to print under the error, if any
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MalformedCommand(_) | Self::Unrecognized(_) => Some("type 'help' for the list of commands"),
            Self::UnsupportedRequest(_) => Some("type 'help' for the Deribit request syntax"),
            Self::Endpoint(EndpointError::UnknownHandle(_)) => Some("> Unknown connection id"),
            Self::Endpoint(_) => None,
        }
    }
}
