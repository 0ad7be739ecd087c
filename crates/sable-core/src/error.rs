//! Error types for Sable Core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Source errors
    #[error("No source to play")]
    NoSource,

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("No playable quality in source")]
    NoPlayableQuality,

    #[error("Invalid source data: {0}")]
    InvalidData(String),

    // Transport errors
    #[error("{source_name} fetch failed: {error}")]
    Fetch {
        source_name: &'static str,
        error: FetchError,
    },

    // Decode errors
    #[error("Decoder rejected segment {sequence}: {message}")]
    Decode { sequence: u64, message: String },

    // Caller errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Player has been deleted")]
    Deleted,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error must tear down the current session
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::InvalidParameter(_)
                | Error::InvalidState(_)
                | Error::InvalidConfig(_)
                | Error::Deleted
        )
    }

    /// Returns the error code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NoSource => "NO_SOURCE",
            Error::UnsupportedMediaType(_) => "MEDIA_TYPE_UNSUPPORTED",
            Error::NoPlayableQuality => "NO_QUALITY",
            Error::InvalidData(_) => "INVALID_DATA",
            Error::Fetch { .. } => "FETCH",
            Error::Decode { .. } => "DECODE",
            Error::InvalidParameter(_) => "INVALID_PARAMETER",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Deleted => "DELETED",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Classify into the public error taxonomy
    pub fn error_type(&self) -> ErrorType {
        match self {
            Error::NoSource => ErrorType::NoSource,
            Error::UnsupportedMediaType(_) | Error::NoPlayableQuality => ErrorType::NotSupported,
            Error::InvalidData(_) | Error::Decode { .. } => ErrorType::InvalidData,
            Error::Fetch { error, .. } => error.error_type(),
            Error::InvalidParameter(_) | Error::InvalidConfig(_) => ErrorType::InvalidParameter,
            Error::InvalidState(_) | Error::Deleted => ErrorType::InvalidState,
            Error::Internal(_) => ErrorType::Generic,
        }
    }

    /// Build the immutable error value delivered to listeners
    pub fn to_player_error(&self, source: &str) -> PlayerError {
        let code = match self {
            Error::Fetch { error, .. } => error.status.map(u32::from).unwrap_or(0),
            _ => 0,
        };
        let source = match self {
            Error::Fetch { source_name, .. } => *source_name,
            Error::Decode { .. } => "Decoder",
            _ => source,
        };
        PlayerError {
            source: source.to_string(),
            error_type: self.error_type(),
            code,
            message: self.to_string(),
        }
    }
}

/// Public error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    #[serde(rename = "Error")]
    Generic,
    #[serde(rename = "ErrorNotSupported")]
    NotSupported,
    #[serde(rename = "ErrorNoSource")]
    NoSource,
    #[serde(rename = "ErrorInvalidData")]
    InvalidData,
    #[serde(rename = "ErrorInvalidState")]
    InvalidState,
    #[serde(rename = "ErrorInvalidParameter")]
    InvalidParameter,
    #[serde(rename = "ErrorTimeout")]
    Timeout,
    #[serde(rename = "ErrorNetwork")]
    Network,
    #[serde(rename = "ErrorNetworkIO")]
    NetworkIo,
    #[serde(rename = "ErrorAuthorization")]
    Authorization,
    /// Status code 429 means the concurrent-viewer limit was hit, 404 that the
    /// stream does not exist or is offline.
    #[serde(rename = "ErrorNotAvailable")]
    NotAvailable,
}

impl ErrorType {
    /// Wire name used in event payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Generic => "Error",
            ErrorType::NotSupported => "ErrorNotSupported",
            ErrorType::NoSource => "ErrorNoSource",
            ErrorType::InvalidData => "ErrorInvalidData",
            ErrorType::InvalidState => "ErrorInvalidState",
            ErrorType::InvalidParameter => "ErrorInvalidParameter",
            ErrorType::Timeout => "ErrorTimeout",
            ErrorType::Network => "ErrorNetwork",
            ErrorType::NetworkIo => "ErrorNetworkIO",
            ErrorType::Authorization => "ErrorAuthorization",
            ErrorType::NotAvailable => "ErrorNotAvailable",
        }
    }

    /// True for the network family (`NETWORK`, `NETWORK_IO`, `TIMEOUT`)
    pub fn is_network(&self) -> bool {
        matches!(self, ErrorType::Network | ErrorType::NetworkIo | ErrorType::Timeout)
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload of the `ERROR` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerError {
    /// Component that produced the error, e.g. "MasterPlaylist" or "Segment"
    pub source: String,
    /// Result code
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    /// Protocol status (HTTP status for transport failures, 0 otherwise)
    pub code: u32,
    /// Human-readable description
    pub message: String,
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({}): {}", self.source, self.error_type, self.code, self.message)
    }
}

/// Failure class reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Server answered with an error status
    Status,
    /// Connection or read failure
    Io,
    /// Operation exceeded the request timeout
    Timeout,
    /// Response body could not be interpreted
    Parse,
    /// Source format the transport cannot serve
    Unsupported,
}

/// Error returned by transport operations
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind:?} (status {status:?}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Status,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Io,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Timeout,
            status: None,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Parse,
            status: None,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Unsupported,
            status: None,
            message: message.into(),
        }
    }

    /// Map the transport failure onto the public taxonomy
    pub fn error_type(&self) -> ErrorType {
        match (self.kind, self.status) {
            (FetchErrorKind::Timeout, _) => ErrorType::Timeout,
            (FetchErrorKind::Io, _) => ErrorType::NetworkIo,
            (FetchErrorKind::Parse, _) => ErrorType::InvalidData,
            (FetchErrorKind::Unsupported, _) => ErrorType::NotSupported,
            (FetchErrorKind::Status, Some(401 | 403)) => ErrorType::Authorization,
            (FetchErrorKind::Status, Some(404 | 410 | 429)) => ErrorType::NotAvailable,
            (FetchErrorKind::Status, _) => ErrorType::Network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(FetchError::status(403, "forbidden"), ErrorType::Authorization)]
    #[case(FetchError::status(401, "unauthorized"), ErrorType::Authorization)]
    #[case(FetchError::status(404, "offline"), ErrorType::NotAvailable)]
    #[case(FetchError::status(429, "too many viewers"), ErrorType::NotAvailable)]
    #[case(FetchError::status(500, "server"), ErrorType::Network)]
    #[case(FetchError::io("reset"), ErrorType::NetworkIo)]
    #[case(FetchError::timeout("slow"), ErrorType::Timeout)]
    #[case(FetchError::parse("garbage"), ErrorType::InvalidData)]
    #[case(FetchError::unsupported("progressive"), ErrorType::NotSupported)]
    fn test_fetch_error_classification(#[case] error: FetchError, #[case] expected: ErrorType) {
        assert_eq!(error.error_type(), expected);
    }

    #[test]
    fn test_player_error_carries_status() {
        let err = Error::Fetch {
            source_name: "MasterPlaylist",
            error: FetchError::status(429, "limit"),
        };
        let payload = err.to_player_error("Player");
        assert_eq!(payload.source, "MasterPlaylist");
        assert_eq!(payload.error_type, ErrorType::NotAvailable);
        assert_eq!(payload.code, 429);
    }

    #[test]
    fn test_parameter_errors_are_not_fatal() {
        assert!(!Error::InvalidParameter("volume".into()).is_fatal());
        assert!(!Error::InvalidState("pause".into()).is_fatal());
        assert!(Error::NoSource.is_fatal());
        assert!(Error::Decode { sequence: 1, message: "bad".into() }.is_fatal());
    }

    #[test]
    fn test_error_type_wire_names() {
        let json = serde_json::to_string(&ErrorType::NetworkIo).unwrap();
        assert_eq!(json, "\"ErrorNetworkIO\"");
        assert_eq!(ErrorType::NotAvailable.as_str(), "ErrorNotAvailable");
    }
}
