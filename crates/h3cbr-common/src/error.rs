//! Common error types for the h3cbr driver.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`NetError`].
pub type NetResult<T> = Result<T, NetError>;

/// Boxed underlying cause of a failed device operation.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a [`NetError`], used by protocol front-ends to
/// pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty or malformed identifier or option.
    BadRequest,
    /// Unknown network or endpoint on a read path.
    NotFound,
    /// Endpoint option of the wrong type or shape.
    InvalidEndpointConfig,
    /// Request collides with existing state (device or table entry).
    Conflict,
    /// A kernel device operation failed after validation passed.
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name, used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::InvalidEndpointConfig => "invalid_endpoint_config",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the driver and its kernel gateway.
#[derive(Error, Diagnostic, Debug)]
pub enum NetError {
    /// Malformed request.
    #[error("Bad request: {message}")]
    #[diagnostic(code(h3cbr::bad_request))]
    BadRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// An option carried a value that could not be parsed.
    #[error("Invalid value for option {field}: {message}")]
    #[diagnostic(code(h3cbr::invalid_option))]
    InvalidOption {
        /// Option key.
        field: String,
        /// Why the value was rejected.
        message: String,
    },

    /// Network not registered with this driver.
    #[error("Network not found: {id}")]
    #[diagnostic(code(h3cbr::network::not_found))]
    NetworkNotFound {
        /// The network ID that was not found.
        id: String,
    },

    /// Endpoint not registered on its network.
    #[error("Endpoint not found: {id}")]
    #[diagnostic(code(h3cbr::endpoint::not_found))]
    EndpointNotFound {
        /// The endpoint ID that was not found.
        id: String,
    },

    /// Endpoint option with the wrong type or shape.
    #[error("Trying to create an endpoint with an invalid endpoint configuration: {field}")]
    #[diagnostic(
        code(h3cbr::endpoint::invalid_config),
        help("MAC addresses must be strings of the form aa:bb:cc:dd:ee:ff")
    )]
    InvalidEndpointConfig {
        /// Offending option key.
        field: String,
    },

    /// A link with the requested bridge name exists but is not a bridge.
    #[error("Existing interface {name} is not a bridge")]
    #[diagnostic(
        code(h3cbr::bridge::not_a_bridge),
        help("Pick another bridge name with -o net.bridge.bridge.name=<name>")
    )]
    NotABridge {
        /// Interface name.
        name: String,
    },

    /// Request conflicts with state already held by the driver.
    #[error("Conflict: {message}")]
    #[diagnostic(code(h3cbr::conflict))]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// A kernel link operation failed.
    #[error("Failed to {operation} on interface {interface}: {source}")]
    #[diagnostic(code(h3cbr::link))]
    Link {
        /// Operation that failed, e.g. "set MTU".
        operation: &'static str,
        /// Interface the operation addressed.
        interface: String,
        /// Underlying cause.
        #[source]
        source: Cause,
    },

    /// A kernel call did not answer within the gateway timeout.
    #[error("Timed out after {timeout_ms}ms trying to {operation} on interface {interface}")]
    #[diagnostic(code(h3cbr::link::timeout))]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Interface the operation addressed.
        interface: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(h3cbr::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(h3cbr::serialization))]
    Serialization(String),

    /// Internal error.
    #[error("Internal error: {message}")]
    #[diagnostic(code(h3cbr::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl NetError {
    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } | Self::InvalidOption { .. } | Self::Serialization(_) => {
                ErrorKind::BadRequest
            }
            Self::NetworkNotFound { .. } | Self::EndpointNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidEndpointConfig { .. } => ErrorKind::InvalidEndpointConfig,
            Self::NotABridge { .. } | Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Link { .. } | Self::Timeout { .. } | Self::Io(_) | Self::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Shorthand for [`NetError::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Shorthand for [`NetError::InvalidOption`].
    pub fn invalid_option(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`NetError::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Wrap the cause of a failed link operation.
    pub fn link(
        operation: &'static str,
        interface: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        Self::Link {
            operation,
            interface: interface.into(),
            source: source.into(),
        }
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetError::NetworkNotFound {
            id: "abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Network not found: abc123");
    }

    #[test]
    fn test_link_error_carries_context() {
        let err = NetError::link(
            "set MTU",
            "veth1a2b3c4",
            std::io::Error::other("operation not permitted"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to set MTU on interface veth1a2b3c4: operation not permitted"
        );
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(NetError::bad_request("x").kind(), ErrorKind::BadRequest);
        assert_eq!(
            NetError::invalid_option("mtu", "nope").kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(
            NetError::EndpointNotFound { id: "e".into() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            NetError::InvalidEndpointConfig {
                field: "mac".into()
            }
            .kind(),
            ErrorKind::InvalidEndpointConfig
        );
        assert_eq!(
            NetError::NotABridge { name: "eth0".into() }.kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such device");
        let err: NetError = io_err.into();
        assert!(matches!(err, NetError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
