//! Error types for wishring-core.
//!
//! Two layers of errors exist:
//!
//! - [`LinkError`] covers everything that can go wrong talking to the ring:
//!   transport failures, timeouts, state violations and retry exhaustion.
//!   These drive the link state machine into `Error` and are retried up to a
//!   bounded count before being surfaced.
//! - [`Error`] is what the counter engine and sync service return. Caller
//!   misuse (a zero amount, an out-of-range wish index, an invalid wish) is
//!   reported explicitly and never silently clamped.
//!
//! ## Handling
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`LinkError::Timeout`] | Retried with backoff |
//! | [`LinkError::Bluetooth`] | Retried with backoff |
//! | [`LinkError::DeviceNotFound`] | Retried with backoff |
//! | [`LinkError::NotReady`] | Do not retry, wait for `Ready` |
//! | [`LinkError::SessionActive`] | Do not retry, a session already owns the ring |
//! | [`LinkError::RetriesExhausted`] | Terminal, call `reconnect()` to start over |
//! | [`Error::Persistence`] | Surfaced, the operation is not applied |

use std::time::Duration;

use thiserror::Error;

use crate::link::LinkState;

/// Errors raised by the link layer.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LinkError {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is available.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// No matching ring advertised during the scan window.
    #[error("No WishRing found{}", identifier.as_ref().map(|id| format!(" matching '{}'", id)).unwrap_or_default())]
    DeviceNotFound {
        /// Address or identifier the scan was narrowed to, if any.
        identifier: Option<String>,
    },

    /// A required characteristic is missing from the discovered services.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// A payload operation was attempted outside the `Ready` state.
    #[error("Link not ready (state: {state})")]
    NotReady {
        /// State the link was in.
        state: LinkState,
    },

    /// A session for this device identity is already live.
    #[error("A session for device '{0}' is already active")]
    SessionActive(String),

    /// The connection dropped.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Every allowed attempt failed; the link stays in `Error`.
    #[error("Gave up after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Message of the final failure.
        last_error: String,
    },

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Failure reported by a non-BLE transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid link configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LinkError {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a device not found error.
    pub fn device_not_found(identifier: Option<&str>) -> Self {
        Self::DeviceNotFound {
            identifier: identifier.map(str::to_string),
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether another connection attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::DeviceNotFound { .. }
                | Self::CharacteristicNotFound { .. }
                | Self::Timeout { .. }
                | Self::ConnectionLost(_)
                | Self::Transport(_)
        )
    }
}

/// Errors returned by the counter engine and sync service.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Link layer failure.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// A payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] wishring_types::DecodeError),

    /// Increment amount was zero or negative.
    #[error("Invalid amount {0}: increments must be at least 1")]
    InvalidAmount(i64),

    /// Wish index outside the current wish list.
    #[error("Wish index {index} out of range (list has {len} wish(es))")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Length of the wish list.
        len: usize,
    },

    /// A wish entry or wish list failed validation.
    #[error("Invalid wish: {0}")]
    InvalidWish(#[from] wishring_types::WishError),

    /// The store failed; the operation was not applied.
    #[error("Persistence error: {0}")]
    Persistence(#[from] wishring_store::Error),

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an index out of range error.
    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { index, len }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using wishring-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        let err = LinkError::device_not_found(Some("AA:BB"));
        assert_eq!(err.to_string(), "No WishRing found matching 'AA:BB'");

        let err = LinkError::device_not_found(None);
        assert_eq!(err.to_string(), "No WishRing found");

        let err = LinkError::timeout("connect", Duration::from_secs(15));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("15s"));

        let err = LinkError::NotReady {
            state: LinkState::Scanning,
        };
        assert!(err.to_string().contains("Scanning"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LinkError::timeout("scan", Duration::from_secs(1)).is_retryable());
        assert!(LinkError::ConnectionLost("gone".into()).is_retryable());
        assert!(!LinkError::Cancelled.is_retryable());
        assert!(!LinkError::SessionActive("x".into()).is_retryable());
        assert!(!LinkError::NoAdapter.is_retryable());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::InvalidAmount(0).to_string(),
            "Invalid amount 0: increments must be at least 1"
        );
        let err = Error::index_out_of_range(3, 2);
        assert!(err.to_string().contains("3"));
        assert!(err.to_string().contains("2 wish"));
    }

    #[test]
    fn test_conversions() {
        let err: Error = LinkError::Cancelled.into();
        assert!(matches!(err, Error::Link(LinkError::Cancelled)));

        let err: Error = wishring_types::WishError::BlankText.into();
        assert!(matches!(err, Error::InvalidWish(_)));

        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<LinkError>();
    }
}
