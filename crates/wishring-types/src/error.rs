//! Error types for wishring-types.

use thiserror::Error;

/// Errors that can occur when decoding device payloads or stored values.
///
/// Decoding failures are never fatal to a link session; callers are expected
/// to log and drop the offending packet.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// Payload did not have the fixed length the characteristic requires.
    #[error("Bad payload length: expected {expected} bytes, got {actual}")]
    BadLength {
        /// Number of bytes the layout requires.
        expected: usize,
        /// Number of bytes actually received.
        actual: usize,
    },

    /// A date key was not in `YYYY-MM-DD` form.
    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    /// A stored wish list could not be decoded.
    #[error("Invalid wish list: {0}")]
    InvalidWishList(String),
}

impl DecodeError {
    /// Create a bad length error.
    pub fn bad_length(expected: usize, actual: usize) -> Self {
        Self::BadLength { expected, actual }
    }
}

/// Result type alias using wishring-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Reasons a wish entry or wish list is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum WishError {
    /// Wish text is empty or whitespace only.
    #[error("Wish text must not be blank")]
    BlankText,

    /// Wish text exceeds the maximum length.
    #[error("Wish text is {len} characters, maximum is {max}")]
    TextTooLong { len: usize, max: usize },

    /// Target count must be positive.
    #[error("Target count must be greater than 0")]
    ZeroTarget,

    /// More wishes than a single day can hold.
    #[error("{count} wishes given, at most {max} are allowed per day")]
    TooManyWishes { count: usize, max: usize },
}
