//! Error types for the booster wrapper.

use thiserror::Error;

use crate::native::NativeError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors surfaced by [`Booster`](crate::Booster) operations.
#[derive(Debug, Error)]
pub enum BoosterError {
    /// The engine reported a failure; the message is its last error string.
    #[error("native error: {0}")]
    Native(#[from] NativeError),

    /// Arguments violated the wrapper contract. No native call was made.
    #[error("invalid argument: {0}")]
    Contract(String),

    /// Encoding or decoding the booster for a serialization framework failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Reading or writing a stream or file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The booster's handle has already been released.
    #[error("booster has been disposed")]
    Disposed,
}

impl BoosterError {
    pub(crate) fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// Message reported by the engine, if this is a native failure.
    pub fn native_message(&self) -> Option<&str> {
        match self {
            Self::Native(err) => Some(err.message()),
            _ => None,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Result type for booster operations.
pub type Result<T> = std::result::Result<T, BoosterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_error_keeps_engine_message() {
        let err = BoosterError::from(NativeError::new("Invalid booster handle"));
        assert_eq!(err.native_message(), Some("Invalid booster handle"));
        assert!(err.to_string().contains("Invalid booster handle"));
    }

    #[test]
    fn contract_error_has_no_native_message() {
        let err = BoosterError::contract("iteration range must have two elements");
        assert!(err.native_message().is_none());
        assert!(matches!(err, BoosterError::Contract(_)));
    }
}
