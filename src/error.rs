//! Error handling for the decorator
//!
//! Parsing and classification never fail — every ambiguous input degrades to
//! a conservative result and a debug-level log entry. Errors exist only for
//! the callback/host plumbing around the core: invoking a callback whose
//! receiver is gone, channel bookkeeping, and the bounded conversation-id
//! probe.
//!
//! ## Error Handling Patterns
//!
//! ```rust
//! use wechat_decorator::{DecoratorError, Result};
//!
//! fn fire(send: impl Fn() -> Result<()>) {
//!     if let Err(DecoratorError::CallbackCancelled(key)) = send() {
//!         // Logged and abandoned; never retried, never propagated to the host.
//!         eprintln!("callback gone for {key}");
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type for decorator operations
pub type Result<T> = std::result::Result<T, DecoratorError>;

/// Errors that can occur around the decorator core
///
/// None of these ever crosses the host's callback dispatch path: public
/// entry points catch them and return a safe default (`false` / `None` /
/// input unchanged).
#[derive(Error, Debug)]
pub enum DecoratorError {
    /// The underlying reply or mark-read callback is no longer valid
    ///
    /// # Examples
    ///
    /// ```rust
    /// use wechat_decorator::DecoratorError;
    ///
    /// let error = DecoratorError::CallbackCancelled("0|com.tencent.mm|38".to_string());
    /// assert_eq!(error.to_string(), "Callback cancelled: 0|com.tencent.mm|38");
    /// ```
    #[error("Callback cancelled: {0}")]
    CallbackCancelled(String),

    /// Waiting on the conversation-id probe exceeded the hard bound
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Notification channel bookkeeping failed on the host side
    #[error("Channel error: {0}")]
    Channel(String),

    /// JSON serialization/deserialization error
    ///
    /// Automatically converted from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DecoratorError::CallbackCancelled("key-1".to_string());
        assert_eq!(error.to_string(), "Callback cancelled: key-1");

        let error = DecoratorError::Timeout("conversation id".to_string());
        assert_eq!(error.to_string(), "Timed out: conversation id");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: DecoratorError = json_error.into();
        assert!(matches!(error, DecoratorError::Json(_)));
    }
}
