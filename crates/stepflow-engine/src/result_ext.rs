//! Result extension trait for logging errors with context.
//!
//! Message handlers never propagate errors back to the consumer loop: a
//! failed handler is logged here and the message is acknowledged anyway.

use std::fmt::Display;
use tracing::error;

/// Extension trait for logging errors with context.
pub trait ResultExt<T, E> {
    /// Log the error with context if this is an `Err` variant.
    ///
    /// The original `Result` is returned unchanged.
    ///
    /// ```ignore
    /// use stepflow_engine::result_ext::ResultExt;
    ///
    /// let result: Result<i32, &str> = Err("broker unreachable");
    /// let _ = result.log("publishing step");
    /// ```
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "stepflow_engine",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }
}

/// Extension trait for logging a missing value, returning the Option unchanged.
pub trait OptionResultExt<T> {
    /// Log if this is a `None` variant.
    fn log_none<S: ToString>(self, context: S) -> Option<T>;
}

impl<T> OptionResultExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: ToString>(self, context: S) -> Option<T> {
        if self.is_none() {
            let caller_location = std::panic::Location::caller();
            tracing::warn!(
                target: "stepflow_engine",
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Expected value was None"
            );
        }
        self
    }
}
