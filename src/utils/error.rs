//! Error handling utilities for graceful degradation
//!
//! The tracker must never stop on a single bad module, so most call sites
//! log the failure and move on. These helpers keep that pattern uniform.

use tracing::warn;

/// Execute an operation and log errors without failing
///
/// Returns `Some(T)` on success, `None` on error (after logging).
///
/// # Example
/// ```rust
/// use webapp_bridge::utils::log_error;
///
/// let parsed: Option<u16> = log_error(|| "8080".parse::<u16>(), "Invalid port");
/// assert_eq!(parsed, Some(8080));
/// ```
pub fn log_error<F, T, E>(operation: F, context: &str) -> Option<T>
where
    F: FnOnce() -> Result<T, E>,
    E: std::fmt::Display,
{
    result_to_option(operation(), context)
}

/// Convert a Result to an Option, logging the error
///
/// Returns `Some(T)` on success, `None` on error (after logging).
pub fn result_to_option<T, E>(result: Result<T, E>, context: &str) -> Option<T>
where
    E: std::fmt::Display,
{
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{}: {}", context, e);
            None
        }
    }
}
