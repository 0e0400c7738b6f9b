//! Environment variable utilities
//!
//! Provides helpers for reading environment variables with defaults.

/// Get environment variable or compute default
///
/// Empty values count as unset, so `WEBAPP_BRIDGE_HOME=` falls back like a
/// missing variable.
///
/// # Example
/// ```rust
/// use webapp_bridge::utils::env_or_else;
///
/// let home = env_or_else("WEBAPP_BRIDGE_HOME", || "serverhome".to_string());
/// ```
pub fn env_or_else<F>(key: &str, f: F) -> String
where
    F: FnOnce() -> String,
{
    env_opt(key).unwrap_or_else(f)
}

/// Get environment variable as Option
///
/// Returns `Some(value)` if set and non-empty, `None` otherwise.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get environment variable as boolean
///
/// Returns `true` if value is "true", "1", "yes", "on" (case-insensitive).
/// Returns `false` otherwise or if not set.
pub fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(false)
}
