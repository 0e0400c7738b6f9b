//! Utility modules shared by the bridge and its binary

pub mod env;
pub mod error;
pub mod logging;
pub mod signal;

// Re-export commonly used items
pub use env::{env_bool, env_opt, env_or_else};
pub use error::{log_error, result_to_option};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use signal::wait_for_shutdown_signal;
