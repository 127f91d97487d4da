//! Custom validators shared by the config sections.

use validator::ValidationError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Accepts a bare `tracing` level name, case-insensitively.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}
