//! Errors raised while loading or validating configuration.

use std::fmt::Write;
use std::path::PathBuf;

use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid configuration:\n{}", describe(.0))]
    Validation(#[source] ValidationErrors),

    #[error("Configuration parsing error: {0}")]
    Parsing(#[from] Box<figment::Error>),

    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Parsing(Box::new(error))
    }
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Validation(errors)
    }
}

/// Flattens nested section errors into `section.field: code` lines.
fn describe(errors: &ValidationErrors) -> String {
    let mut output = String::new();
    collect(errors, "", &mut output);
    output
}

fn collect(errors: &ValidationErrors, prefix: &str, output: &mut String) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| error.code.to_string());
                    let _ = writeln!(output, "  - {path}: {message}");
                }
            }
            ValidationErrorsKind::Struct(inner) => collect(inner, &path, output),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect(inner, &format!("{path}[{index}]"), output);
                }
            }
        }
    }
}
