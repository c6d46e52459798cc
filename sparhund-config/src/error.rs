//! Error types for configuration loading and validation

use std::path::PathBuf;
use thiserror::Error;
use validator::ValidationErrors;

/// Unified configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found error.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Configuration validation error.
    #[error("Invalid configuration:\n{}", format_validation_errors(.0))]
    Validation(#[source] ValidationErrors),

    /// Figment parsing error.
    #[error("Configuration parsing error: {0}")]
    Parsing(#[from] Box<figment::Error>),

    /// I/O error.
    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flattens nested validation errors into `section.field` lines.
fn format_validation_errors(errors: &ValidationErrors) -> String {
    use std::fmt::Write;
    use validator::ValidationErrorsKind;

    fn walk(prefix: &str, errors: &ValidationErrors, output: &mut String) {
        for (field, kind) in errors.errors() {
            let path = if prefix.is_empty() {
                field.to_string()
            } else {
                format!("{}.{}", prefix, field)
            };
            match kind {
                ValidationErrorsKind::Field(field_errors) => {
                    let _ = writeln!(output, "Field '{}':", path);
                    for error in field_errors {
                        let message = match &error.message {
                            Some(msg) => msg.to_string(),
                            None => error.code.to_string(),
                        };
                        let _ = writeln!(output, "  - {}", message);
                    }
                }
                ValidationErrorsKind::Struct(inner) => walk(&path, inner, output),
                ValidationErrorsKind::List(items) => {
                    for (idx, inner) in items {
                        walk(&format!("{}[{}]", path, idx), inner, output);
                    }
                }
            }
        }
    }

    let mut output = String::new();
    walk("", errors, &mut output);
    output
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Validation(errors)
    }
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Parsing(Box::new(error))
    }
}
