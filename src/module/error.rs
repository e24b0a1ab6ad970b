//! Error types for the generation pass.

use std::fmt;

use thiserror::Error;

/// Fields that must be present once the module is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    Package,
    Settings,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package => f.write_str("package"),
            Self::Settings => f.write_str("settings"),
        }
    }
}

/// Static configuration mistakes. Fatal for the whole pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("`{field}` should not be empty")]
    MissingRequiredField { field: RequiredField },
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to serialize settings: {0}")]
    Serialize(String),

    #[error("failed to parse settings: {0}")]
    Parse(String),

    #[error("I/O error writing artifacts: {0}")]
    Io(#[from] std::io::Error),
}
