//! Error types for the chainwatch pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single violated constraint found while validating a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Path to the offending field (e.g. `rules[2].match.address`).
    pub path: String,
    /// The constraint the field failed (e.g. `integer >= 0`).
    pub constraint: String,
    /// The value that was received, rendered as JSON (`undefined` if missing).
    pub received: String,
}

impl FieldViolation {
    pub fn new(
        path: impl Into<String>,
        constraint: impl Into<String>,
        received: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            constraint: constraint.into(),
            received: received.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, received {}",
            self.path, self.constraint, self.received
        )
    }
}

/// Every violation found in one document, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    /// Shorthand for a single violation.
    pub fn single(
        path: impl Into<String>,
        constraint: impl Into<String>,
        received: impl Into<String>,
    ) -> Self {
        Self::new(vec![FieldViolation::new(path, constraint, received)])
    }

    /// Returns `true` if any violation is reported at `path`.
    pub fn has_path(&self, path: &str) -> bool {
        self.violations.iter().any(|v| v.path == path)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: ")?;
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors that can occur in the configuration store and the ingestion loop.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration load failed: {0}")]
    ConfigLoad(String),

    #[error("Configuration write failed: {0}")]
    ConfigWrite(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider rate limited: {0}")]
    RateLimited(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl WatchError {
    /// HTTP status an API layer should map this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Conflict(_) => 400,
            Self::NotFound(_) => 404,
            Self::Provider(_) | Self::RateLimited(_) => 502,
            Self::ConfigLoad(_) | Self::ConfigWrite(_) | Self::Persistence(_) => 500,
        }
    }

    /// Returns `true` if the upstream provider asked us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}
