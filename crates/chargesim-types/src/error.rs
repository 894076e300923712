//! Error types for type-level validation

use thiserror::Error;

/// Errors raised when constructing protocol types from raw values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// Connector IDs are 1-based
    #[error("connector id must be greater than 0")]
    InvalidConnectorId,
}
