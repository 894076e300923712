//! # Core Error Handling
//!
//! This module provides error types for the connector state aggregate, the
//! meter value scheduler and the scenario engine, with specific variants for
//! the failure modes each of them can hit.

use thiserror::Error;

/// Errors raised by the connector aggregate and meter scheduler
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Operation not valid in the current connector state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A transaction is already active on the connector
    #[error("Transaction already active on connector {connector_id}")]
    TransactionActive { connector_id: u32 },

    /// No active transaction on the connector
    #[error("No active transaction on connector {connector_id}")]
    NoTransaction { connector_id: u32 },

    /// Meter strategy configuration error
    #[error("Meter configuration error: {0}")]
    MeterConfiguration(String),
}

impl CoreError {
    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Create a transaction-already-active error
    pub fn transaction_active(connector_id: u32) -> Self {
        Self::TransactionActive { connector_id }
    }

    /// Create a no-active-transaction error
    pub fn no_transaction(connector_id: u32) -> Self {
        Self::NoTransaction { connector_id }
    }

    /// Create a meter configuration error
    pub fn meter_configuration(message: impl Into<String>) -> Self {
        Self::MeterConfiguration(message.into())
    }
}

/// Errors raised by the scenario engine
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// Structural problem in the scenario graph (e.g. missing start node).
    /// Fatal: reported before any node runs.
    #[error("Scenario graph error: {0}")]
    Graph(String),

    /// A node handler (injected callback) failed; aborts the flow
    #[error("Node handler failed at '{node_id}': {message}")]
    Handler { node_id: String, message: String },

    /// Re-entry into a running executor was rejected
    #[error("Scenario '{0}' is already running")]
    AlreadyRunning(String),

    /// Scenario id not present in the manager
    #[error("Scenario not found: {0}")]
    NotFound(String),

    /// Imported scenario document failed validation
    #[error("Scenario import rejected: {0}")]
    Import(String),

    /// Internal executor failure (e.g. a branch task died)
    #[error("Internal executor error: {0}")]
    Internal(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from a file-backed repository
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScenarioError {
    /// Create a graph structure error
    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph(message.into())
    }

    /// Create a node handler error
    pub fn handler(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Create an already-running error
    pub fn already_running(scenario_id: impl Into<String>) -> Self {
        Self::AlreadyRunning(scenario_id.into())
    }

    /// Create a not-found error
    pub fn not_found(scenario_id: impl Into<String>) -> Self {
        Self::NotFound(scenario_id.into())
    }

    /// Create an import validation error
    pub fn import(message: impl Into<String>) -> Self {
        Self::Import(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Result type for scenario engine operations
pub type ScenarioResult<T> = Result<T, ScenarioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_display() {
        let error = CoreError::transaction_active(1);
        assert_eq!(
            error.to_string(),
            "Transaction already active on connector 1"
        );
    }

    #[test]
    fn test_scenario_error_helpers() {
        let error = ScenarioError::handler("node-3", "callback refused");
        assert!(matches!(error, ScenarioError::Handler { .. }));
        assert_eq!(
            error.to_string(),
            "Node handler failed at 'node-3': callback refused"
        );

        let error = ScenarioError::graph("scenario has no start node");
        assert_eq!(
            error.to_string(),
            "Scenario graph error: scenario has no start node"
        );
    }
}
