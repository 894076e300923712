//! Identifier newtypes shared across the simulation core

use crate::error::TypeError;
use serde::{Deserialize, Serialize};

/// Connector identifier (1-based; 0 addresses the whole charge point in
/// OCPP and is rejected here)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorId(u32);

impl ConnectorId {
    pub fn new(id: u32) -> Result<Self, TypeError> {
        if id == 0 {
            Err(TypeError::InvalidConnectorId)
        } else {
            Ok(ConnectorId(id))
        }
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier assigned by the central system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(i32);

impl TransactionId {
    pub fn new(id: i32) -> Self {
        TransactionId(id)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reservation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(i32);

impl ReservationId {
    pub fn new(id: i32) -> Self {
        ReservationId(id)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
