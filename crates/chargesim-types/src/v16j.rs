//! OCPP 1.6J specific enumerations used by the simulation core

use serde::{Deserialize, Serialize};

/// Charge point status enumeration for OCPP 1.6J
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargePointStatus {
    /// Available for new transaction
    Available,
    /// Preparing for transaction
    Preparing,
    /// Charging in progress
    Charging,
    /// Charging suspended by EV
    SuspendedEV,
    /// Charging suspended by EVSE
    SuspendedEVSE,
    /// Transaction finished, ready to start new
    Finishing,
    /// Reserved for specific user
    Reserved,
    /// Out of order
    Faulted,
    /// Unavailable due to local action
    Unavailable,
}

impl ChargePointStatus {
    /// Check whether the status represents an active charging session
    pub fn is_charging(&self) -> bool {
        matches!(
            self,
            ChargePointStatus::Charging
                | ChargePointStatus::SuspendedEV
                | ChargePointStatus::SuspendedEVSE
        )
    }

    /// Check whether the status allows a new transaction to begin
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            ChargePointStatus::Available | ChargePointStatus::Reserved
        )
    }
}

impl std::fmt::Display for ChargePointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChargePointStatus::Available => "Available",
            ChargePointStatus::Preparing => "Preparing",
            ChargePointStatus::Charging => "Charging",
            ChargePointStatus::SuspendedEV => "SuspendedEV",
            ChargePointStatus::SuspendedEVSE => "SuspendedEVSE",
            ChargePointStatus::Finishing => "Finishing",
            ChargePointStatus::Reserved => "Reserved",
            ChargePointStatus::Faulted => "Faulted",
            ChargePointStatus::Unavailable => "Unavailable",
        };
        write!(f, "{}", name)
    }
}

/// Availability type for ChangeAvailability operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AvailabilityType {
    /// Connector accepts new transactions
    Operative,
    /// Connector rejects new transactions
    Inoperative,
}

impl std::fmt::Display for AvailabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvailabilityType::Operative => write!(f, "Operative"),
            AvailabilityType::Inoperative => write!(f, "Inoperative"),
        }
    }
}
