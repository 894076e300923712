//! # Chargesim Types
//!
//! This crate provides the foundational types shared across the chargesim
//! workspace: charge point status and availability enumerations as they
//! appear on the wire, plus the identifier newtypes used by the connector
//! and scenario layers.

pub mod common;
pub mod error;
pub mod v16j;

pub use common::{ConnectorId, ReservationId, TransactionId};
pub use error::TypeError;
pub use v16j::{AvailabilityType, ChargePointStatus};
