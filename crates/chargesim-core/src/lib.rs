//! # Chargesim Core
//!
//! This crate provides the simulation core of a charge point speaking a
//! stateful device-to-server protocol. It supports:
//!
//! - Per-connector state simulation (status, availability, meter, battery
//!   state of charge, transaction lifecycle)
//! - A directed-graph scenario engine with pause/resume/step control,
//!   trigger-based auto-launch and parallel branch execution
//! - Timer-driven meter value progression via increment or Bézier-curve
//!   strategies
//! - A typed synchronous event surface for connector and executor changes
//! - Pluggable scenario persistence
//!
//! Protocol I/O is intentionally absent: nodes call out through the
//! injected [`executor::ScenarioDriver`] contract and the wire layer lives
//! with the embedding application.

pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod executor;
pub mod manager;
pub mod meter;
pub mod repository;
pub mod scenario;
pub mod transaction;

pub use config::{CoreConfig, ExecutorConfig, MeterConfig};
pub use connector::{AutoMeterConfig, Connector, ConnectorConfig, MeterSend};
pub use error::{CoreError, ScenarioError, ScenarioResult};
pub use events::{ConnectorEvent, EventBus, ExecutorEvent, Subscription};
pub use executor::{
    ExecutionContext, ExecutionState, ReservationRequest, ScenarioDriver, ScenarioExecutor,
};
pub use manager::ScenarioManager;
pub use meter::{
    curve_value_kwh, CurveConfig, CurvePoint, IncrementConfig, MeterValueScheduler, MeterValueSink,
    MeterValueStrategy,
};
pub use repository::{FileScenarioRepository, InMemoryScenarioRepository, ScenarioRepository};
pub use scenario::{
    Edge, ExecutionMode, NodeData, NodeId, PlugAction, ScenarioDefinition, ScenarioNode,
    ScenarioTarget, TransactionAction, Trigger,
};
pub use transaction::Transaction;
