//! # Connector State Aggregate
//!
//! This module provides the per-plug mutable state of a simulated charge
//! point: status, availability, energy meter, state of charge, the active
//! transaction and the auto meter configuration. Every mutator emits a typed
//! change notification on the connector's event bus; scenario node handlers
//! are the only legitimate external mutators while a scenario runs.
//!
//! The connector owns its meter value scheduler and, once attached, its
//! scenario manager; both are released exactly once by [`Connector::destroy`].

use crate::config::MeterConfig;
use crate::error::CoreError;
use crate::events::{ConnectorEvent, EventBus};
use crate::manager::ScenarioManager;
use crate::meter::{
    CurveConfig, CurvePoint, IncrementConfig, MeterValueScheduler, MeterValueSink,
    MeterValueStrategy,
};
use crate::transaction::Transaction;
use async_trait::async_trait;
use chargesim_types::{AvailabilityType, ChargePointStatus, ConnectorId, TransactionId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector identifier
    pub connector_id: ConnectorId,
    /// Meter register at creation in Wh
    #[serde(default)]
    pub initial_meter_wh: i64,
    /// Increment strategy used when auto metering has no curve
    #[serde(default = "IncrementConfig::fallback")]
    pub increment_fallback: IncrementConfig,
}

impl IncrementConfig {
    /// Default increment fallback: one sample per minute, 100 Wh each
    pub fn fallback() -> Self {
        Self {
            interval_seconds: 60,
            increment_wh: 100,
            max_time_seconds: None,
            max_value_wh: None,
        }
    }
}

/// Auto meter value configuration carried by the connector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoMeterConfig {
    /// Whether metering starts automatically with a transaction
    pub enabled: bool,
    /// Ordered curve control points; empty falls back to the increment config
    #[serde(default)]
    pub curve_points: Vec<CurvePoint>,
    /// Fixed curve tick interval; `None` derives one from the curve span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
}

/// Forwards scheduler updates to the protocol layer
#[async_trait]
pub trait MeterSend: Send + Sync {
    async fn send_meter_value(&self, connector_id: ConnectorId, value_wh: i64);
}

/// Connector implementation
#[derive(Clone)]
pub struct Connector {
    config: ConnectorConfig,
    status: Arc<RwLock<ChargePointStatus>>,
    availability: Arc<RwLock<AvailabilityType>>,
    meter_value_wh: Arc<RwLock<i64>>,
    soc_percent: Arc<RwLock<Option<f64>>>,
    transaction: Arc<RwLock<Option<Transaction>>>,
    auto_meter: Arc<RwLock<AutoMeterConfig>>,
    increment_fallback: Arc<RwLock<IncrementConfig>>,
    scheduler: Arc<MeterValueScheduler>,
    scenario_manager: Arc<Mutex<Option<Arc<ScenarioManager>>>>,
    events: EventBus<ConnectorEvent>,
}

impl Connector {
    /// Create a new connector in `Available`/`Operative` state
    pub fn new(config: ConnectorConfig) -> Self {
        Self::with_meter_config(config, MeterConfig::default())
    }

    /// Create a connector with explicit meter scheduler settings
    pub fn with_meter_config(config: ConnectorConfig, meter_config: MeterConfig) -> Self {
        let increment_fallback = config.increment_fallback.clone();
        let initial_meter_wh = config.initial_meter_wh;
        Self {
            config,
            status: Arc::new(RwLock::new(ChargePointStatus::Available)),
            availability: Arc::new(RwLock::new(AvailabilityType::Operative)),
            meter_value_wh: Arc::new(RwLock::new(initial_meter_wh)),
            soc_percent: Arc::new(RwLock::new(None)),
            transaction: Arc::new(RwLock::new(None)),
            auto_meter: Arc::new(RwLock::new(AutoMeterConfig::default())),
            increment_fallback: Arc::new(RwLock::new(increment_fallback)),
            scheduler: Arc::new(MeterValueScheduler::new(meter_config)),
            scenario_manager: Arc::new(Mutex::new(None)),
            events: EventBus::new(),
        }
    }

    /// Get connector ID
    pub fn connector_id(&self) -> ConnectorId {
        self.config.connector_id
    }

    /// The connector's change notification bus
    pub fn events(&self) -> &EventBus<ConnectorEvent> {
        &self.events
    }

    /// Get current status
    pub async fn status(&self) -> ChargePointStatus {
        *self.status.read().await
    }

    /// Set status; emits a change notification on actual transitions
    pub async fn set_status(&self, new_status: ChargePointStatus) {
        let old_status = {
            let mut status = self.status.write().await;
            let old = *status;
            *status = new_status;
            old
        };

        if old_status != new_status {
            info!(
                "connector {} status changed: {} -> {}",
                self.config.connector_id, old_status, new_status
            );
            self.events.emit(&ConnectorEvent::StatusChanged {
                connector_id: self.config.connector_id,
                from: old_status,
                to: new_status,
            });
        }
    }

    /// Get current availability
    pub async fn availability(&self) -> AvailabilityType {
        *self.availability.read().await
    }

    /// Set availability
    pub async fn set_availability(&self, availability: AvailabilityType) {
        let changed = {
            let mut current = self.availability.write().await;
            let changed = *current != availability;
            *current = availability;
            changed
        };

        if changed {
            info!(
                "connector {} availability changed to {}",
                self.config.connector_id, availability
            );
            self.events.emit(&ConnectorEvent::AvailabilityChanged {
                connector_id: self.config.connector_id,
                availability,
            });
        }
    }

    /// Get the meter register in Wh
    pub async fn meter_value_wh(&self) -> i64 {
        *self.meter_value_wh.read().await
    }

    /// Write the meter register; always emits, scheduler ticks included
    pub async fn set_meter_value_wh(&self, value_wh: i64) {
        *self.meter_value_wh.write().await = value_wh;
        self.events.emit(&ConnectorEvent::MeterValueChanged {
            connector_id: self.config.connector_id,
            value_wh,
        });
    }

    /// Get the simulated battery state of charge
    pub async fn soc_percent(&self) -> Option<f64> {
        *self.soc_percent.read().await
    }

    /// Set the simulated battery state of charge (clamped to 0..=100)
    pub async fn set_soc_percent(&self, soc_percent: Option<f64>) {
        let clamped = soc_percent.map(|soc| soc.clamp(0.0, 100.0));
        *self.soc_percent.write().await = clamped;
        self.events.emit(&ConnectorEvent::SocChanged {
            connector_id: self.config.connector_id,
            soc_percent: clamped,
        });
    }

    /// Get the active transaction
    pub async fn transaction(&self) -> Option<Transaction> {
        self.transaction.read().await.clone()
    }

    /// Check if a transaction is active
    pub async fn has_active_transaction(&self) -> bool {
        self.transaction.read().await.is_some()
    }

    /// Begin a transaction; the id stays unset until the central system
    /// confirms it via [`Connector::confirm_transaction`]
    pub async fn begin_transaction(
        &self,
        id_tag: impl Into<String>,
        initial_soc_percent: Option<f64>,
    ) -> Result<(), CoreError> {
        let id_tag = id_tag.into();
        {
            let mut transaction = self.transaction.write().await;
            if transaction.is_some() {
                return Err(CoreError::transaction_active(
                    self.config.connector_id.value(),
                ));
            }
            let meter_start = *self.meter_value_wh.read().await;
            *transaction = Some(Transaction::new(id_tag.clone(), meter_start));
        }

        if initial_soc_percent.is_some() {
            self.set_soc_percent(initial_soc_percent).await;
        }

        info!(
            "transaction started on connector {} for tag {}",
            self.config.connector_id, id_tag
        );
        self.events.emit(&ConnectorEvent::TransactionStarted {
            connector_id: self.config.connector_id,
            id_tag,
        });
        Ok(())
    }

    /// Record the server-assigned transaction id
    pub async fn confirm_transaction(&self, transaction_id: TransactionId) -> Result<(), CoreError> {
        {
            let mut transaction = self.transaction.write().await;
            let Some(transaction) = transaction.as_mut() else {
                return Err(CoreError::no_transaction(self.config.connector_id.value()));
            };
            transaction.confirm(transaction_id);
        }

        debug!(
            "transaction {} confirmed on connector {}",
            transaction_id, self.config.connector_id
        );
        self.events.emit(&ConnectorEvent::TransactionIdAssigned {
            connector_id: self.config.connector_id,
            transaction_id,
        });
        Ok(())
    }

    /// End the active transaction and return the finished record
    pub async fn end_transaction(&self) -> Result<Transaction, CoreError> {
        let finished = {
            let mut transaction = self.transaction.write().await;
            let Some(mut finished) = transaction.take() else {
                return Err(CoreError::no_transaction(self.config.connector_id.value()));
            };
            finished.stop();
            finished
        };

        info!(
            "transaction stopped on connector {} ({} Wh delivered)",
            self.config.connector_id,
            finished.energy_wh(*self.meter_value_wh.read().await)
        );
        self.events.emit(&ConnectorEvent::TransactionStopped {
            connector_id: self.config.connector_id,
        });
        Ok(finished)
    }

    /// Get the auto meter configuration
    pub async fn auto_meter_config(&self) -> AutoMeterConfig {
        self.auto_meter.read().await.clone()
    }

    /// Replace the auto meter configuration
    pub async fn set_auto_meter_config(&self, config: AutoMeterConfig) {
        let enabled = config.enabled;
        *self.auto_meter.write().await = config;
        self.events.emit(&ConnectorEvent::AutoMeterChanged {
            connector_id: self.config.connector_id,
            enabled,
        });
    }

    /// Get the increment fallback configuration
    pub async fn increment_fallback(&self) -> IncrementConfig {
        self.increment_fallback.read().await.clone()
    }

    /// Replace the increment fallback configuration
    pub async fn set_increment_fallback(&self, config: IncrementConfig) {
        *self.increment_fallback.write().await = config;
    }

    /// Start a meter strategy against this connector, replacing any active
    /// one; updates land in the register and go out through `send`
    pub fn start_meter_strategy(
        &self,
        strategy: MeterValueStrategy,
        send: Option<Arc<dyn MeterSend>>,
    ) {
        let sink = Arc::new(ConnectorMeterSink {
            connector: self.clone(),
            send,
        });
        self.scheduler.start(strategy, sink);
    }

    /// Start auto metering from the stored configuration: the curve when
    /// control points exist, the increment fallback otherwise. Returns
    /// `false` when auto metering is disabled.
    pub async fn start_auto_meter(&self, send: Option<Arc<dyn MeterSend>>) -> bool {
        let auto = self.auto_meter.read().await.clone();
        if !auto.enabled {
            debug!(
                "auto meter disabled on connector {}, not starting",
                self.config.connector_id
            );
            return false;
        }

        let strategy = if auto.curve_points.is_empty() {
            MeterValueStrategy::Increment(self.increment_fallback.read().await.clone())
        } else {
            MeterValueStrategy::Curve(CurveConfig {
                points: auto.curve_points,
                interval_seconds: auto.interval_seconds,
            })
        };
        self.start_meter_strategy(strategy, send);
        true
    }

    /// Stop the active meter strategy
    pub fn stop_meter(&self) {
        self.scheduler.stop();
    }

    /// Whether a meter strategy is currently running
    pub fn meter_active(&self) -> bool {
        self.scheduler.is_active()
    }

    /// Attach the scenario manager owned by this connector
    pub fn attach_scenario_manager(&self, manager: Arc<ScenarioManager>) {
        let mut slot = self
            .scenario_manager
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            warn!(
                "connector {} already has a scenario manager attached, replacing",
                self.config.connector_id
            );
        }
        *slot = Some(manager);
    }

    /// The attached scenario manager, if any
    pub fn scenario_manager(&self) -> Option<Arc<ScenarioManager>> {
        self.scenario_manager
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Tear the connector down: stops the meter scheduler and destroys the
    /// attached scenario manager. Call exactly once.
    pub async fn destroy(&self) {
        self.scheduler.stop();
        let manager = self
            .scenario_manager
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(manager) = manager {
            manager.destroy().await;
        }
        info!("connector {} destroyed", self.config.connector_id);
    }
}

/// Bridges scheduler updates into connector state and the protocol layer
struct ConnectorMeterSink {
    connector: Connector,
    send: Option<Arc<dyn MeterSend>>,
}

#[async_trait]
impl MeterValueSink for ConnectorMeterSink {
    async fn current_value_wh(&self) -> i64 {
        self.connector.meter_value_wh().await
    }

    async fn set_value_wh(&self, value_wh: i64) {
        self.connector.set_meter_value_wh(value_wh).await;
    }

    async fn send_value_wh(&self, value_wh: i64) {
        if let Some(send) = &self.send {
            send.send_meter_value(self.connector.connector_id(), value_wh)
                .await;
        }
    }
}
