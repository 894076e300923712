//! # Scenario Manager
//!
//! This module owns the set of scenarios scoped to one connector, reacts to
//! connector status-change notifications and enforces the replacement
//! policy: when a status transition matches one or more enabled triggers,
//! everything currently running is stopped and the whole matching set starts
//! fresh. Manual invocation is additive and never stops other scenarios.

use crate::config::ExecutorConfig;
use crate::connector::Connector;
use crate::error::ScenarioError;
use crate::events::{ConnectorEvent, EventBus, ExecutorEvent, Subscription};
use crate::executor::{ExecutionContext, ScenarioDriver, ScenarioExecutor};
use crate::repository::ScenarioRepository;
use crate::scenario::{ExecutionMode, ScenarioDefinition};
use chargesim_types::{ChargePointStatus, ConnectorId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Per-connector scenario registry and execution policy
pub struct ScenarioManager {
    connector_id: ConnectorId,
    driver: Arc<dyn ScenarioDriver>,
    executor_config: ExecutorConfig,
    scenarios: DashMap<String, ScenarioDefinition>,
    active: DashMap<String, ScenarioExecutor>,
    events: EventBus<ExecutorEvent>,
    /// Serializes "stop old, start new" so stale executors cannot mutate
    /// state once replacement begins
    launch_lock: AsyncMutex<()>,
    status_subscription: Mutex<Option<Subscription<ConnectorEvent>>>,
    destroyed: AtomicBool,
}

impl ScenarioManager {
    /// Create a manager for one connector
    pub fn new(connector_id: ConnectorId, driver: Arc<dyn ScenarioDriver>) -> Arc<Self> {
        Self::with_config(connector_id, driver, ExecutorConfig::default())
    }

    /// Create a manager with explicit executor settings
    pub fn with_config(
        connector_id: ConnectorId,
        driver: Arc<dyn ScenarioDriver>,
        executor_config: ExecutorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector_id,
            driver,
            executor_config,
            scenarios: DashMap::new(),
            active: DashMap::new(),
            events: EventBus::new(),
            launch_lock: AsyncMutex::new(()),
            status_subscription: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Create a manager wired to a connector: subscribes to its status
    /// changes and attaches itself as the connector-owned manager
    pub fn attach(connector: &Connector, driver: Arc<dyn ScenarioDriver>) -> Arc<Self> {
        let manager = Self::new(connector.connector_id(), driver);

        let weak = Arc::downgrade(&manager);
        let subscription = connector.events().subscribe(move |event| {
            if let ConnectorEvent::StatusChanged { from, to, .. } = event {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                let (from, to) = (*from, *to);
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move { manager.on_status_change(from, to).await });
                    }
                    Err(_) => warn!("status change observed outside a runtime, trigger skipped"),
                }
            }
        });

        *manager
            .status_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(subscription);
        connector.attach_scenario_manager(manager.clone());
        manager
    }

    /// Connector this manager is scoped to
    pub fn connector_id(&self) -> ConnectorId {
        self.connector_id
    }

    /// Executor observability bus shared by every run this manager starts
    pub fn events(&self) -> &EventBus<ExecutorEvent> {
        &self.events
    }

    /// Replace the scenario set
    pub fn load_scenarios(&self, definitions: Vec<ScenarioDefinition>) {
        self.scenarios.clear();
        let count = definitions.len();
        for definition in definitions {
            self.scenarios.insert(definition.id.clone(), definition);
        }
        info!(
            "loaded {} scenarios for connector {}",
            count, self.connector_id
        );
    }

    /// Load the scenario set from a repository
    pub async fn load_from_repository(
        &self,
        repository: &dyn ScenarioRepository,
    ) -> Result<usize, ScenarioError> {
        let definitions = repository.load().await?;
        let count = definitions.len();
        self.load_scenarios(definitions);
        Ok(count)
    }

    /// All known scenario definitions
    pub fn get_scenarios(&self) -> Vec<ScenarioDefinition> {
        self.scenarios.iter().map(|entry| entry.clone()).collect()
    }

    /// Look up one scenario definition
    pub fn get_scenario(&self, scenario_id: &str) -> Option<ScenarioDefinition> {
        self.scenarios.get(scenario_id).map(|entry| entry.clone())
    }

    /// Insert or replace a scenario definition
    pub fn set_scenario(&self, definition: ScenarioDefinition) {
        self.scenarios.insert(definition.id.clone(), definition);
    }

    /// Remove a scenario; a running instance is stopped first
    pub fn remove_scenario(&self, scenario_id: &str) -> Option<ScenarioDefinition> {
        if let Some((_, executor)) = self.active.remove(scenario_id) {
            executor.stop();
        }
        self.scenarios
            .remove(scenario_id)
            .map(|(_, definition)| definition)
    }

    /// Ids of scenarios whose executor is live
    pub fn get_active_scenario_ids(&self) -> Vec<String> {
        self.prune_finished();
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Whether a scenario currently has a live executor
    pub fn is_scenario_active(&self, scenario_id: &str) -> bool {
        self.active
            .get(scenario_id)
            .map(|entry| entry.is_active())
            .unwrap_or(false)
    }

    /// Execution context of the scenario's most recent run, if any
    pub fn get_scenario_execution_context(&self, scenario_id: &str) -> Option<ExecutionContext> {
        self.active.get(scenario_id).map(|entry| entry.context())
    }

    /// React to a connector status transition: a non-empty matching set
    /// replaces everything that was running before
    pub async fn on_status_change(&self, from: ChargePointStatus, to: ChargePointStatus) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        let matching: Vec<ScenarioDefinition> = self
            .scenarios
            .iter()
            .filter(|entry| entry.enabled && entry.trigger.matches(from, to))
            .map(|entry| entry.clone())
            .collect();

        if matching.is_empty() {
            return;
        }

        let _guard = self.launch_lock.lock().await;
        info!(
            "status change {} -> {} matches {} scenarios on connector {}, replacing running set",
            from,
            to,
            matching.len(),
            self.connector_id
        );
        self.stop_all_scenarios();
        for definition in matching {
            let mode = definition.mode;
            if let Err(err) = self.spawn_executor(definition, mode) {
                warn!("triggered scenario failed to start: {}", err);
            }
        }
    }

    /// Start a scenario with an explicit mode; additive, does not stop
    /// other running scenarios
    pub async fn execute_scenario(
        &self,
        scenario_id: &str,
        mode: ExecutionMode,
    ) -> Result<(), ScenarioError> {
        let definition = self
            .get_scenario(scenario_id)
            .ok_or_else(|| ScenarioError::not_found(scenario_id))?;

        let _guard = self.launch_lock.lock().await;
        self.spawn_executor(definition, mode)
    }

    /// Start a scenario manually using its own default mode
    pub async fn manual_execute(&self, scenario_id: &str) -> Result<(), ScenarioError> {
        let definition = self
            .get_scenario(scenario_id)
            .ok_or_else(|| ScenarioError::not_found(scenario_id))?;
        let mode = definition.mode;

        let _guard = self.launch_lock.lock().await;
        self.spawn_executor(definition, mode)
    }

    /// Pause a running scenario; no-op if it is not running
    pub fn pause_scenario(&self, scenario_id: &str) {
        if let Some(executor) = self.active.get(scenario_id) {
            executor.pause();
        }
    }

    /// Resume a paused scenario; no-op if it is not paused
    pub fn resume_scenario(&self, scenario_id: &str) {
        if let Some(executor) = self.active.get(scenario_id) {
            executor.resume();
        }
    }

    /// Step a scenario running in step mode; no-op otherwise
    pub fn step_scenario(&self, scenario_id: &str) {
        if let Some(executor) = self.active.get(scenario_id) {
            executor.step();
        }
    }

    /// Stop one scenario; no-op if it is not running
    pub fn stop_scenario(&self, scenario_id: &str) {
        if let Some((_, executor)) = self.active.remove(scenario_id) {
            executor.stop();
        }
    }

    /// Stop every running scenario and discard their contexts
    pub fn stop_all_scenarios(&self) {
        let ids: Vec<String> = self.active.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, executor)) = self.active.remove(&id) {
                executor.stop();
            }
        }
    }

    /// Tear the manager down: unsubscribe from the connector, stop all
    /// executions and clear state. Call exactly once at connector teardown.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            warn!(
                "scenario manager for connector {} destroyed twice",
                self.connector_id
            );
            return;
        }

        if let Some(subscription) = self
            .status_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            subscription.unsubscribe();
        }

        let _guard = self.launch_lock.lock().await;
        self.stop_all_scenarios();
        self.scenarios.clear();
        info!(
            "scenario manager for connector {} destroyed",
            self.connector_id
        );
    }

    fn spawn_executor(
        &self,
        definition: ScenarioDefinition,
        mode: ExecutionMode,
    ) -> Result<(), ScenarioError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ScenarioError::internal(format!(
                "manager destroyed, cannot start '{}'",
                definition.id
            )));
        }

        self.prune_finished();
        if self.is_scenario_active(&definition.id) {
            return Err(ScenarioError::already_running(&definition.id));
        }

        debug!(
            "starting scenario '{}' ({:?}) on connector {}",
            definition.name, mode, self.connector_id
        );
        let executor = ScenarioExecutor::with_events(
            definition.clone(),
            self.driver.clone(),
            self.events.clone(),
            self.executor_config.clone(),
        );
        executor.start(mode)?;
        self.active.insert(definition.id, executor);
        Ok(())
    }

    /// Drop executors whose run has finished so their ids free up
    fn prune_finished(&self) {
        self.active.retain(|_, executor| {
            !matches!(
                executor.state(),
                crate::executor::ExecutionState::Completed | crate::executor::ExecutionState::Error
            )
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Edge, NodeData, ScenarioNode, Trigger};
    use std::time::Duration;
    use tokio::time::sleep;

    fn long_scenario(id: &str, trigger: Trigger) -> ScenarioDefinition {
        let mut definition = ScenarioDefinition::new(id);
        definition.id = id.to_string();
        definition.trigger = trigger;
        definition.nodes = vec![
            ScenarioNode::new("start", NodeData::Start),
            ScenarioNode::new("d1", NodeData::Delay { seconds: 60.0 }),
            ScenarioNode::new("end", NodeData::End),
        ];
        definition.edges = vec![Edge::new("start", "d1"), Edge::new("d1", "end")];
        definition
    }

    fn noop_driver() -> Arc<dyn ScenarioDriver> {
        struct Noop;
        impl ScenarioDriver for Noop {}
        Arc::new(Noop)
    }

    fn test_manager() -> Arc<ScenarioManager> {
        ScenarioManager::new(ConnectorId::new(1).unwrap(), noop_driver())
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_matching_selects_and_starts() {
        let manager = test_manager();
        manager.set_scenario(long_scenario(
            "a",
            Trigger::StatusChange {
                from: Some(ChargePointStatus::Preparing),
                to: Some(ChargePointStatus::Charging),
            },
        ));
        manager.set_scenario(long_scenario(
            "b",
            Trigger::StatusChange {
                from: None,
                to: Some(ChargePointStatus::Charging),
            },
        ));

        manager
            .on_status_change(ChargePointStatus::Preparing, ChargePointStatus::Charging)
            .await;

        let mut active = manager.get_active_scenario_ids();
        active.sort();
        assert_eq!(active, vec!["a", "b"]);

        manager.stop_all_scenarios();

        // From Available only the from-less trigger fires.
        manager
            .on_status_change(ChargePointStatus::Available, ChargePointStatus::Charging)
            .await;
        assert!(!manager.is_scenario_active("a"));
        assert!(manager.is_scenario_active("b"));

        manager.stop_all_scenarios();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_and_disabled_scenarios_never_auto_fire() {
        let manager = test_manager();
        manager.set_scenario(long_scenario("manual", Trigger::Manual));

        let mut disabled = long_scenario(
            "disabled",
            Trigger::StatusChange {
                from: None,
                to: Some(ChargePointStatus::Charging),
            },
        );
        disabled.enabled = false;
        manager.set_scenario(disabled);

        manager
            .on_status_change(ChargePointStatus::Available, ChargePointStatus::Charging)
            .await;

        assert!(manager.get_active_scenario_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_replaces_running_manual_additive() {
        let manager = test_manager();
        manager.set_scenario(long_scenario("old", Trigger::Manual));
        manager.set_scenario(long_scenario(
            "new",
            Trigger::StatusChange {
                from: None,
                to: Some(ChargePointStatus::Faulted),
            },
        ));
        manager.set_scenario(long_scenario("extra", Trigger::Manual));

        manager.manual_execute("old").await.unwrap();
        assert!(manager.is_scenario_active("old"));

        // Manual invocation is additive.
        manager.manual_execute("extra").await.unwrap();
        assert!(manager.is_scenario_active("old"));
        assert!(manager.is_scenario_active("extra"));

        // A trigger replaces everything that was running, matching or not.
        manager
            .on_status_change(ChargePointStatus::Charging, ChargePointStatus::Faulted)
            .await;
        assert!(!manager.is_scenario_active("old"));
        assert!(!manager.is_scenario_active("extra"));
        assert!(manager.is_scenario_active("new"));

        manager.stop_all_scenarios();
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_rejected() {
        let manager = test_manager();
        manager.set_scenario(long_scenario("s", Trigger::Manual));

        manager.manual_execute("s").await.unwrap();
        let second = manager.manual_execute("s").await;
        assert!(matches!(second, Err(ScenarioError::AlreadyRunning(_))));

        manager.stop_all_scenarios();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_running_scenario_stops_it() {
        let manager = test_manager();
        manager.set_scenario(long_scenario("s", Trigger::Manual));
        manager.manual_execute("s").await.unwrap();

        let removed = manager.remove_scenario("s");
        assert!(removed.is_some());
        assert!(!manager.is_scenario_active("s"));
        assert!(manager.get_scenario("s").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxies_ignore_unknown_scenarios() {
        let manager = test_manager();

        // No-ops, not errors.
        manager.pause_scenario("ghost");
        manager.resume_scenario("ghost");
        manager.step_scenario("ghost");
        manager.stop_scenario("ghost");

        assert!(manager
            .manual_execute("ghost")
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_proxy() {
        let manager = test_manager();
        manager.set_scenario(long_scenario("s", Trigger::Manual));
        manager.manual_execute("s").await.unwrap();
        sleep(Duration::from_millis(20)).await;

        manager.pause_scenario("s");
        let context = manager.get_scenario_execution_context("s").unwrap();
        assert_eq!(context.state, crate::executor::ExecutionState::Paused);

        manager.resume_scenario("s");
        let context = manager.get_scenario_execution_context("s").unwrap();
        assert_eq!(context.state, crate::executor::ExecutionState::Running);

        manager.stop_all_scenarios();
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_stops_everything_once() {
        let manager = test_manager();
        manager.set_scenario(long_scenario("s", Trigger::Manual));
        manager.manual_execute("s").await.unwrap();

        manager.destroy().await;
        assert!(manager.get_active_scenario_ids().is_empty());
        assert!(manager.get_scenarios().is_empty());

        // Second destroy is a logged no-op; triggers are dead afterwards.
        manager.destroy().await;
        manager
            .on_status_change(ChargePointStatus::Available, ChargePointStatus::Charging)
            .await;
        assert!(manager.get_active_scenario_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_wires_connector_status_changes() {
        use crate::connector::{Connector, ConnectorConfig};
        use crate::meter::IncrementConfig;

        let connector = Connector::new(ConnectorConfig {
            connector_id: ConnectorId::new(1).unwrap(),
            initial_meter_wh: 0,
            increment_fallback: IncrementConfig::fallback(),
        });
        let manager = ScenarioManager::attach(&connector, noop_driver());
        manager.set_scenario(long_scenario(
            "auto",
            Trigger::StatusChange {
                from: None,
                to: Some(ChargePointStatus::Charging),
            },
        ));

        connector.set_status(ChargePointStatus::Charging).await;
        // The trigger task runs on the spawned handler.
        sleep(Duration::from_millis(50)).await;
        assert!(manager.is_scenario_active("auto"));

        // Teardown through the connector destroys the attached manager.
        connector.destroy().await;
        assert!(manager.get_active_scenario_ids().is_empty());
    }
}
