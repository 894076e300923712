//! # Scenario Executor
//!
//! This module interprets one scenario definition as a running process with
//! cooperative pause, single-step, timeout-aware waits and parallel fan-out
//! from the start node. Node handlers delegate to an injected
//! [`ScenarioDriver`]; within one branch a handler fully completes before
//! the next node is chosen, while sibling branches interleave freely and
//! join before the flow is considered complete.
//!
//! Control operations communicate with the flow task through a watch
//! channel and a step permit, so `pause`, `resume`, `step` and `stop` are
//! observable at every suspension point without busy polling.

use crate::config::ExecutorConfig;
use crate::error::ScenarioError;
use crate::events::{EventBus, ExecutorEvent};
use crate::meter::IncrementConfig;
use crate::scenario::{
    ExecutionMode, NodeData, NodeId, PlugAction, ScenarioDefinition, ScenarioNode,
    TransactionAction,
};
use async_trait::async_trait;
use chargesim_types::{ChargePointStatus, ReservationId};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Discrete executor states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Initial and terminal-reset state
    Idle,
    /// Flow is executing nodes
    Running,
    /// Flow is held at the next suspension point
    Paused,
    /// Flow waits for an explicit `step()` before each node
    Stepping,
    /// Every branch terminated normally
    Completed,
    /// The flow aborted; see the context's error message
    Error,
}

/// Events driving the executor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlEvent {
    Start(ExecutionMode),
    Pause,
    Resume,
    Stop,
    Complete,
    Fail,
}

/// Explicit transition table. `None` means the event is invalid in that
/// state and is silently ignored (benign UI races, not programmer errors).
fn transition(state: ExecutionState, event: ControlEvent) -> Option<ExecutionState> {
    use ControlEvent::*;
    use ExecutionState::*;
    match (state, event) {
        (Idle, Start(ExecutionMode::Normal)) => Some(Running),
        (Idle, Start(ExecutionMode::Step)) => Some(Stepping),
        (Idle, _) => None,
        (Running, Pause) => Some(Paused),
        (Paused, Resume) => Some(Running),
        (Running | Paused | Stepping, Complete) => Some(Completed),
        (Running | Paused | Stepping, Fail) => Some(Error),
        (_, Stop) => Some(Idle),
        _ => None,
    }
}

/// Snapshot of one executor run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    /// Scenario being executed
    pub scenario_id: String,
    /// Current discrete state
    pub state: ExecutionState,
    /// Mode of the current (or last) run
    pub mode: ExecutionMode,
    /// Node currently being executed
    pub current_node_id: Option<NodeId>,
    /// Node ids in traversal order, each recorded once
    pub executed_nodes: Vec<NodeId>,
    /// Number of node revisits (author-intended cycles)
    pub loop_count: u32,
    /// Failure message when the state is `Error`
    pub error: Option<String>,
}

/// Parameters handed to the reservation callback
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequest {
    pub reservation_id: ReservationId,
    pub expiry: DateTime<Utc>,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
}

/// Protocol-side callback contract invoked by scenario nodes.
///
/// Every method defaults to a no-op so embedders implement only what they
/// need; an absent callback is never an error. Wait methods may block
/// indefinitely; their timeout parameter is advisory and enforcing it is
/// the collaborator's responsibility.
#[async_trait]
pub trait ScenarioDriver: Send + Sync {
    /// Drive the connector to a target status
    async fn change_status(&self, _target: ChargePointStatus) -> anyhow::Result<()> {
        Ok(())
    }

    /// Start a transaction; confirmation arrives asynchronously
    async fn start_transaction(
        &self,
        _id_tag: Option<&str>,
        _battery_capacity_wh: Option<f64>,
        _initial_soc_percent: Option<f64>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stop the active transaction
    async fn stop_transaction(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Write the meter register
    async fn set_meter_value(&self, _value_wh: i64) -> anyhow::Result<()> {
        Ok(())
    }

    /// Forward a meter reading to the protocol layer
    async fn send_meter_value(&self, _value_wh: i64) -> anyhow::Result<()> {
        Ok(())
    }

    /// Start auto metering against the connector's own scheduler;
    /// fire-and-forget, must not block the flow
    async fn start_auto_meter(&self, _config: &IncrementConfig) -> anyhow::Result<()> {
        Ok(())
    }

    /// Send an arbitrary named message with a JSON payload
    async fn send_message(
        &self,
        _message_type: &str,
        _payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Simulate a cable plug action
    async fn plug(&self, _action: PlugAction) -> anyhow::Result<()> {
        Ok(())
    }

    /// Block until a remote start command arrives; returns its id tag
    async fn wait_for_remote_start(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    /// Block until the connector reaches the target status
    async fn wait_for_status(
        &self,
        _target: ChargePointStatus,
        _timeout: Option<Duration>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Block until a reservation request arrives
    async fn wait_for_reservation(
        &self,
        _timeout: Option<Duration>,
    ) -> anyhow::Result<Option<ReservationId>> {
        Ok(None)
    }

    /// Create a reservation
    async fn reserve_now(&self, _request: &ReservationRequest) -> anyhow::Result<()> {
        Ok(())
    }

    /// Cancel a reservation by id
    async fn cancel_reservation(&self, _reservation_id: ReservationId) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Control signal delivered to every live branch of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunSignal {
    Run,
    Pause,
    Stop,
}

/// Identity of one run; stale tasks from a stopped run fail the epoch
/// check and go silent
#[derive(Clone)]
struct RunToken {
    epoch: u64,
    control: watch::Receiver<RunSignal>,
}

/// Outcome of a whole flow
enum FlowOutcome {
    Completed,
    Stopped,
}

/// Outcome of one branch
enum BranchOutcome {
    Finished,
    Stopped,
}

/// Why a node dispatch did not complete normally
enum Interrupt {
    Stopped,
    Failed(ScenarioError),
}

impl Interrupt {
    fn handler(node_id: &str, error: anyhow::Error) -> Self {
        Interrupt::Failed(ScenarioError::handler(node_id, error.to_string()))
    }
}

/// Gate result at a suspension point
enum Gate {
    Continue,
    Stopped,
}

/// Scenario flow interpreter; cheap to clone, one instance per run
#[derive(Clone)]
pub struct ScenarioExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    scenario: ScenarioDefinition,
    driver: Arc<dyn ScenarioDriver>,
    events: EventBus<ExecutorEvent>,
    config: ExecutorConfig,
    context: Mutex<ExecutionContext>,
    control_tx: Mutex<Option<watch::Sender<RunSignal>>>,
    step_notify: Notify,
    pending_steps: AtomicUsize,
    epoch: AtomicU64,
}

impl ScenarioExecutor {
    /// Create an executor with its own event bus and default configuration
    pub fn new(scenario: ScenarioDefinition, driver: Arc<dyn ScenarioDriver>) -> Self {
        Self::with_events(scenario, driver, EventBus::new(), ExecutorConfig::default())
    }

    /// Create an executor publishing on a shared event bus
    pub fn with_events(
        scenario: ScenarioDefinition,
        driver: Arc<dyn ScenarioDriver>,
        events: EventBus<ExecutorEvent>,
        config: ExecutorConfig,
    ) -> Self {
        let context = ExecutionContext {
            scenario_id: scenario.id.clone(),
            state: ExecutionState::Idle,
            mode: scenario.mode,
            current_node_id: None,
            executed_nodes: Vec::new(),
            loop_count: 0,
            error: None,
        };
        Self {
            inner: Arc::new(ExecutorInner {
                scenario,
                driver,
                events,
                config,
                context: Mutex::new(context),
                control_tx: Mutex::new(None),
                step_notify: Notify::new(),
                pending_steps: AtomicUsize::new(0),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Scenario id this executor runs
    pub fn scenario_id(&self) -> String {
        self.inner.scenario.id.clone()
    }

    /// Observability bus for this executor
    pub fn events(&self) -> &EventBus<ExecutorEvent> {
        &self.inner.events
    }

    /// Snapshot of the execution context
    pub fn context(&self) -> ExecutionContext {
        self.inner.lock_context().clone()
    }

    /// Current discrete state
    pub fn state(&self) -> ExecutionState {
        self.inner.lock_context().state
    }

    /// Whether the flow is live (running, paused or stepping)
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            ExecutionState::Running | ExecutionState::Paused | ExecutionState::Stepping
        )
    }

    /// Begin executing the flow on a background task. Rejects re-entry:
    /// only an idle executor can start. Must be called within a tokio
    /// runtime.
    pub fn start(&self, mode: ExecutionMode) -> Result<(), ScenarioError> {
        let token = {
            let mut context = self.inner.lock_context();
            let Some(next) = transition(context.state, ControlEvent::Start(mode)) else {
                return Err(ScenarioError::already_running(&context.scenario_id));
            };
            context.state = next;
            context.mode = mode;
            context.current_node_id = None;
            context.executed_nodes.clear();
            context.loop_count = 0;
            context.error = None;

            let (control_tx, control_rx) = watch::channel(RunSignal::Run);
            *self
                .inner
                .control_tx
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(control_tx);
            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            RunToken {
                epoch,
                control: control_rx,
            }
        };

        info!(
            "scenario '{}' starting in {:?} mode",
            self.inner.scenario.name, mode
        );
        self.inner.emit_state_changed();

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run_flow(token).await });
        Ok(())
    }

    /// Hold the flow at the next suspension point; valid only while running
    pub fn pause(&self) {
        if self.inner.apply_control(ControlEvent::Pause, RunSignal::Pause) {
            info!("scenario '{}' paused", self.inner.scenario.name);
            self.inner.emit_state_changed();
        } else {
            debug!("pause ignored: executor not running");
        }
    }

    /// Resume a paused flow
    pub fn resume(&self) {
        if self.inner.apply_control(ControlEvent::Resume, RunSignal::Run) {
            info!("scenario '{}' resumed", self.inner.scenario.name);
            self.inner.emit_state_changed();
        } else {
            debug!("resume ignored: executor not paused");
        }
    }

    /// Stop the flow from any non-idle state; unblocks in-progress delays
    /// and waits, clears the current node and returns the executor to idle
    pub fn stop(&self) {
        let stopped = {
            let mut context = self.inner.lock_context();
            match transition(context.state, ControlEvent::Stop) {
                Some(next) => {
                    context.state = next;
                    context.current_node_id = None;
                    // Invalidate the running flow task before releasing it.
                    self.inner.epoch.fetch_add(1, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        };

        if stopped {
            if let Some(control_tx) = self
                .inner
                .control_tx
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                let _ = control_tx.send(RunSignal::Stop);
            }
            info!("scenario '{}' stopped", self.inner.scenario.name);
            self.inner.emit_state_changed();
        } else {
            debug!("stop ignored: executor already idle");
        }
    }

    /// Resolve exactly one pending step-mode continuation; ignored unless
    /// the executor is stepping with a node suspended
    pub fn step(&self) {
        let stepping = self.inner.lock_context().state == ExecutionState::Stepping;
        if stepping && self.inner.pending_steps.load(Ordering::SeqCst) > 0 {
            self.inner.step_notify.notify_one();
        } else {
            debug!("step ignored: no pending continuation");
        }
    }
}

impl ExecutorInner {
    fn lock_context(&self) -> MutexGuard<'_, ExecutionContext> {
        self.context.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, token: &RunToken) -> bool {
        self.epoch.load(Ordering::SeqCst) == token.epoch
    }

    /// Apply a control event and, on success, signal the live run
    fn apply_control(&self, event: ControlEvent, signal: RunSignal) -> bool {
        let applied = {
            let mut context = self.lock_context();
            match transition(context.state, event) {
                Some(next) => {
                    context.state = next;
                    true
                }
                None => false,
            }
        };
        if applied {
            if let Some(control_tx) = self
                .control_tx
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
            {
                let _ = control_tx.send(signal);
            }
        }
        applied
    }

    fn emit_state_changed(&self) {
        let context = self.lock_context().clone();
        self.events.emit(&ExecutorEvent::StateChanged {
            scenario_id: context.scenario_id.clone(),
            context,
        });
    }

    fn emit_flow_event(&self, token: &RunToken, event: ExecutorEvent) {
        if self.is_current(token) {
            self.events.emit(&event);
        }
    }

    fn emit_progress(&self, token: &RunToken, node_id: &str, remaining: Duration, total: Duration) {
        self.emit_flow_event(
            token,
            ExecutorEvent::NodeProgress {
                scenario_id: self.scenario.id.clone(),
                node_id: node_id.to_string(),
                remaining_seconds: remaining.as_secs_f64(),
                total_seconds: total.as_secs_f64(),
            },
        );
    }

    /// Mark a node current; re-convergent visits bump the loop counter
    /// instead of duplicating the executed list
    fn record_executed(&self, token: &RunToken, node_id: &str) {
        if !self.is_current(token) {
            return;
        }
        let mut context = self.lock_context();
        context.current_node_id = Some(node_id.to_string());
        if context.executed_nodes.iter().any(|id| id == node_id) {
            context.loop_count += 1;
        } else {
            context.executed_nodes.push(node_id.to_string());
        }
    }

    async fn run_flow(self: Arc<Self>, token: RunToken) {
        let outcome = self.clone().drive(token.clone()).await;
        match outcome {
            Ok(FlowOutcome::Completed) => {
                let completed = {
                    let mut context = self.lock_context();
                    if self.is_current(&token) {
                        if let Some(next) = transition(context.state, ControlEvent::Complete) {
                            context.state = next;
                            context.current_node_id = None;
                            true
                        } else {
                            false
                        }
                    } else {
                        false
                    }
                };
                if completed {
                    info!("scenario '{}' completed", self.scenario.name);
                    self.emit_state_changed();
                }
            }
            Ok(FlowOutcome::Stopped) => {
                // stop() already transitioned and notified observers.
                debug!("scenario '{}' flow halted by stop", self.scenario.name);
            }
            Err(err) => {
                let message = err.to_string();
                let failed = {
                    let mut context = self.lock_context();
                    if self.is_current(&token) {
                        if let Some(next) = transition(context.state, ControlEvent::Fail) {
                            context.state = next;
                            context.error = Some(message.clone());
                            true
                        } else {
                            false
                        }
                    } else {
                        false
                    }
                };
                if failed {
                    error!("scenario '{}' failed: {}", self.scenario.name, message);
                    self.events.emit(&ExecutorEvent::FlowError {
                        scenario_id: self.scenario.id.clone(),
                        message,
                    });
                    self.emit_state_changed();
                }
            }
        }
    }

    async fn drive(self: Arc<Self>, token: RunToken) -> Result<FlowOutcome, ScenarioError> {
        self.scenario.validate()?;
        let start = self.scenario.start_node()?;
        let start_id = start.id.clone();

        // The start node records and notifies but drives no callback.
        self.record_executed(&token, &start_id);
        self.emit_flow_event(
            &token,
            ExecutorEvent::NodeExecuted {
                scenario_id: self.scenario.id.clone(),
                node_id: start_id.clone(),
            },
        );
        self.emit_flow_event(
            &token,
            ExecutorEvent::NodeCompleted {
                scenario_id: self.scenario.id.clone(),
                node_id: start_id.clone(),
            },
        );

        // Each distinct target of a start edge roots one branch.
        let mut roots: Vec<NodeId> = Vec::new();
        for edge in self.scenario.outgoing(&start_id) {
            if !roots.contains(&edge.target) {
                roots.push(edge.target.clone());
            }
        }

        if roots.is_empty() {
            warn!(
                "scenario '{}' has no edges out of the start node, nothing to do",
                self.scenario.name
            );
            return Ok(FlowOutcome::Completed);
        }

        if roots.len() == 1 {
            let root = roots.remove(0);
            return match self.clone().run_branch(token, root).await {
                Ok(BranchOutcome::Finished) => Ok(FlowOutcome::Completed),
                Ok(BranchOutcome::Stopped) => Ok(FlowOutcome::Stopped),
                Err(err) => Err(err),
            };
        }

        // Parallel fan-out: every branch must terminate before the flow is
        // complete. A failing branch records the first error while its
        // siblings drain to their own end (join barrier, not a race).
        debug!(
            "scenario '{}' fans out into {} branches",
            self.scenario.name,
            roots.len()
        );
        let handles: Vec<_> = roots
            .into_iter()
            .map(|root| {
                let branch = self.clone();
                let branch_token = token.clone();
                tokio::spawn(branch.run_branch(branch_token, root))
            })
            .collect();

        let mut stopped = false;
        let mut first_error: Option<ScenarioError> = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(BranchOutcome::Finished)) => {}
                Ok(Ok(BranchOutcome::Stopped)) => stopped = true,
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error =
                            Some(ScenarioError::internal(format!("branch task died: {}", join_error)));
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if stopped {
            return Ok(FlowOutcome::Stopped);
        }
        Ok(FlowOutcome::Completed)
    }

    /// Walk one linear chain with an explicit cursor. Iterative on purpose:
    /// author-intended cycles must not grow the stack.
    async fn run_branch(
        self: Arc<Self>,
        token: RunToken,
        root: NodeId,
    ) -> Result<BranchOutcome, ScenarioError> {
        let step_mode = self.lock_context().mode == ExecutionMode::Step;
        let mut current = root;

        loop {
            let Some(node) = self.scenario.node(&current) else {
                warn!(
                    "scenario '{}': node '{}' no longer exists, branch ends",
                    self.scenario.name, current
                );
                return Ok(BranchOutcome::Finished);
            };

            self.record_executed(&token, &node.id);
            self.emit_flow_event(
                &token,
                ExecutorEvent::NodeExecuted {
                    scenario_id: self.scenario.id.clone(),
                    node_id: node.id.clone(),
                },
            );

            if let Gate::Stopped = self.wait_while_paused(&token).await {
                return Ok(BranchOutcome::Stopped);
            }

            if step_mode {
                if let Gate::Stopped = self.wait_for_step(&token).await {
                    return Ok(BranchOutcome::Stopped);
                }
            }

            match self.dispatch(&token, node).await {
                Ok(()) => {}
                Err(Interrupt::Stopped) => return Ok(BranchOutcome::Stopped),
                Err(Interrupt::Failed(err)) => return Err(err),
            }

            self.emit_flow_event(
                &token,
                ExecutorEvent::NodeCompleted {
                    scenario_id: self.scenario.id.clone(),
                    node_id: node.id.clone(),
                },
            );

            if matches!(node.data, NodeData::End) {
                return Ok(BranchOutcome::Finished);
            }

            // First outgoing edge whose target still exists; edges to
            // deleted nodes are skipped, not fatal.
            let mut next = None;
            for edge in self.scenario.outgoing(&node.id) {
                if self.scenario.has_node(&edge.target) {
                    next = Some(edge.target.clone());
                    break;
                }
                warn!(
                    "scenario '{}': edge from '{}' points at removed node '{}', skipping",
                    self.scenario.name, node.id, edge.target
                );
            }

            match next {
                Some(target) => current = target,
                None => {
                    debug!(
                        "scenario '{}': branch ended at '{}' (no outgoing edge)",
                        self.scenario.name, node.id
                    );
                    return Ok(BranchOutcome::Finished);
                }
            }
        }
    }

    /// Cooperative pause gate backed by the run's watch channel
    async fn wait_while_paused(&self, token: &RunToken) -> Gate {
        let mut control = token.control.clone();
        loop {
            match *control.borrow_and_update() {
                RunSignal::Stop => return Gate::Stopped,
                RunSignal::Run => return Gate::Continue,
                RunSignal::Pause => {}
            }
            if control.changed().await.is_err() {
                return Gate::Stopped;
            }
        }
    }

    /// Suspend until `step()` grants exactly one continuation
    async fn wait_for_step(&self, token: &RunToken) -> Gate {
        let mut control = token.control.clone();
        if *control.borrow_and_update() == RunSignal::Stop {
            return Gate::Stopped;
        }

        self.pending_steps.fetch_add(1, Ordering::SeqCst);
        let gate = loop {
            tokio::select! {
                _ = self.step_notify.notified() => break Gate::Continue,
                changed = control.changed() => {
                    if changed.is_err() || *control.borrow() == RunSignal::Stop {
                        break Gate::Stopped;
                    }
                }
            }
        };
        self.pending_steps.fetch_sub(1, Ordering::SeqCst);
        gate
    }

    async fn dispatch(&self, token: &RunToken, node: &ScenarioNode) -> Result<(), Interrupt> {
        debug!(
            "scenario '{}': executing node '{}' ({})",
            self.scenario.name,
            node.id,
            node.data.kind()
        );

        match &node.data {
            NodeData::Start | NodeData::End => Ok(()),

            NodeData::StatusChange { target_status } => self
                .driver
                .change_status(*target_status)
                .await
                .map_err(|e| Interrupt::handler(&node.id, e)),

            NodeData::Transaction {
                action: TransactionAction::Start,
                id_tag,
                battery_capacity_wh,
                initial_soc_percent,
            } => self
                .driver
                .start_transaction(id_tag.as_deref(), *battery_capacity_wh, *initial_soc_percent)
                .await
                .map_err(|e| Interrupt::handler(&node.id, e)),

            NodeData::Transaction {
                action: TransactionAction::Stop,
                ..
            } => self
                .driver
                .stop_transaction()
                .await
                .map_err(|e| Interrupt::handler(&node.id, e)),

            NodeData::MeterValue {
                value_wh,
                send_message,
                auto_increment,
            } => {
                self.driver
                    .set_meter_value(*value_wh)
                    .await
                    .map_err(|e| Interrupt::handler(&node.id, e))?;
                if *send_message {
                    self.driver
                        .send_meter_value(*value_wh)
                        .await
                        .map_err(|e| Interrupt::handler(&node.id, e))?;
                }
                if let Some(config) = auto_increment {
                    self.driver
                        .start_auto_meter(config)
                        .await
                        .map_err(|e| Interrupt::handler(&node.id, e))?;
                }
                Ok(())
            }

            NodeData::Delay { seconds } => self.run_delay(token, &node.id, *seconds).await,

            NodeData::Notification {
                message_type,
                payload,
            } => self
                .driver
                .send_message(message_type, payload)
                .await
                .map_err(|e| Interrupt::handler(&node.id, e)),

            NodeData::ConnectorPlug { action } => self
                .driver
                .plug(*action)
                .await
                .map_err(|e| Interrupt::handler(&node.id, e)),

            NodeData::RemoteStartTrigger { timeout_seconds } => {
                let tag = self
                    .run_wait(
                        token,
                        &node.id,
                        *timeout_seconds,
                        self.driver.wait_for_remote_start(),
                    )
                    .await?;
                if let Some(tag) = tag {
                    debug!("remote start arrived with tag '{}'", tag);
                }
                Ok(())
            }

            NodeData::StatusTrigger {
                target_status,
                timeout_seconds,
            } => {
                let timeout = advisory_timeout(*timeout_seconds);
                self.run_wait(
                    token,
                    &node.id,
                    *timeout_seconds,
                    self.driver.wait_for_status(*target_status, timeout),
                )
                .await
            }

            NodeData::ReservationTrigger { timeout_seconds } => {
                let timeout = advisory_timeout(*timeout_seconds);
                let reservation = self
                    .run_wait(
                        token,
                        &node.id,
                        *timeout_seconds,
                        self.driver.wait_for_reservation(timeout),
                    )
                    .await?;
                if let Some(reservation_id) = reservation {
                    debug!("reservation {} arrived", reservation_id);
                }
                Ok(())
            }

            NodeData::ReserveNow {
                expiry_seconds,
                id_tag,
                parent_id_tag,
                reservation_id,
            } => {
                let reservation_id = reservation_id.unwrap_or_else(|| {
                    ReservationId::new(rand::thread_rng().gen_range(1..=i32::MAX))
                });
                let request = ReservationRequest {
                    reservation_id,
                    expiry: Utc::now() + chrono::Duration::seconds(*expiry_seconds as i64),
                    id_tag: id_tag.clone(),
                    parent_id_tag: parent_id_tag.clone(),
                };
                self.driver
                    .reserve_now(&request)
                    .await
                    .map_err(|e| Interrupt::handler(&node.id, e))
            }

            NodeData::CancelReservation { reservation_id } => self
                .driver
                .cancel_reservation(*reservation_id)
                .await
                .map_err(|e| Interrupt::handler(&node.id, e)),
        }
    }

    /// Sleep for a delay node, emitting countdown progress at the
    /// configured sub-second cadence; stop unblocks within one tick
    async fn run_delay(
        &self,
        token: &RunToken,
        node_id: &str,
        seconds: f64,
    ) -> Result<(), Interrupt> {
        let total = Duration::from_secs_f64(seconds.max(0.0));
        let tick = Duration::from_millis(self.config.progress_tick_ms.max(50));
        let started = Instant::now();
        let mut control = token.control.clone();
        if *control.borrow_and_update() == RunSignal::Stop {
            return Err(Interrupt::Stopped);
        }

        loop {
            let elapsed = started.elapsed();
            if elapsed >= total {
                self.emit_progress(token, node_id, Duration::ZERO, total);
                return Ok(());
            }
            let remaining = total - elapsed;
            self.emit_progress(token, node_id, remaining, total);

            tokio::select! {
                _ = sleep(remaining.min(tick)) => {}
                changed = control.changed() => {
                    if changed.is_err() || *control.borrow() == RunSignal::Stop {
                        return Err(Interrupt::Stopped);
                    }
                    // Pausing does not freeze an in-flight delay; the pause
                    // gate holds before the next node instead.
                }
            }
        }
    }

    /// Await an injected wait callback. With a positive timeout the
    /// executor reports countdown progress in parallel and clears it when
    /// the wait resolves or the countdown elapses; the wait itself is never
    /// aborted here.
    async fn run_wait<T, F>(
        &self,
        token: &RunToken,
        node_id: &str,
        timeout_seconds: u64,
        wait: F,
    ) -> Result<T, Interrupt>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        tokio::pin!(wait);
        let mut control = token.control.clone();
        if *control.borrow_and_update() == RunSignal::Stop {
            return Err(Interrupt::Stopped);
        }

        let total = Duration::from_secs(timeout_seconds);
        let started = Instant::now();
        let mut reporting = timeout_seconds > 0;
        let mut ticker = interval(Duration::from_millis(self.config.progress_tick_ms.max(50)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut wait => {
                    if reporting {
                        self.emit_progress(token, node_id, Duration::ZERO, total);
                    }
                    return result.map_err(|e| Interrupt::handler(node_id, e));
                }
                _ = ticker.tick(), if reporting => {
                    let elapsed = started.elapsed();
                    if elapsed >= total {
                        // Countdown exhausted: clear progress, keep waiting.
                        reporting = false;
                        self.emit_progress(token, node_id, Duration::ZERO, total);
                    } else {
                        self.emit_progress(token, node_id, total - elapsed, total);
                    }
                }
                changed = control.changed() => {
                    if changed.is_err() || *control.borrow() == RunSignal::Stop {
                        return Err(Interrupt::Stopped);
                    }
                }
            }
        }
    }
}

fn advisory_timeout(timeout_seconds: u64) -> Option<Duration> {
    if timeout_seconds > 0 {
        Some(Duration::from_secs(timeout_seconds))
    } else {
        None
    }
}
