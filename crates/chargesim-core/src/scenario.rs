//! # Scenario Data Model
//!
//! This module provides the declarative scenario graph the executor
//! interprets: a flat node array plus an edge array of id pairs, a trigger,
//! an execution mode and bookkeeping metadata. Scenario files are
//! self-describing JSON documents; import validates the structural fields
//! before accepting a document and export round-trips byte-identically.

use crate::error::ScenarioError;
use crate::meter::IncrementConfig;
use chargesim_types::{ChargePointStatus, ConnectorId, ReservationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Node identifier within one scenario graph
pub type NodeId = String;

/// Execution mode for a scenario run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Nodes run back to back
    #[default]
    Normal,
    /// Each node waits for an explicit `step()` call
    Step,
}

/// Condition that auto-starts a scenario
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Started only by explicit invocation
    #[default]
    Manual,
    /// Started when the connector status transitions; absent conditions
    /// match any status
    StatusChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ChargePointStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ChargePointStatus>,
    },
}

impl Trigger {
    /// Whether a status transition fires this trigger
    pub fn matches(&self, from: ChargePointStatus, to: ChargePointStatus) -> bool {
        match self {
            Trigger::Manual => false,
            Trigger::StatusChange {
                from: want_from,
                to: want_to,
            } => {
                want_from.map(|want| want == from).unwrap_or(true)
                    && want_to.map(|want| want == to).unwrap_or(true)
            }
        }
    }
}

/// Scenario scope: the whole charge point or a single connector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ScenarioTarget {
    #[default]
    ChargePoint,
    Connector { connector_id: ConnectorId },
}

/// Transaction node action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionAction {
    Start,
    Stop,
}

/// Connector plug node action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlugAction {
    #[serde(rename = "plugin")]
    PlugIn,
    #[serde(rename = "plugout")]
    PlugOut,
}

/// Node payload; a closed, protocol-specific set of step types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeData {
    /// Entry point; exactly one per scenario
    Start,
    /// Terminal point; at most one per scenario
    End,
    /// Drive the connector to a target status
    StatusChange { target_status: ChargePointStatus },
    /// Start or stop a transaction
    Transaction {
        action: TransactionAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id_tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        battery_capacity_wh: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_soc_percent: Option<f64>,
    },
    /// Write the meter register, optionally send it and/or start auto
    /// metering against the connector's own scheduler
    MeterValue {
        value_wh: i64,
        #[serde(default)]
        send_message: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_increment: Option<IncrementConfig>,
    },
    /// Sleep with countdown progress reporting
    Delay { seconds: f64 },
    /// Send an arbitrary named message with a JSON payload
    Notification {
        message_type: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Simulate cable plug in / plug out
    ConnectorPlug { action: PlugAction },
    /// Block until a remote start command arrives
    RemoteStartTrigger {
        #[serde(default)]
        timeout_seconds: u64,
    },
    /// Block until the connector reaches a status
    StatusTrigger {
        target_status: ChargePointStatus,
        #[serde(default)]
        timeout_seconds: u64,
    },
    /// Block until a reservation request arrives
    ReservationTrigger {
        #[serde(default)]
        timeout_seconds: u64,
    },
    /// Create a reservation; an id is generated when none is supplied
    ReserveNow {
        expiry_seconds: u64,
        id_tag: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id_tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reservation_id: Option<ReservationId>,
    },
    /// Cancel a reservation by id
    CancelReservation { reservation_id: ReservationId },
}

impl NodeData {
    /// Short type tag for logging
    pub fn kind(&self) -> &'static str {
        match self {
            NodeData::Start => "start",
            NodeData::End => "end",
            NodeData::StatusChange { .. } => "status_change",
            NodeData::Transaction { .. } => "transaction",
            NodeData::MeterValue { .. } => "meter_value",
            NodeData::Delay { .. } => "delay",
            NodeData::Notification { .. } => "notification",
            NodeData::ConnectorPlug { .. } => "connector_plug",
            NodeData::RemoteStartTrigger { .. } => "remote_start_trigger",
            NodeData::StatusTrigger { .. } => "status_trigger",
            NodeData::ReservationTrigger { .. } => "reservation_trigger",
            NodeData::ReserveNow { .. } => "reserve_now",
            NodeData::CancelReservation { .. } => "cancel_reservation",
        }
    }
}

/// One step of a scenario graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioNode {
    pub id: NodeId,
    #[serde(flatten)]
    pub data: NodeData,
}

impl ScenarioNode {
    pub fn new(id: impl Into<String>, data: NodeData) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A complete scenario definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub target: ScenarioTarget,
    pub nodes: Vec<ScenarioNode>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ScenarioDefinition {
    /// Create an empty, enabled, manually-triggered scenario
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            target: ScenarioTarget::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
            trigger: Trigger::default(),
            mode: ExecutionMode::default(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&ScenarioNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Whether a node id exists in the graph
    pub fn has_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Edges leaving a node, in authoring order
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |edge| edge.source == id)
    }

    /// The unique start node
    pub fn start_node(&self) -> Result<&ScenarioNode, ScenarioError> {
        let mut starts = self
            .nodes
            .iter()
            .filter(|node| matches!(node.data, NodeData::Start));
        let first = starts
            .next()
            .ok_or_else(|| ScenarioError::graph("scenario has no start node"))?;
        if starts.next().is_some() {
            return Err(ScenarioError::graph("scenario has more than one start node"));
        }
        Ok(first)
    }

    /// Pre-flight structure check: exactly one start, at most one end.
    /// Unreachable nodes are legal and simply never execute.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        self.start_node()?;
        let ends = self
            .nodes
            .iter()
            .filter(|node| matches!(node.data, NodeData::End))
            .count();
        if ends > 1 {
            return Err(ScenarioError::graph("scenario has more than one end node"));
        }
        Ok(())
    }

    /// Import a scenario document; the id, nodes and edges fields must be
    /// present for the document to be accepted
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        for field in ["id", "nodes", "edges"] {
            if value.get(field).is_none() {
                return Err(ScenarioError::import(format!(
                    "missing required field '{}'",
                    field
                )));
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Export the scenario as a self-describing JSON document
    pub fn to_json(&self) -> Result<String, ScenarioError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_scenario() -> ScenarioDefinition {
        let mut scenario = ScenarioDefinition::new("linear");
        scenario.nodes = vec![
            ScenarioNode::new("start", NodeData::Start),
            ScenarioNode::new(
                "status",
                NodeData::StatusChange {
                    target_status: ChargePointStatus::Charging,
                },
            ),
            ScenarioNode::new("end", NodeData::End),
        ];
        scenario.edges = vec![Edge::new("start", "status"), Edge::new("status", "end")];
        scenario
    }

    #[test]
    fn test_trigger_matching() {
        let both = Trigger::StatusChange {
            from: Some(ChargePointStatus::Preparing),
            to: Some(ChargePointStatus::Charging),
        };
        assert!(both.matches(ChargePointStatus::Preparing, ChargePointStatus::Charging));
        assert!(!both.matches(ChargePointStatus::Available, ChargePointStatus::Charging));

        let to_only = Trigger::StatusChange {
            from: None,
            to: Some(ChargePointStatus::Charging),
        };
        assert!(to_only.matches(ChargePointStatus::Available, ChargePointStatus::Charging));
        assert!(!to_only.matches(ChargePointStatus::Charging, ChargePointStatus::Finishing));

        assert!(!Trigger::Manual.matches(ChargePointStatus::Available, ChargePointStatus::Charging));
    }

    #[test]
    fn test_graph_lookups() {
        let scenario = linear_scenario();

        assert!(scenario.has_node("status"));
        assert!(!scenario.has_node("missing"));
        assert_eq!(scenario.start_node().unwrap().id, "start");

        let outgoing: Vec<_> = scenario.outgoing("start").collect();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].target, "status");
    }

    #[test]
    fn test_validate_start_end_counts() {
        let mut scenario = linear_scenario();
        assert!(scenario.validate().is_ok());

        scenario.nodes.push(ScenarioNode::new("end2", NodeData::End));
        assert!(matches!(
            scenario.validate(),
            Err(ScenarioError::Graph(_))
        ));

        let mut no_start = linear_scenario();
        no_start.nodes.remove(0);
        assert!(matches!(no_start.validate(), Err(ScenarioError::Graph(_))));

        let mut two_starts = linear_scenario();
        two_starts
            .nodes
            .push(ScenarioNode::new("start2", NodeData::Start));
        assert!(matches!(two_starts.validate(), Err(ScenarioError::Graph(_))));
    }

    #[test]
    fn test_node_data_wire_format() {
        let node = ScenarioNode::new(
            "n1",
            NodeData::StatusChange {
                target_status: ChargePointStatus::SuspendedEV,
            },
        );
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], "n1");
        assert_eq!(json["type"], "status_change");
        assert_eq!(json["target_status"], "SuspendedEV");

        let plug = serde_json::to_value(ScenarioNode::new(
            "n2",
            NodeData::ConnectorPlug {
                action: PlugAction::PlugOut,
            },
        ))
        .unwrap();
        assert_eq!(plug["action"], "plugout");
    }

    #[test]
    fn test_import_rejects_missing_fields() {
        let result = ScenarioDefinition::from_json(r#"{"name": "incomplete"}"#);
        assert!(matches!(result, Err(ScenarioError::Import(_))));

        let result = ScenarioDefinition::from_json(r#"{"id": "x", "nodes": []}"#);
        assert!(matches!(result, Err(ScenarioError::Import(_))));
    }

    #[test]
    fn test_export_import_round_trip_is_byte_identical() {
        let mut scenario = linear_scenario();
        scenario.trigger = Trigger::StatusChange {
            from: None,
            to: Some(ChargePointStatus::Charging),
        };
        scenario.nodes.insert(
            2,
            ScenarioNode::new(
                "notify",
                NodeData::Notification {
                    message_type: "DataTransfer".to_string(),
                    // keep a non-trivial payload in the round trip
                    payload: serde_json::json!({"vendorId": "chargesim", "data": [1, 2, 3]}),
                },
            ),
        );

        let exported = scenario.to_json().unwrap();
        let imported = ScenarioDefinition::from_json(&exported).unwrap();
        assert_eq!(imported, scenario);

        let re_exported = imported.to_json().unwrap();
        assert_eq!(re_exported, exported);
    }
}
