//! Workflow graph definition: typed nodes connected by named-outcome edges.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node category. Dispatch is two-level: the engine selects a handler by
/// category, the handler branches internally on [`Node::subtype`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Trigger,
    Condition,
    Data,
    Communication,
    Task,
    Approval,
    Delay,
    Integration,
    List,
    Error,
    Collection,
    Scheduled,
    Event,
}

impl NodeType {
    pub const ALL: [NodeType; 13] = [
        NodeType::Trigger,
        NodeType::Condition,
        NodeType::Data,
        NodeType::Communication,
        NodeType::Task,
        NodeType::Approval,
        NodeType::Delay,
        NodeType::Integration,
        NodeType::List,
        NodeType::Error,
        NodeType::Collection,
        NodeType::Scheduled,
        NodeType::Event,
    ];

    /// Whether this category can start a workflow. Scheduled and event
    /// categories are trigger-like: a graph entry point, not an action.
    pub fn is_entry_point(&self) -> bool {
        matches!(
            self,
            NodeType::Trigger | NodeType::Scheduled | NodeType::Event
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::Trigger => "trigger",
            NodeType::Condition => "condition",
            NodeType::Data => "data",
            NodeType::Communication => "communication",
            NodeType::Task => "task",
            NodeType::Approval => "approval",
            NodeType::Delay => "delay",
            NodeType::Integration => "integration",
            NodeType::List => "list",
            NodeType::Error => "error",
            NodeType::Collection => "collection",
            NodeType::Scheduled => "scheduled",
            NodeType::Event => "event",
        };
        f.write_str(s)
    }
}

/// One step in a workflow graph.
///
/// `connections` maps a named outcome (`"default"`, `"true"`, `"approved"`,
/// ...) to the target node id. A node whose produced outcome has no entry
/// terminates that branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub subtype: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub connections: BTreeMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType, subtype: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            subtype: subtype.into(),
            label: None,
            config: Value::Null,
            connections: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn connect(mut self, outcome: impl Into<String>, target: impl Into<String>) -> Self {
        self.connections.insert(outcome.into(), target.into());
        self
    }

    /// Read a string field from `config`.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_i64(&self, key: &str) -> Option<i64> {
        self.config.get(key).and_then(Value::as_i64)
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(Value::as_f64)
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

/// Ordered set of nodes. Edges are embedded in each node's `connections`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<Node>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The graph's entry points (trigger-category nodes).
    pub fn entry_points(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.node_type.is_entry_point())
            .collect()
    }
}

/// A named workflow definition, immutable once activated. Mutating an active
/// workflow's graph bumps `version`; executions record the version they ran
/// under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    /// Unique human-readable key.
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// CRM module this workflow belongs to (LEAD, CONTACT, DEAL, ...).
    pub module_type: String,
    /// Trigger kind this workflow listens for (record_created, ...).
    pub trigger_type: String,
    pub version: u32,
    pub active: bool,
    pub graph: WorkflowGraph,
}

impl Workflow {
    pub fn new(
        id: impl Into<String>,
        key: impl Into<String>,
        module_type: impl Into<String>,
        trigger_type: impl Into<String>,
        graph: WorkflowGraph,
    ) -> Self {
        let key = key.into();
        Self {
            id: id.into(),
            name: key.clone(),
            key,
            description: None,
            module_type: module_type.into(),
            trigger_type: trigger_type.into(),
            version: 1,
            active: true,
            graph,
        }
    }
}
