//! Core workflow type definitions
//!
//! Defines workflows, nodes, edges, projects, and node schemas. These types are
//! serialized/deserialized as camelCase JSON documents for persistence, so the
//! stored shape matches what the visual editor produces.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON documents in SQLite and compiled into routing
/// metadata by the registry. A workflow is routable over HTTP only while
/// `status` is `active` and at least one trigger node declares a webhook path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-order-sync")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Owning project identifier
    #[serde(default)]
    pub project_id: String,
    /// Lifecycle status controlling routability
    #[serde(default)]
    pub status: WorkflowStatus,
    /// Monotonic version counter, bumped by the management API on update
    #[serde(default)]
    pub version: i64,
    /// Legacy workflow-level endpoint config; trigger nodes are the primary
    /// source of webhook paths, but this still routes when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointConfig>,
    /// Ordered list of nodes in this workflow
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Ordered list of edges connecting nodes; stored order is observable
    /// because edge selection picks the first match
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Free-form workflow variables available to every execution
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl Workflow {
    /// All trigger nodes in document order
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.node_type == "trigger")
    }

    /// Every endpoint path this workflow answers on: trigger webhook paths
    /// plus the legacy workflow-level endpoint path
    pub fn endpoint_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .trigger_nodes()
            .filter_map(|n| n.data.webhook_path.clone())
            .filter(|p| !p.is_empty())
            .collect();
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.path.is_empty() && !paths.contains(&endpoint.path) {
                paths.push(endpoint.path.clone());
            }
        }
        paths
    }

    pub fn is_routable(&self) -> bool {
        self.status == WorkflowStatus::Active && !self.endpoint_paths().is_empty()
    }
}

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Inactive,
    Archived,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Inactive => "inactive",
            WorkflowStatus::Archived => "archived",
        }
    }
}

/// Legacy workflow-level endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// A single node in the workflow graph
///
/// The `type` tag selects the executor from the node registry; `data` carries
/// the type-discriminated configuration. `position` is opaque UI state and is
/// round-tripped untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Stable node identifier, unique within the workflow
    pub id: String,
    /// Node type tag: trigger, transform, http, condition, loop, code, delay,
    /// response, or a registered custom_* type
    #[serde(rename = "type")]
    pub node_type: String,
    /// Human-readable label shown in the editor and execution logs
    #[serde(default)]
    pub label: String,
    /// Opaque editor position
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub position: Value,
    /// Type-discriminated node configuration
    #[serde(default)]
    pub data: NodeData,
    /// Declared input port descriptors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PortDescriptor>,
    /// Declared output port descriptors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PortDescriptor>,
}

/// Named port declared on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescriptor {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

/// Union view of node configuration
///
/// One struct for every node type; only the fields relevant to the node's type
/// tag are meaningful, everything else stays at its default. This mirrors the
/// persisted editor document, which carries a single flat `data` object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeData {
    // trigger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<TriggerKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    // transform
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mapping_rules: Vec<MappingRule>,

    // http
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    // condition
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionRule>,

    // loop
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_type: Option<LoopKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    // code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    // response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selected_fields: Vec<SelectedField>,
    pub use_template: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_config: Option<ErrorConfig>,

    // delay and custom_* executors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_config: Option<Value>,
}

/// How an execution was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    #[default]
    Webhook,
    Schedule,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Webhook => "webhook",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Manual => "manual",
        }
    }
}

/// Loop node flavor; only forEach has runtime behavior today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopKind {
    #[serde(rename = "forEach")]
    ForEach,
    #[serde(rename = "while")]
    While,
    #[serde(rename = "for")]
    For,
}

/// One field mapping on a transform node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    pub source_field: String,
    pub target_field: String,
    /// Transform opcode; unknown names copy the value through unchanged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    /// Substituted when the resolved value is null or the opcode fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// One branch rule on a condition node; first match wins
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRule {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    pub output_port_id: String,
}

/// Field projection on a response node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedField {
    pub field_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Error response configuration on a response node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_status_code: Option<u16>,
    pub use_custom_template: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_template: Option<String>,
    /// traceId is emitted in error bodies unless this is explicitly false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_trace_id: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ErrorTypeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_found: Option<ErrorTypeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unauthorized: Option<ErrorTypeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forbidden: Option<ErrorTypeConfig>,
}

/// Per-error-type override inside an [`ErrorConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorTypeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Directed connection between two nodes
///
/// `source_handle` binds the edge to a named output port of the source node:
/// when both the handle and the producing node's `next_port` are non-empty,
/// the edge matches only if they are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
    #[serde(default)]
    pub source_handle: String,
    #[serde(default)]
    pub target_handle: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

/// Imported schema side record for a transform node
///
/// Keyed by (workflowId, nodeId). Non-empty `connections` supersede the
/// node's inline mapping rules at execution time. Orphaned records after a
/// workflow deletion are acceptable; they are never read without the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSchema {
    pub workflow_id: String,
    pub node_id: String,
    #[serde(default)]
    pub source_schema: Value,
    #[serde(default)]
    pub target_schema: Value,
    #[serde(default)]
    pub connections: Vec<SchemaConnection>,
}

/// One field connection in a [`NodeSchema`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaConnection {
    pub source_field: String,
    pub target_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_type: Option<String>,
}

impl SchemaConnection {
    /// View a connection as the mapping rule it supersedes
    pub fn to_mapping_rule(&self) -> MappingRule {
        MappingRule {
            source_field: self.source_field.clone(),
            target_field: self.target_field.clone(),
            transform: self.transform_type.clone(),
            default_value: None,
        }
    }
}

/// A project container grouping workflows under a common path prefix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Semantic version tag used in the default path prefix (e.g., "v1")
    #[serde(default = "default_version_tag")]
    pub version_tag: String,
    /// Every trigger webhook path under this project must begin with this
    #[serde(default)]
    pub path_prefix: String,
    /// While locked, workflows in this project reject create/update/delete;
    /// the only permitted project mutation is unlocking
    #[serde(default)]
    pub is_locked: bool,
}

fn default_version_tag() -> String {
    "v1".to_string()
}

impl Project {
    pub fn new(id: String, name: String, version_tag: String) -> Self {
        let path_prefix = format!("/api/{}/{}", slug(&name), version_tag);
        Self {
            id,
            name,
            version_tag,
            path_prefix,
            is_locked: false,
        }
    }
}

/// URL-safe slug: lowercase alphanumerics with single dashes
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
