// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The node-graph data model.
//!
//! A pipeline is a mapping from node identifier to a node record:
//!
//! ```json
//! {
//!   "3": {
//!     "class_type": "CheckpointLoaderSimple",
//!     "inputs": { "ckpt_name": "model.safetensors" }
//!   },
//!   "4": {
//!     "class_type": "KSampler",
//!     "inputs": { "model": ["3", 0], "steps": 20 }
//!   }
//! }
//! ```
//!
//! An input value is either a literal (any JSON value) or an edge reference
//! `[source_node_id, output_index]`. The invariant maintained by the patcher
//! is that every edge reference resolves to an existing node id; a dangling
//! reference means the graph is corrupt and the engine will reject it with
//! an opaque error, so [`NodeGraph::dangling_refs`] exists to catch that in
//! tests before the engine ever sees the graph.

use crate::GraphError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An edge reference: `[source_node_id, output_index]`.
///
/// Serialises as a two-element JSON array, exactly as the engine expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink(pub String, pub u32);

impl NodeLink {
    /// The id of the node this edge draws from.
    pub fn source(&self) -> &str {
        &self.0
    }

    /// The output slot index on the source node.
    pub fn output(&self) -> u32 {
        self.1
    }
}

/// A single node input: a literal value or an edge reference.
///
/// `Link` is tried first during deserialisation, so any two-element array of
/// `[string, number]` is treated as an edge. That matches the engine's own
/// interpretation of the format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    /// Edge reference to another node's output.
    Link(NodeLink),
    /// A literal parameter value.
    Literal(serde_json::Value),
}

impl InputValue {
    /// Converts an arbitrary JSON value into an input, recognising edge
    /// references by shape.
    pub fn from_json(value: serde_json::Value) -> Self {
        match serde_json::from_value::<NodeLink>(value.clone()) {
            Ok(link) => InputValue::Link(link),
            Err(_) => InputValue::Literal(value),
        }
    }

    /// Returns the edge reference if this input is one.
    pub fn as_link(&self) -> Option<&NodeLink> {
        match self {
            InputValue::Link(link) => Some(link),
            InputValue::Literal(_) => None,
        }
    }
}

/// A single computation node: its engine class and its input block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// The engine node class, e.g. `"KSampler"`.
    pub class_type: String,
    /// Input parameters, literal or edge references.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,
    /// Fields we do not interpret (e.g. editor metadata). Preserved so a
    /// loaded graph round-trips byte-compatibly through the engine.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Node {
    /// Creates a node with the given class and no inputs.
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Builder-style literal input, used heavily in tests.
    pub fn with_input(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(name.into(), InputValue::Literal(value));
        self
    }

    /// Builder-style edge input.
    pub fn with_link(mut self, name: impl Into<String>, source: impl Into<String>, output: u32) -> Self {
        self.inputs
            .insert(name.into(), InputValue::Link(NodeLink(source.into(), output)));
        self
    }
}

/// A complete pipeline graph: node id → node.
///
/// The map is ordered so patch passes and serialisation are deterministic.
/// `NodeGraph` is plain owned data — cloning it is the deep copy the
/// registry hands out to callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeGraph {
    nodes: BTreeMap<String, Node>,
}

impl NodeGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a graph from its on-disk JSON form.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True when a node with the given id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Looks up a node by id.
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Inserts or replaces a node.
    pub fn insert(&mut self, id: impl Into<String>, node: Node) {
        self.nodes.insert(id.into(), node);
    }

    /// Iterates nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }

    /// Mutable iteration in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Node)> {
        self.nodes.iter_mut()
    }

    /// Node ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    /// Consumes the graph, returning the underlying map.
    pub fn into_nodes(self) -> BTreeMap<String, Node> {
        self.nodes
    }

    /// Returns every edge reference whose source node does not exist, as
    /// `(referencing_node_id, missing_source_id)` pairs.
    pub fn dangling_refs(&self) -> Vec<(String, String)> {
        let mut dangling = Vec::new();
        for (id, node) in &self.nodes {
            for input in node.inputs.values() {
                if let Some(link) = input.as_link() {
                    if !self.nodes.contains_key(link.source()) {
                        dangling.push((id.clone(), link.source().to_string()));
                    }
                }
            }
        }
        dangling
    }
}

impl fmt::Display for NodeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "NodeGraph ({} nodes):", self.nodes.len())?;
        for (id, node) in &self.nodes {
            writeln!(f, "  {id}: {} ({} inputs)", node.class_type, node.inputs.len())?;
        }
        Ok(())
    }
}

// ── Design documents ───────────────────────────────────────────────

/// A node descriptor from the design document: its id and optional
/// human-readable title.
///
/// The authoring tool emits ids as JSON numbers; pipeline files key nodes by
/// the same ids as strings, so we normalise at parse time.
#[derive(Debug, Clone, Deserialize)]
pub struct DesignNode {
    /// Node id, normalised to a string.
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    /// Human-readable title, when the author set one.
    #[serde(default)]
    pub title: Option<String>,
}

/// The optional companion artifact supplying friendly node names.
///
/// Only the `nodes` list is interpreted; the authoring tool stores plenty of
/// layout data we ignore. A missing `nodes` key is a structural error — the
/// rest of the format can change under us without breaking anything.
#[derive(Debug, Clone, Deserialize)]
pub struct DesignDocument {
    /// Node descriptors.
    pub nodes: Vec<DesignNode>,
}

impl DesignDocument {
    /// Parses a design document from JSON.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns the title recorded for the given node id, if any.
    pub fn title_for(&self, id: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .and_then(|n| n.title.as_deref())
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "design node id must be a string or number, got {other}"
        ))),
    }
}
