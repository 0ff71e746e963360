// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The graph patcher.
//!
//! Pipelines are authored in the engine's visual editor with its standard
//! node set, then rewritten at load time:
//!
//! 1. **Type substitution** — standard node classes are swapped for our
//!    worker-side specialisations (e.g. `CheckpointLoaderSimple` →
//!    `HordeCheckpointLoader`), so the same file previews in the editor and
//!    runs with our nodes in production.
//! 2. **Parameter renaming** — substituted classes may expose differently
//!    named inputs; values are carried over to the new key.
//! 3. **Node renaming** — when a design document is available, opaque ids
//!    like `"3"` become the author's titles, and every edge reference is
//!    rewritten to follow.
//!
//! All three passes are idempotent: substitution targets are never
//! themselves substitution sources, renaming skips absent keys, and a
//! renamed node no longer matches any design id.

use crate::{DesignDocument, GraphError, NodeGraph};
use std::collections::BTreeMap;

/// The standard node classes we substitute at load time.
///
/// Expressed as an enum so the replacement table is exhaustive: adding a
/// variant without a specialised class name is a compile error, and a typo
/// in a class string can only break one match arm, not silently fall
/// through a map lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericNodeClass {
    CheckpointLoaderSimple,
    UpscaleModelLoader,
    SaveImage,
    LoadImage,
    DiffControlNetLoader,
    LoraLoader,
}

impl GenericNodeClass {
    /// Recognises a standard class name.
    pub fn from_class_name(name: &str) -> Option<Self> {
        match name {
            "CheckpointLoaderSimple" => Some(Self::CheckpointLoaderSimple),
            "UpscaleModelLoader" => Some(Self::UpscaleModelLoader),
            "SaveImage" => Some(Self::SaveImage),
            "LoadImage" => Some(Self::LoadImage),
            "DiffControlNetLoader" => Some(Self::DiffControlNetLoader),
            "LoraLoader" => Some(Self::LoraLoader),
            _ => None,
        }
    }

    /// The worker-side class this standard class is replaced with.
    pub fn specialised(self) -> &'static str {
        match self {
            Self::CheckpointLoaderSimple => "HordeCheckpointLoader",
            Self::UpscaleModelLoader => "HordeUpscaleModelLoader",
            Self::SaveImage => "HordeImageOutput",
            Self::LoadImage => "HordeImageLoader",
            Self::DiffControlNetLoader => "HordeDiffControlNetLoader",
            Self::LoraLoader => "HordeLoraLoader",
        }
    }
}

/// Input-key renames applied to a (possibly just-substituted) class.
///
/// `HordeCheckpointLoader` takes `model_name` so every worker-side model
/// loader shares the same parameter name.
pub fn parameter_renames(class_type: &str) -> &'static [(&'static str, &'static str)] {
    match class_type {
        "HordeCheckpointLoader" => &[("ckpt_name", "model_name")],
        _ => &[],
    }
}

/// Rewrites a raw pipeline graph into its worker-side form.
///
/// Applies type substitution and parameter renaming always, and node
/// renaming when a design document is supplied. Errors only when the design
/// assigns the same title to two nodes, which would merge them and leave
/// edges dangling.
pub fn patch(graph: &mut NodeGraph, design: Option<&DesignDocument>) -> Result<(), GraphError> {
    substitute_classes(graph);
    rename_parameters(graph);
    if let Some(design) = design {
        rename_nodes(graph, design)?;
    }
    Ok(())
}

/// Pass 1: swap standard classes for specialised ones.
fn substitute_classes(graph: &mut NodeGraph) {
    for (id, node) in graph.iter_mut() {
        if let Some(generic) = GenericNodeClass::from_class_name(&node.class_type) {
            let specialised = generic.specialised();
            tracing::debug!("changed type of node {id} from {} to {specialised}", node.class_type);
            node.class_type = specialised.to_string();
        }
    }
}

/// Pass 2: carry input values over to renamed keys.
fn rename_parameters(graph: &mut NodeGraph) {
    for (id, node) in graph.iter_mut() {
        for (old, new) in parameter_renames(&node.class_type) {
            if let Some(value) = node.inputs.remove(*old) {
                tracing::debug!("renamed node input {id}.{old} to {new}");
                node.inputs.insert((*new).to_string(), value);
            }
        }
    }
}

/// Pass 3: rename nodes to their design titles and rewrite edges.
fn rename_nodes(graph: &mut NodeGraph, design: &DesignDocument) -> Result<(), GraphError> {
    // Old id → new id, identity for nodes without a titled design entry.
    // Resolved up front so a duplicate title leaves the graph untouched.
    let mut renames: BTreeMap<String, String> = BTreeMap::new();
    for id in graph.ids() {
        let new_id = design.title_for(id).unwrap_or(id).to_string();
        if renames.values().any(|existing| *existing == new_id) {
            return Err(GraphError::DuplicateTitle { title: new_id });
        }
        renames.insert(id.clone(), new_id);
    }

    let mut renamed = NodeGraph::new();
    for (id, node) in std::mem::take(graph).into_nodes() {
        renamed.insert(renames[&id].clone(), node);
    }

    // Edges still point at the old ids; follow the renames.
    for (_, node) in renamed.iter_mut() {
        for input in node.inputs.values_mut() {
            if let crate::InputValue::Link(link) = input {
                if let Some(new_id) = renames.get(link.source()) {
                    link.0 = new_id.clone();
                }
            }
        }
    }

    *graph = renamed;
    Ok(())
}
