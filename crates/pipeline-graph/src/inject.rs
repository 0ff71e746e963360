// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Parameter injection into a pre-patched pipeline.
//!
//! Callers address parameters with dotted paths relative to the graph:
//! `"sampler.inputs.steps"`, or the shorthand `"sampler.steps"` — when the
//! second segment is not literally `inputs` it is inserted, so both forms
//! address the same slot.
//!
//! Injection is batch-tolerant: an assignment whose path does not resolve
//! is logged and skipped, the rest of the batch proceeds. Setting a key
//! that did not previously exist works but is logged as notable, since it
//! usually means the caller's parameter name drifted from the pipeline
//! schema.

use crate::{InputValue, NodeGraph};
use std::collections::BTreeMap;

/// A flat batch of dotted-path assignments.
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// Applies every assignment in `params` to `graph`, in place.
///
/// Unresolvable paths are skipped per-assignment; the batch never fails as
/// a whole.
pub fn inject(graph: &mut NodeGraph, params: &ParamMap) {
    for (path, value) in params {
        inject_one(graph, path, value.clone());
    }
}

fn inject_one(graph: &mut NodeGraph, path: &str, value: serde_json::Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    if !segments.contains(&"inputs") {
        segments.insert(1, "inputs");
    }
    if segments.len() < 2 {
        tracing::debug!("attempt to set unknown pipeline parameter {path}");
        return;
    }

    let Some(node) = graph.get_mut(segments[0]) else {
        tracing::debug!("attempt to set unknown pipeline parameter {path}");
        return;
    };

    if segments[1] != "inputs" {
        // An explicit "inputs" later in the path put something else second;
        // nodes only have an input block, so this cannot resolve.
        tracing::debug!("attempt to set unknown pipeline parameter {path}");
        return;
    }

    match segments.len() {
        // "node.inputs" — replace the whole input block.
        2 => match serde_json::from_value::<BTreeMap<String, InputValue>>(value) {
            Ok(inputs) => node.inputs = inputs,
            Err(_) => tracing::debug!("attempt to set non-object input block via {path}"),
        },
        // "node.inputs.key" — the common case.
        3 => {
            let key = segments[2];
            if !node.inputs.contains_key(key) {
                tracing::debug!("attempt to set parameter CREATED parameter '{path}'");
            }
            node.inputs.insert(key.to_string(), InputValue::from_json(value));
        }
        // Deeper paths descend into a literal JSON object.
        _ => {
            let key = segments[2];
            let Some(InputValue::Literal(literal)) = node.inputs.get_mut(key) else {
                tracing::debug!("attempt to set unknown pipeline parameter {path}");
                return;
            };
            let mut current = literal;
            for segment in &segments[3..segments.len() - 1] {
                let Some(next) = current.get_mut(*segment) else {
                    tracing::debug!("attempt to set unknown pipeline parameter {path}");
                    return;
                };
                current = next;
            }
            let Some(object) = current.as_object_mut() else {
                tracing::debug!("attempt to set unknown pipeline parameter {path}");
                return;
            };
            let last = segments[segments.len() - 1];
            if !object.contains_key(last) {
                tracing::debug!("attempt to set parameter CREATED parameter '{path}'");
            }
            object.insert(last.to_string(), value);
        }
    }
}

/// Repoints the edge input at `input_path` to draw from node `source`.
///
/// Used for dynamic switching of pipeline graphs, e.g. feeding a sampler
/// from an image loader instead of a latent. Returns `false` (after
/// logging) when the source node does not exist, the path does not
/// resolve, or the addressed input is not an edge.
pub fn reconnect(graph: &mut NodeGraph, input_path: &str, source: &str) -> bool {
    tracing::debug!("request to reconnect input {input_path} to output {source}");

    if !graph.contains(source) {
        tracing::debug!("can not reconnect input {input_path} to {source} as {source} does not exist");
        return false;
    }

    let mut segments: Vec<&str> = input_path.split('.').collect();
    if !segments.contains(&"inputs") {
        segments.insert(1, "inputs");
    }
    if segments.len() != 3 || segments[1] != "inputs" {
        tracing::debug!("attempt to reconnect unknown input {input_path}");
        return false;
    }

    let Some(node) = graph.get_mut(segments[0]) else {
        tracing::debug!("attempt to reconnect unknown input {input_path}");
        return false;
    };
    let Some(InputValue::Link(link)) = node.inputs.get_mut(segments[2]) else {
        tracing::debug!("attempt to reconnect unknown input {input_path}");
        return false;
    };

    link.0 = source.to_string();
    tracing::debug!("request completed to reconnect input {input_path} to output {source}");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Node, NodeLink};
    use serde_json::json;

    fn sample_graph() -> NodeGraph {
        let mut graph = NodeGraph::new();
        graph.insert(
            "loader",
            Node::new("HordeCheckpointLoader").with_input("model_name", json!("a.safetensors")),
        );
        graph.insert(
            "sampler",
            Node::new("KSampler")
                .with_link("model", "loader", 0)
                .with_input("steps", json!(20))
                .with_input("options", json!({ "cfg": { "scale": 7.5 } })),
        );
        graph.insert("empty_latent", Node::new("EmptyLatentImage"));
        graph
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_inject_overwrites_existing() {
        let mut graph = sample_graph();
        inject(&mut graph, &params(&[("sampler.inputs.steps", json!(50))]));
        assert_eq!(
            graph.get("sampler").unwrap().inputs.get("steps"),
            Some(&InputValue::Literal(json!(50)))
        );
    }

    #[test]
    fn test_implicit_inputs_segment_is_equivalent() {
        let mut explicit = sample_graph();
        inject(&mut explicit, &params(&[("sampler.inputs.steps", json!(50))]));

        let mut implicit = sample_graph();
        inject(&mut implicit, &params(&[("sampler.steps", json!(50))]));

        assert_eq!(explicit, implicit);
    }

    #[test]
    fn test_unknown_node_is_skipped() {
        let mut graph = sample_graph();
        let before = graph.clone();
        inject(&mut graph, &params(&[("missing.steps", json!(1))]));
        assert_eq!(graph, before);
    }

    #[test]
    fn test_bad_path_does_not_abort_batch() {
        let mut graph = sample_graph();
        inject(
            &mut graph,
            &params(&[
                ("missing.steps", json!(1)),
                ("sampler.steps", json!(30)),
            ]),
        );
        assert_eq!(
            graph.get("sampler").unwrap().inputs.get("steps"),
            Some(&InputValue::Literal(json!(30)))
        );
    }

    #[test]
    fn test_created_parameter() {
        let mut graph = sample_graph();
        inject(&mut graph, &params(&[("sampler.denoise", json!(0.75))]));
        assert_eq!(
            graph.get("sampler").unwrap().inputs.get("denoise"),
            Some(&InputValue::Literal(json!(0.75)))
        );
    }

    #[test]
    fn test_inject_link_value() {
        let mut graph = sample_graph();
        inject(&mut graph, &params(&[("sampler.model", json!(["empty_latent", 0]))]));
        assert_eq!(
            graph.get("sampler").unwrap().inputs.get("model"),
            Some(&InputValue::Link(NodeLink("empty_latent".into(), 0)))
        );
    }

    #[test]
    fn test_deep_path_into_literal_object() {
        let mut graph = sample_graph();
        inject(
            &mut graph,
            &params(&[("sampler.inputs.options.cfg.scale", json!(9.0))]),
        );
        assert_eq!(
            graph.get("sampler").unwrap().inputs.get("options"),
            Some(&InputValue::Literal(json!({ "cfg": { "scale": 9.0 } })))
        );
    }

    #[test]
    fn test_deep_path_missing_intermediate() {
        let mut graph = sample_graph();
        let before = graph.clone();
        inject(
            &mut graph,
            &params(&[("sampler.inputs.options.missing.scale", json!(9.0))]),
        );
        assert_eq!(graph, before);
    }

    #[test]
    fn test_reconnect() {
        let mut graph = sample_graph();
        assert!(reconnect(&mut graph, "sampler.model", "empty_latent"));
        assert_eq!(
            graph.get("sampler").unwrap().inputs.get("model"),
            Some(&InputValue::Link(NodeLink("empty_latent".into(), 0)))
        );
    }

    #[test]
    fn test_reconnect_missing_source() {
        let mut graph = sample_graph();
        assert!(!reconnect(&mut graph, "sampler.model", "nope"));
    }

    #[test]
    fn test_reconnect_non_edge_input() {
        let mut graph = sample_graph();
        assert!(!reconnect(&mut graph, "sampler.steps", "empty_latent"));
    }

    #[test]
    fn test_reconnect_implicit_inputs() {
        let mut explicit = sample_graph();
        let mut implicit = sample_graph();
        assert!(reconnect(&mut explicit, "sampler.inputs.model", "empty_latent"));
        assert!(reconnect(&mut implicit, "sampler.model", "empty_latent"));
        assert_eq!(explicit, implicit);
    }
}
