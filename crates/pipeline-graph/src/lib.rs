// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # pipeline-graph
//!
//! Node-graph pipeline definitions for the worker bridge: the typed graph
//! model, the load-time patcher, runtime parameter injection, and the
//! pipeline registry.
//!
//! # Key Components
//!
//! - [`NodeGraph`] / [`Node`] / [`InputValue`] — the typed form of the
//!   engine's JSON prompt format.
//! - [`patch`] — rewrites an editor-authored graph into its worker-side
//!   form: class substitution, input renames, friendly node names from a
//!   [`DesignDocument`].
//! - [`inject`] — dotted-path parameter injection into a private graph
//!   copy before execution.
//! - [`PipelineRegistry`] — loads a directory of pipeline files once and
//!   serves independent copies on every read.
//!
//! # Pipeline Lifecycle
//!
//! ```text
//! pipeline_txt2img.json ──► NodeGraph ──► patch() ──► registry store
//!                                                         │ get()
//!                                                         ▼
//!                                             deep copy ──► inject() ──► engine
//! ```
//!
//! # Example
//! ```
//! use pipeline_graph::{patch, NodeGraph};
//!
//! let mut graph = NodeGraph::from_json(
//!     r#"{ "3": { "class_type": "CheckpointLoaderSimple",
//!                 "inputs": { "ckpt_name": "x.safetensors" } } }"#,
//! ).unwrap();
//!
//! patch(&mut graph, None).unwrap();
//! assert_eq!(graph.get("3").unwrap().class_type, "HordeCheckpointLoader");
//! ```

mod error;
mod graph;
mod inject;
mod patch;
mod registry;

pub use error::GraphError;
pub use graph::{DesignDocument, DesignNode, InputValue, Node, NodeGraph, NodeLink};
pub use inject::{inject, reconnect, ParamMap};
pub use patch::{parameter_renames, patch, GenericNodeClass};
pub use registry::PipelineRegistry;
