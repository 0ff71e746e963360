// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # bridge
//!
//! The worker-facing adaptation layer over a node-graph image generation
//! engine. Worker threads hand it a pipeline name and a flat parameter
//! map; it resolves the patched graph, injects the parameters, drives the
//! engine's validator and executor, and returns the images the engine
//! delivered through its asynchronous callback.
//!
//! ```no_run
//! use bridge::{GraphBridge, WorkerConfig};
//! use pipeline_graph::ParamMap;
//! use std::sync::Arc;
//!
//! # fn engine() -> Arc<dyn engine_api::InferenceBackend> { unimplemented!() }
//! # fn main() -> Result<(), bridge::BridgeError> {
//! let mut bridge = GraphBridge::new(engine(), WorkerConfig::from_env())?;
//! let loaded = bridge.load_all_pipelines();
//! tracing::info!("loaded {loaded} pipelines");
//!
//! let mut params = ParamMap::new();
//! params.insert("sampler.seed".into(), serde_json::json!(1234));
//! let images = bridge.run("stable_diffusion", &params)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! All of [`GraphBridge`]'s run-path methods take `&self` and are safe to
//! call from any number of worker threads. Each run mutates only a private
//! deep copy of its pipeline; results come back through per-thread slots
//! (see [`InvocationContext`]); model residency and the advisory lock set
//! have their own internal locks. No ordering is guaranteed across
//! distinct runs.

mod config;
mod error;
mod orchestrator;
mod session;

pub use config::{MemoryMargin, WorkerConfig};
pub use error::BridgeError;
pub use orchestrator::{GraphBridge, PipelineInput};
pub use session::{CallScope, InvocationContext};
