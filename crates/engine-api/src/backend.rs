// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The narrow call interface consumed from the inference engine.
//!
//! Everything this layer needs from the engine goes through
//! [`InferenceBackend`]; no other module may reach into engine internals.
//! Keeping the surface to one trait is what lets the whole bridge be
//! tested against a scripted mock and lets the engine be upgraded behind
//! it.

use crate::{CheckpointOptions, EngineError, EventSink, ModelBundle, ModelHandle};
use pipeline_graph::NodeGraph;
use std::path::Path;
use std::sync::Mutex;

/// Outcome of the engine's prompt validation.
///
/// `outputs` is the list of output-node ids the executor must be told to
/// produce. It is meaningful even when `valid` is false; the bridge hands
/// it to the executor regardless and lets the engine surface its own
/// failure.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Whether the engine considers the prompt executable.
    pub valid: bool,
    /// Engine-provided diagnostic, empty when valid.
    pub message: String,
    /// Ids of the output nodes to execute.
    pub outputs: Vec<String>,
}

/// The wrapped engine's call surface.
///
/// Implementations must be shareable across worker threads; the engine is
/// expected to do its own internal locking around device state. The
/// exceptions are documented per method.
pub trait InferenceBackend: Send + Sync {
    // ── Execution ──────────────────────────────────────────────

    /// Validates a prompt graph. `strict` requests full output checking.
    fn validate_prompt(&self, graph: &NodeGraph, strict: bool)
        -> Result<ValidationReport, EngineError>;

    /// Executes a prompt graph. Blocks until execution completes; finished
    /// outputs are delivered through `sink` with the given `call_id`
    /// before this returns.
    fn execute(
        &self,
        graph: &NodeGraph,
        call_id: &str,
        outputs: &[String],
        sink: &dyn EventSink,
    ) -> Result<(), EngineError>;

    // ── Device queries ─────────────────────────────────────────

    /// Free accelerator memory, in bytes.
    fn free_memory_bytes(&self) -> u64;

    /// Identifier of the active accelerator device.
    fn current_device(&self) -> String;

    /// Whether the device has spare capacity for another model.
    fn has_free_capacity(&self) -> bool;

    // ── Model lifecycle ────────────────────────────────────────

    /// Loads a model's weights onto the accelerator.
    fn load_model(&self, model: &ModelHandle);

    /// Unloads a model's weights from the accelerator.
    fn unload_model(&self, model: &ModelHandle);

    /// Whether the engine is currently sampling with this model. This
    /// query is authoritative for eviction decisions.
    fn is_model_in_use(&self, model: &ModelHandle) -> bool;

    /// Loads a checkpoint, returning the full resource bundle.
    fn load_checkpoint(
        &self,
        path: &Path,
        options: &CheckpointOptions,
    ) -> Result<ModelBundle, EngineError>;

    /// Loads a controlnet conditioned on an already-loaded model.
    fn load_controlnet(
        &self,
        path: &Path,
        target: &ModelHandle,
    ) -> Result<ModelHandle, EngineError>;

    // ── Settings & housekeeping ────────────────────────────────

    /// Tells the engine how much accelerator memory to leave untouched.
    fn set_reserved_memory(&self, bytes: u64);

    /// Toggles the engine's batch optimisations.
    fn set_batch_optimisations(&self, enabled: bool);

    /// Forces a full garbage/device-memory collection pass.
    fn collect_garbage(&self);

    /// The serialization primitive shared between this layer's cleanup and
    /// the engine's sampling pass. Cleanup only ever probes it
    /// non-blockingly; blocking here can deadlock against an in-progress
    /// sample.
    fn sampler_mutex(&self) -> &Mutex<()>;
}
