// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The run orchestrator.
//!
//! ```text
//! registry ──deep copy──► inject(params) ──► validate ──► execute
//!                                                            │ events
//!                                                            ▼
//!                    take_images() ◄── per-thread context ◄── on_event
//! ```
//!
//! [`GraphBridge::run`] blocks the calling thread until the engine call
//! returns; any parallelism is internal to the engine and not observable
//! here. After every run the bridge gives the residency tracker a cleanup
//! chance and, at most once per configured interval, forces a full
//! garbage-collection pass.
//!
//! There is no cancellation or timeout: a run either completes or the
//! calling thread stays blocked in the engine call. Retry is the caller's
//! responsibility.

use crate::{BridgeError, InvocationContext, MemoryMargin, WorkerConfig};
use engine_api::{
    CheckpointOptions, EventPayload, EventSink, InferenceBackend, ModelBundle, ModelHandle,
    OutputImage,
};
use pipeline_graph::{inject, NodeGraph, ParamMap, PipelineRegistry};
use residency::{ModelLockGuard, ModelLockSet, ResidencyTracker};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A pipeline selector: a registered name or a pre-built graph.
#[derive(Debug, Clone)]
pub enum PipelineInput {
    /// Look the pipeline up in the registry.
    Name(String),
    /// Run this graph directly.
    Graph(NodeGraph),
}

impl From<&str> for PipelineInput {
    fn from(name: &str) -> Self {
        PipelineInput::Name(name.to_string())
    }
}

impl From<String> for PipelineInput {
    fn from(name: String) -> Self {
        PipelineInput::Name(name)
    }
}

impl From<NodeGraph> for PipelineInput {
    fn from(graph: NodeGraph) -> Self {
        PipelineInput::Graph(graph)
    }
}

/// Caller-count and idle-time bookkeeping, for observability only.
#[derive(Debug)]
struct Activity {
    /// Calls currently inside [`GraphBridge::run`].
    active: usize,
    /// When the last call exited, if any has.
    last_exit: Option<Instant>,
}

/// The worker-facing bridge to the inference engine.
///
/// Owns the pipeline registry, the residency tracker, the model lock set,
/// and the per-thread invocation context; holds the engine behind
/// [`InferenceBackend`]. Construct one per engine, load pipelines once,
/// then share it across worker threads.
pub struct GraphBridge {
    backend: Arc<dyn InferenceBackend>,
    config: WorkerConfig,
    reserved: MemoryMargin,
    registry: PipelineRegistry,
    residency: ResidencyTracker,
    locks: ModelLockSet,
    context: InvocationContext,
    activity: Mutex<Activity>,
    gc_timer: Mutex<Instant>,
}

impl GraphBridge {
    /// Creates a bridge over the given engine.
    ///
    /// Fails only on unparseable configuration; pipelines are loaded
    /// separately via [`load_all_pipelines`](Self::load_all_pipelines).
    pub fn new(backend: Arc<dyn InferenceBackend>, config: WorkerConfig) -> Result<Self, BridgeError> {
        let reserved = config.parse_reserved_memory()?;
        let registry = PipelineRegistry::new(config.pipeline_dir.clone());
        Ok(Self {
            backend,
            config,
            reserved,
            registry,
            residency: ResidencyTracker::new(),
            locks: ModelLockSet::new(),
            context: InvocationContext::new(),
            activity: Mutex::new(Activity {
                active: 0,
                last_exit: None,
            }),
            gc_timer: Mutex::new(Instant::now()),
        })
    }

    /// Loads every pipeline file from the configured directory, returning
    /// the number loaded. Call once before sharing the bridge.
    pub fn load_all_pipelines(&mut self) -> usize {
        self.registry.load_all()
    }

    /// The loaded pipeline registry.
    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// The residency tracker for this engine.
    pub fn residency(&self) -> &ResidencyTracker {
        &self.residency
    }

    // ── Running pipelines ──────────────────────────────────────

    /// Runs a pipeline and returns its output images.
    ///
    /// Returns `Ok(None)` when the pipeline name is unknown or the run
    /// produced no images; engine failures propagate as errors. Blocks
    /// until the engine call returns.
    pub fn run(
        &self,
        pipeline: impl Into<PipelineInput>,
        params: &ParamMap,
    ) -> Result<Option<Vec<OutputImage>>, BridgeError> {
        let mut graph = match pipeline.into() {
            PipelineInput::Name(name) => match self.registry.get(&name) {
                Some(graph) => graph,
                None => {
                    tracing::error!("unknown inference pipeline: {name}");
                    return Ok(None);
                }
            },
            PipelineInput::Graph(graph) => graph,
        };

        self.note_entry();
        let result = self.run_graph(&mut graph, params);
        self.note_exit();
        result
    }

    fn run_graph(
        &self,
        graph: &mut NodeGraph,
        params: &ParamMap,
    ) -> Result<Option<Vec<OutputImage>>, BridgeError> {
        // Push current settings down to the engine first; they may have
        // changed between runs.
        self.backend.set_reserved_memory(self.reserved.as_bytes());
        self.backend
            .set_batch_optimisations(self.config.batch_optimisations);

        inject(graph, params);

        let call_id = uuid::Uuid::new_v4().to_string();
        let scope = self.context.begin_call(call_id.clone());

        let report = self.backend.validate_prompt(graph, true)?;
        if !report.valid {
            // The output list is still meaningful; execute regardless and
            // let the engine surface its own failure if there is one.
            tracing::warn!("prompt validation reported: {}", report.message);
        }
        self.backend
            .execute(graph, &call_id, &report.outputs, self)?;

        self.residency.cleanup(self.backend.as_ref());
        self.maybe_collect_garbage();

        Ok(scope.finish())
    }

    /// Forces a full collection pass at most once per configured interval.
    fn maybe_collect_garbage(&self) {
        let mut due = false;
        if let Ok(mut timer) = self.gc_timer.lock() {
            if timer.elapsed() >= Duration::from_secs(self.config.gc_interval_secs) {
                *timer = Instant::now();
                due = true;
            }
        }
        if due {
            tracing::debug!("forcing full garbage collection");
            self.backend.collect_garbage();
        }
    }

    fn note_entry(&self) {
        if let Ok(mut activity) = self.activity.lock() {
            if activity.active == 0 {
                if let Some(exit) = activity.last_exit {
                    let idle = exit.elapsed().as_secs_f64();
                    if self.config.idle_warning && idle > self.config.idle_warning_secs {
                        tracing::warn!("no job ran for {idle:.3} seconds");
                    }
                }
            }
            activity.active += 1;
        }
    }

    fn note_exit(&self) {
        if let Ok(mut activity) = self.activity.lock() {
            activity.active = activity.active.saturating_sub(1);
            activity.last_exit = Some(Instant::now());
        }
    }

    // ── Model locks ────────────────────────────────────────────

    /// Checks out the given models for exclusive use. All-or-nothing:
    /// `false` means at least one was already checked out and none were
    /// newly locked.
    pub fn lock_models(&self, names: &[String]) -> bool {
        self.locks.lock(names)
    }

    /// Returns checked-out models. Absent names are ignored.
    pub fn unlock_models(&self, names: &[String]) {
        self.locks.unlock(names)
    }

    /// Scoped variant of [`lock_models`](Self::lock_models); the guard
    /// unlocks on drop.
    pub fn try_lock_models<'a>(&'a self, names: &[String]) -> Option<ModelLockGuard<'a>> {
        self.locks.try_lock_scoped(names)
    }

    // ── Residency forwarding ───────────────────────────────────

    /// Queues a model's resources for eviction from accelerator memory.
    pub fn request_eviction(&self, name: &str, bundle: ModelBundle) {
        self.residency.request_eviction(name, bundle);
    }

    /// Runs a cleanup pass immediately; see
    /// [`ResidencyTracker::cleanup`].
    pub fn cleanup_now(&self) -> usize {
        self.residency.cleanup(self.backend.as_ref())
    }

    /// Preloads a model onto the accelerator when capacity allows.
    pub fn load_model_to_device(&self, model: &ModelHandle) -> bool {
        self.residency.load_to_device(self.backend.as_ref(), model)
    }

    // ── Engine queries & loaders ───────────────────────────────

    /// Free accelerator memory, in whole mebibytes.
    pub fn free_vram_mb(&self) -> u64 {
        (self.backend.free_memory_bytes() as f64 / (1024.0 * 1024.0)).round() as u64
    }

    /// Identifier of the engine's active device.
    pub fn current_device(&self) -> String {
        self.backend.current_device()
    }

    /// Loads a checkpoint through the engine. Failures propagate
    /// unmodified — bad file and exhausted memory are indistinguishable
    /// from here.
    pub fn load_checkpoint(
        &self,
        path: &Path,
        options: &CheckpointOptions,
    ) -> Result<ModelBundle, BridgeError> {
        Ok(self.backend.load_checkpoint(path, options)?)
    }

    /// Loads a controlnet conditioned on an already-loaded model.
    pub fn load_controlnet(
        &self,
        path: &Path,
        target: &ModelHandle,
    ) -> Result<ModelHandle, BridgeError> {
        Ok(self.backend.load_controlnet(path, target)?)
    }
}

impl EventSink for GraphBridge {
    /// Callback entry point for engine events.
    ///
    /// The only payload this layer interprets is finished output images,
    /// which are buffered for the calling thread; everything else is
    /// logged at debug level.
    fn on_event(&self, label: &str, payload: &EventPayload, call_id: &str) {
        if let Some(output) = &payload.output {
            tracing::debug!("received {} output image(s) from engine", output.images.len());
            self.context.store_images(output.images.clone());
        } else {
            tracing::debug!("engine event {label} for call {call_id}");
        }
    }
}

impl std::fmt::Debug for GraphBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBridge")
            .field("pipelines", &self.registry.len())
            .field("pending_evictions", &self.residency.pending_len())
            .field("reserved", &self.reserved)
            .finish()
    }
}
