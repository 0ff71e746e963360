// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: the full worker path against a scripted engine.
//!
//! These exercise the flow from pipeline files on disk → registry →
//! parameter injection → engine execution → callback delivery → result
//! retrieval, plus the residency and lock behavior the bridge forwards.

use bridge::{GraphBridge, WorkerConfig};
use engine_api::{
    CheckpointOptions, EngineError, EventPayload, EventSink, ImageFormat, InferenceBackend,
    ModelBundle, ModelHandle, OutputImage, ValidationReport,
};
use pipeline_graph::{InputValue, NodeGraph, ParamMap};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Scripted engine ────────────────────────────────────────────

/// One recorded `execute` call.
struct Execution {
    call_id: String,
    outputs: Vec<String>,
    graph: NodeGraph,
}

/// A scripted stand-in for the wrapped engine.
///
/// Emits one image per execution whose bytes are the JSON encoding of the
/// graph's `sampler.inputs.tag` value (when present), so tests can prove
/// which run produced which image.
#[derive(Default)]
struct MockEngine {
    sampler: Mutex<()>,
    in_use: Mutex<HashSet<String>>,
    full: AtomicBool,
    fail_execute: AtomicBool,
    invalid_prompt: AtomicBool,
    reserved: AtomicU64,
    gc_passes: AtomicUsize,
    unloaded: Mutex<Vec<String>>,
    executions: Mutex<Vec<Execution>>,
}

impl MockEngine {
    fn executions(&self) -> std::sync::MutexGuard<'_, Vec<Execution>> {
        self.executions.lock().unwrap()
    }

    fn set_in_use(&self, id: &str, in_use: bool) {
        let mut set = self.in_use.lock().unwrap();
        if in_use {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }
}

impl InferenceBackend for MockEngine {
    fn validate_prompt(
        &self,
        graph: &NodeGraph,
        _strict: bool,
    ) -> Result<ValidationReport, EngineError> {
        let outputs: Vec<String> = graph
            .iter()
            .filter(|(_, node)| node.class_type.contains("Output"))
            .map(|(id, _)| id.clone())
            .collect();
        if self.invalid_prompt.load(Ordering::Relaxed) {
            Ok(ValidationReport {
                valid: false,
                message: "scripted validation problem".into(),
                outputs,
            })
        } else {
            Ok(ValidationReport {
                valid: true,
                message: String::new(),
                outputs,
            })
        }
    }

    fn execute(
        &self,
        graph: &NodeGraph,
        call_id: &str,
        outputs: &[String],
        sink: &dyn EventSink,
    ) -> Result<(), EngineError> {
        self.executions.lock().unwrap().push(Execution {
            call_id: call_id.to_string(),
            outputs: outputs.to_vec(),
            graph: graph.clone(),
        });

        if self.fail_execute.load(Ordering::Relaxed) {
            return Err(EngineError::Execution("scripted failure".into()));
        }

        let data = graph
            .get("sampler")
            .and_then(|node| node.inputs.get("tag"))
            .and_then(|input| match input {
                InputValue::Literal(value) => serde_json::to_vec(value).ok(),
                InputValue::Link(_) => None,
            })
            .unwrap_or_else(|| b"image".to_vec());

        sink.on_event(
            "executed",
            &EventPayload::images(vec![OutputImage {
                data,
                format: ImageFormat::Png,
            }]),
            call_id,
        );
        Ok(())
    }

    fn free_memory_bytes(&self) -> u64 {
        6 * 1024 * 1024 * 1024
    }

    fn current_device(&self) -> String {
        "mock:0".into()
    }

    fn has_free_capacity(&self) -> bool {
        !self.full.load(Ordering::Relaxed)
    }

    fn load_model(&self, _model: &ModelHandle) {}

    fn unload_model(&self, model: &ModelHandle) {
        self.unloaded.lock().unwrap().push(model.id().to_string());
    }

    fn is_model_in_use(&self, model: &ModelHandle) -> bool {
        self.in_use.lock().unwrap().contains(model.id())
    }

    fn load_checkpoint(
        &self,
        path: &Path,
        _options: &CheckpointOptions,
    ) -> Result<ModelBundle, EngineError> {
        Err(EngineError::ModelLoad {
            name: path.display().to_string(),
            detail: "scripted load failure".into(),
        })
    }

    fn load_controlnet(
        &self,
        _path: &Path,
        target: &ModelHandle,
    ) -> Result<ModelHandle, EngineError> {
        Ok(ModelHandle::new(format!("controlnet-for-{}", target.id())))
    }

    fn set_reserved_memory(&self, bytes: u64) {
        self.reserved.store(bytes, Ordering::Relaxed);
    }

    fn set_batch_optimisations(&self, _enabled: bool) {}

    fn collect_garbage(&self) {
        self.gc_passes.fetch_add(1, Ordering::Relaxed);
    }

    fn sampler_mutex(&self) -> &Mutex<()> {
        &self.sampler
    }
}

// ── Fixtures ───────────────────────────────────────────────────

const TXT2IMG: &str = r#"{
    "3": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": "x.safetensors" } },
    "sampler": { "class_type": "KSampler", "inputs": { "model": ["3", 0], "steps": 20 } },
    "9": { "class_type": "SaveImage", "inputs": { "images": ["sampler", 0] } }
}"#;

const TXT2IMG_DESIGN: &str = r#"{ "nodes": [
    { "id": "3", "title": "loader" },
    { "id": "9", "title": "output_image" }
] }"#;

/// Writes the pipeline tree and returns `(tempdir, config)`.
fn fixture_tree() -> (tempfile::TempDir, WorkerConfig) {
    let root = tempfile::tempdir().unwrap();
    let pipelines = root.path().join("pipelines");
    let designs = root.path().join("pipeline_designs");
    std::fs::create_dir(&pipelines).unwrap();
    std::fs::create_dir(&designs).unwrap();
    std::fs::write(pipelines.join("pipeline_txt2img.json"), TXT2IMG).unwrap();
    std::fs::write(designs.join("pipeline_txt2img.json"), TXT2IMG_DESIGN).unwrap();

    let config = WorkerConfig {
        pipeline_dir: pipelines,
        reserved_memory: "512M".into(),
        ..Default::default()
    };
    (root, config)
}

fn build_bridge(config: WorkerConfig) -> (Arc<MockEngine>, GraphBridge) {
    let engine = Arc::new(MockEngine::default());
    let mut bridge = GraphBridge::new(engine.clone(), config).unwrap();
    assert_eq!(bridge.load_all_pipelines(), 1);
    (engine, bridge)
}

fn params(pairs: &[(&str, serde_json::Value)]) -> ParamMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ── Run path ───────────────────────────────────────────────────

#[test]
fn test_end_to_end_run() {
    let (_root, config) = fixture_tree();
    let (engine, bridge) = build_bridge(config);

    let images = bridge
        .run("txt2img", &params(&[("sampler.steps", json!(35))]))
        .unwrap()
        .expect("run should produce images");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].format, ImageFormat::Png);

    let executions = engine.executions();
    assert_eq!(executions.len(), 1);
    let execution = &executions[0];

    // The engine saw the patched, injected graph...
    let loader = execution.graph.get("loader").unwrap();
    assert_eq!(loader.class_type, "HordeCheckpointLoader");
    assert_eq!(
        loader.inputs.get("model_name"),
        Some(&InputValue::Literal(json!("x.safetensors")))
    );
    assert_eq!(
        execution.graph.get("sampler").unwrap().inputs.get("steps"),
        Some(&InputValue::Literal(json!(35)))
    );
    // ...was told which output nodes to produce...
    assert_eq!(execution.outputs, vec!["output_image".to_string()]);
    // ...and got a fresh correlation id.
    assert!(!execution.call_id.is_empty());

    // Settings were pushed down before execution.
    assert_eq!(engine.reserved.load(Ordering::Relaxed), 512 * 1024 * 1024);
}

#[test]
fn test_unknown_pipeline_returns_none() {
    let (_root, config) = fixture_tree();
    let (engine, bridge) = build_bridge(config);

    let result = bridge.run("does_not_exist", &ParamMap::new()).unwrap();
    assert!(result.is_none());
    assert!(engine.executions().is_empty());
}

#[test]
fn test_prebuilt_graph_bypasses_registry() {
    let (_root, config) = fixture_tree();
    let (engine, bridge) = build_bridge(config);

    let graph = NodeGraph::from_json(TXT2IMG).unwrap();
    let images = bridge.run(graph, &ParamMap::new()).unwrap();
    assert!(images.is_some());

    // A pre-built graph is run as given — no patching.
    let executions = engine.executions();
    assert_eq!(executions[0].graph.get("3").unwrap().class_type, "CheckpointLoaderSimple");
}

#[test]
fn test_each_run_gets_a_fresh_call_id_and_copy() {
    let (_root, config) = fixture_tree();
    let (engine, bridge) = build_bridge(config);

    bridge
        .run("txt2img", &params(&[("sampler.steps", json!(10))]))
        .unwrap();
    bridge.run("txt2img", &ParamMap::new()).unwrap();

    let executions = engine.executions();
    assert_ne!(executions[0].call_id, executions[1].call_id);
    // The first run's injection never leaked into the second's copy.
    assert_eq!(
        executions[1].graph.get("sampler").unwrap().inputs.get("steps"),
        Some(&InputValue::Literal(json!(20)))
    );
}

#[test]
fn test_invalid_prompt_still_executes() {
    let (_root, config) = fixture_tree();
    let (engine, bridge) = build_bridge(config);
    engine.invalid_prompt.store(true, Ordering::Relaxed);

    let images = bridge.run("txt2img", &ParamMap::new()).unwrap();
    assert!(images.is_some());
    assert_eq!(engine.executions().len(), 1);
}

#[test]
fn test_execution_failure_propagates_and_leaves_no_stale_result() {
    let (_root, config) = fixture_tree();
    let (engine, bridge) = build_bridge(config);

    engine.fail_execute.store(true, Ordering::Relaxed);
    let err = bridge.run("txt2img", &ParamMap::new()).unwrap_err();
    assert!(err.to_string().contains("scripted failure"));

    // The failed run must not leave anything for the next run on this
    // thread to pick up.
    engine.fail_execute.store(false, Ordering::Relaxed);
    let images = bridge
        .run("txt2img", &params(&[("sampler.tag", json!("second"))]))
        .unwrap()
        .unwrap();
    assert_eq!(images[0].data, serde_json::to_vec(&json!("second")).unwrap());
}

#[test]
fn test_on_event_entry_point() {
    let (_root, config) = fixture_tree();
    let (_engine, bridge) = build_bridge(config);

    // A non-output event is logged and dropped.
    bridge.on_event("progress", &EventPayload::detail(json!({ "step": 1 })), "call-x");

    // An output event arriving outside any run buffers images, but the
    // next run must only ever see its own output.
    bridge.on_event(
        "executed",
        &EventPayload::images(vec![OutputImage {
            data: b"stray".to_vec(),
            format: ImageFormat::Png,
        }]),
        "call-x",
    );
    let images = bridge
        .run("txt2img", &params(&[("sampler.tag", json!("own"))]))
        .unwrap()
        .unwrap();
    assert_eq!(images[0].data, serde_json::to_vec(&json!("own")).unwrap());
}

#[test]
fn test_concurrent_runs_do_not_cross_contaminate() {
    let (_root, config) = fixture_tree();
    let (_engine, bridge) = build_bridge(config);
    let bridge = Arc::new(bridge);

    let mut handles = Vec::new();
    for i in 0..8 {
        let bridge = Arc::clone(&bridge);
        handles.push(std::thread::spawn(move || {
            let tag = format!("thread-{i}");
            let images = bridge
                .run("txt2img", &params(&[("sampler.tag", json!(tag.clone()))]))
                .unwrap()
                .expect("every thread should get images");
            // Each thread must receive exactly the image its own run
            // produced.
            assert_eq!(images[0].data, serde_json::to_vec(&json!(tag)).unwrap());
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

// ── Garbage collection pacing ──────────────────────────────────

#[test]
fn test_gc_forced_when_interval_elapsed() {
    let (_root, mut config) = fixture_tree();
    config.gc_interval_secs = 0; // Always due.
    let (engine, bridge) = build_bridge(config);

    bridge.run("txt2img", &ParamMap::new()).unwrap();
    bridge.run("txt2img", &ParamMap::new()).unwrap();
    assert_eq!(engine.gc_passes.load(Ordering::Relaxed), 2);
}

#[test]
fn test_gc_skipped_inside_interval() {
    let (_root, config) = fixture_tree(); // Default 30 s interval.
    let (engine, bridge) = build_bridge(config);

    bridge.run("txt2img", &ParamMap::new()).unwrap();
    assert_eq!(engine.gc_passes.load(Ordering::Relaxed), 0);
}

// ── Model locks through the bridge ─────────────────────────────

#[test]
fn test_lock_models_all_or_nothing() {
    let (_root, config) = fixture_tree();
    let (_engine, bridge) = build_bridge(config);

    assert!(bridge.lock_models(&names(&["A", "B"])));
    assert!(!bridge.lock_models(&names(&["B", "C"])));

    // The failed request locked nothing: "C" is still available.
    assert!(bridge.lock_models(&names(&["C"])));
    bridge.unlock_models(&names(&["A", "B", "C"]));
    assert!(bridge.lock_models(&names(&["B"])));
}

#[test]
fn test_scoped_lock_releases() {
    let (_root, config) = fixture_tree();
    let (_engine, bridge) = build_bridge(config);

    {
        let _guard = bridge.try_lock_models(&names(&["m"])).unwrap();
        assert!(bridge.try_lock_models(&names(&["m"])).is_none());
    }
    assert!(bridge.try_lock_models(&names(&["m"])).is_some());
}

// ── Residency through the bridge ───────────────────────────────

#[test]
fn test_in_use_model_survives_runs_until_released() {
    let (_root, config) = fixture_tree();
    let (engine, bridge) = build_bridge(config);

    engine.set_in_use("deliberate", true);
    bridge.request_eviction(
        "deliberate",
        ModelBundle::model_only(ModelHandle::new("deliberate")),
    );

    // Every run triggers a cleanup pass; the in-use model must survive.
    for _ in 0..3 {
        bridge.run("txt2img", &ParamMap::new()).unwrap();
        assert!(bridge.residency().is_pending("deliberate"));
    }
    assert!(engine.unloaded.lock().unwrap().is_empty());

    engine.set_in_use("deliberate", false);
    bridge.run("txt2img", &ParamMap::new()).unwrap();
    assert!(!bridge.residency().is_pending("deliberate"));
    assert_eq!(*engine.unloaded.lock().unwrap(), vec!["deliberate"]);
}

#[test]
fn test_cleanup_now_skips_under_sampler_contention() {
    let (_root, config) = fixture_tree();
    let (engine, bridge) = build_bridge(config);

    bridge.request_eviction("m", ModelBundle::model_only(ModelHandle::new("m")));
    let _sampling = engine.sampler.lock().unwrap();
    assert_eq!(bridge.cleanup_now(), 0);
    assert!(bridge.residency().is_pending("m"));
}

#[test]
fn test_load_model_to_device_capacity_gate() {
    let (_root, config) = fixture_tree();
    let (engine, bridge) = build_bridge(config);
    let model = ModelHandle::new("m");

    assert!(bridge.load_model_to_device(&model));
    engine.full.store(true, Ordering::Relaxed);
    assert!(!bridge.load_model_to_device(&model));
}

// ── Engine queries & loaders ───────────────────────────────────

#[test]
fn test_free_vram_mb_rounds() {
    let (_root, config) = fixture_tree();
    let (_engine, bridge) = build_bridge(config);
    assert_eq!(bridge.free_vram_mb(), 6 * 1024);
    assert_eq!(bridge.current_device(), "mock:0");
}

#[test]
fn test_checkpoint_load_failure_propagates_unmodified() {
    let (_root, config) = fixture_tree();
    let (_engine, bridge) = build_bridge(config);

    let err = bridge
        .load_checkpoint(Path::new("/models/x.safetensors"), &CheckpointOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("scripted load failure"));
}

#[test]
fn test_controlnet_load() {
    let (_root, config) = fixture_tree();
    let (_engine, bridge) = build_bridge(config);

    let target = ModelHandle::new("base");
    let controlnet = bridge
        .load_controlnet(Path::new("/models/cn.safetensors"), &target)
        .unwrap();
    assert_eq!(controlnet.id(), "controlnet-for-base");
}
