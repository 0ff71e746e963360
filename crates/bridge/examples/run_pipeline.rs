// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: Drive a pipeline end-to-end against a scripted engine.
//!
//! Demonstrates the full worker path without a real engine or GPU: a
//! pipeline file and its design document are written to a temp directory,
//! loaded and patched by the registry, parameterised, executed, and the
//! "generated" image comes back through the engine callback.
//!
//! ```bash
//! cargo run -p bridge --example run_pipeline
//! ```

use bridge::{GraphBridge, WorkerConfig};
use engine_api::{
    CheckpointOptions, EngineError, EventPayload, EventSink, ImageFormat, InferenceBackend,
    ModelBundle, ModelHandle, OutputImage, ValidationReport,
};
use pipeline_graph::{NodeGraph, ParamMap};
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// An engine stand-in that "renders" one hardcoded PNG per execution.
struct DemoEngine {
    sampler: Mutex<()>,
}

impl InferenceBackend for DemoEngine {
    fn validate_prompt(
        &self,
        graph: &NodeGraph,
        _strict: bool,
    ) -> Result<ValidationReport, EngineError> {
        let outputs = graph
            .iter()
            .filter(|(_, node)| node.class_type.contains("Output"))
            .map(|(id, _)| id.clone())
            .collect();
        Ok(ValidationReport {
            valid: true,
            message: String::new(),
            outputs,
        })
    }

    fn execute(
        &self,
        _graph: &NodeGraph,
        call_id: &str,
        outputs: &[String],
        sink: &dyn EventSink,
    ) -> Result<(), EngineError> {
        tracing::info!("engine executing call {call_id} for outputs {outputs:?}");
        sink.on_event(
            "executed",
            &EventPayload::images(vec![OutputImage {
                data: b"\x89PNG...".to_vec(),
                format: ImageFormat::Png,
            }]),
            call_id,
        );
        Ok(())
    }

    fn free_memory_bytes(&self) -> u64 {
        8 * 1024 * 1024 * 1024
    }

    fn current_device(&self) -> String {
        "demo:0".into()
    }

    fn has_free_capacity(&self) -> bool {
        true
    }

    fn load_model(&self, _model: &ModelHandle) {}

    fn unload_model(&self, model: &ModelHandle) {
        tracing::info!("engine unloaded {model}");
    }

    fn is_model_in_use(&self, _model: &ModelHandle) -> bool {
        false
    }

    fn load_checkpoint(
        &self,
        path: &Path,
        _options: &CheckpointOptions,
    ) -> Result<ModelBundle, EngineError> {
        Ok(ModelBundle::model_only(ModelHandle::new(
            path.display().to_string(),
        )))
    }

    fn load_controlnet(
        &self,
        path: &Path,
        _target: &ModelHandle,
    ) -> Result<ModelHandle, EngineError> {
        Ok(ModelHandle::new(path.display().to_string()))
    }

    fn set_reserved_memory(&self, bytes: u64) {
        tracing::info!("engine reserving {bytes} bytes");
    }

    fn set_batch_optimisations(&self, enabled: bool) {
        tracing::info!("engine batch optimisations: {enabled}");
    }

    fn collect_garbage(&self) {}

    fn sampler_mutex(&self) -> &Mutex<()> {
        &self.sampler
    }
}

const PIPELINE: &str = r#"{
    "3": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": "deliberate.safetensors" } },
    "sampler": { "class_type": "KSampler", "inputs": { "model": ["3", 0], "steps": 20, "seed": 0 } },
    "9": { "class_type": "SaveImage", "inputs": { "images": ["sampler", 0] } }
}"#;

const DESIGN: &str = r#"{ "nodes": [
    { "id": "3", "title": "loader" },
    { "id": "9", "title": "output_image" }
] }"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("debug").init();

    // Lay out a pipeline tree in a temp directory.
    let root = tempfile::tempdir()?;
    let pipelines = root.path().join("pipelines");
    let designs = root.path().join("pipeline_designs");
    std::fs::create_dir(&pipelines)?;
    std::fs::create_dir(&designs)?;
    std::fs::write(pipelines.join("pipeline_txt2img.json"), PIPELINE)?;
    std::fs::write(designs.join("pipeline_txt2img.json"), DESIGN)?;

    let config = WorkerConfig {
        pipeline_dir: pipelines,
        reserved_memory: "1G".into(),
        ..Default::default()
    };

    let engine = Arc::new(DemoEngine {
        sampler: Mutex::new(()),
    });
    let mut bridge = GraphBridge::new(engine, config)?;
    let loaded = bridge.load_all_pipelines();
    println!("Loaded {loaded} pipeline(s) from disk\n");

    // Inspect the patched graph the registry serves.
    let graph = bridge.registry().get("txt2img").unwrap();
    println!("{graph}");

    // Run it with a couple of injected parameters.
    let mut params = ParamMap::new();
    params.insert("sampler.seed".into(), json!(1234));
    params.insert("sampler.steps".into(), json!(30));
    params.insert("loader.model_name".into(), json!("dreamshaper.safetensors"));

    match bridge.run("txt2img", &params)? {
        Some(images) => {
            for (i, image) in images.iter().enumerate() {
                println!("image {i}: {} bytes ({})", image.data.len(), image.format);
            }
        }
        None => println!("run produced no images"),
    }

    println!("free device memory: {} MB on {}", bridge.free_vram_mb(), bridge.current_device());
    Ok(())
}
