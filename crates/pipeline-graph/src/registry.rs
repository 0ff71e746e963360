// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The pipeline registry: loads every pipeline file from a directory at
//! startup, patches each one, and serves deep copies on read.
//!
//! # File layout
//! ```text
//! <root>/pipelines/pipeline_txt2img.json          ← graph definition
//! <root>/pipeline_designs/pipeline_txt2img.json   ← optional design file
//! ```
//!
//! The pipeline name is embedded in the filename (`pipeline_<name>.json`).
//! A design file with the same filename in the sibling `pipeline_designs`
//! directory supplies friendly node names; its absence only loses the
//! friendly names, never the pipeline.
//!
//! Loading is batch-tolerant: one unreadable or malformed file is logged
//! and skipped, the rest of the directory still loads.
//!
//! # Copy-on-read
//! [`PipelineRegistry::get`] clones the stored graph on every call. Runs of
//! the same named pipeline therefore never share mutable graph state, which
//! is this layer's primary defence against cross-request races.

use crate::{patch, DesignDocument, GraphError, NodeGraph};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const PIPELINE_PREFIX: &str = "pipeline_";
const PIPELINE_SUFFIX: &str = ".json";

/// Name of the sibling directory holding design files.
const DESIGN_DIR: &str = "pipeline_designs";

/// Loads and owns the patched pipeline graphs, keyed by name.
#[derive(Debug)]
pub struct PipelineRegistry {
    pipeline_dir: PathBuf,
    design_dir: PathBuf,
    pipelines: HashMap<String, NodeGraph>,
}

impl PipelineRegistry {
    /// Creates a registry over the given pipeline directory. Design files
    /// are looked up in a `pipeline_designs` directory next to it.
    pub fn new(pipeline_dir: impl Into<PathBuf>) -> Self {
        let pipeline_dir = pipeline_dir.into();
        let design_dir = pipeline_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DESIGN_DIR);
        Self {
            pipeline_dir,
            design_dir,
            pipelines: HashMap::new(),
        }
    }

    /// Overrides the design directory location.
    pub fn with_design_dir(mut self, design_dir: impl Into<PathBuf>) -> Self {
        self.design_dir = design_dir.into();
        self
    }

    /// Loads every `pipeline_*.json` in the pipeline directory.
    ///
    /// Returns the number of pipelines loaded. Files that fail to load are
    /// logged and skipped; an unreadable directory loads zero pipelines.
    pub fn load_all(&mut self) -> usize {
        let entries = match std::fs::read_dir(&self.pipeline_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(
                    "cannot read pipeline directory '{}': {e}",
                    self.pipeline_dir.display()
                );
                return 0;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| pipeline_name_from(path).is_some())
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match self.load_pipeline(&path) {
                Ok(name) => {
                    tracing::debug!("loaded inference pipeline: {name}");
                    loaded += 1;
                }
                Err(e) => {
                    tracing::error!("invalid inference pipeline file '{}': {e}", path.display());
                }
            }
        }
        loaded
    }

    /// Loads, patches, and stores a single pipeline file.
    fn load_pipeline(&mut self, path: &Path) -> Result<String, GraphError> {
        let name = pipeline_name_from(path).ok_or_else(|| GraphError::BadFilename {
            path: path.to_path_buf(),
        })?;

        let content = std::fs::read_to_string(path)?;
        let mut graph = NodeGraph::from_json(&content)?;

        let design = self.load_design(path)?;
        if design.is_some() {
            tracing::debug!("patching pipeline {name}");
        }
        patch(&mut graph, design.as_ref())?;

        self.pipelines.insert(name.clone(), graph);
        Ok(name)
    }

    /// Reads the design file sharing this pipeline's filename, if present.
    fn load_design(&self, pipeline_path: &Path) -> Result<Option<DesignDocument>, GraphError> {
        let Some(filename) = pipeline_path.file_name() else {
            return Ok(None);
        };
        let design_path = self.design_dir.join(filename);
        if !design_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&design_path)?;
        Ok(Some(DesignDocument::from_json(&content)?))
    }

    /// Returns an independent copy of the named pipeline, or `None` when
    /// the name is unknown.
    pub fn get(&self, name: &str) -> Option<NodeGraph> {
        let graph = self.pipelines.get(name).cloned();
        if graph.is_some() {
            tracing::info!("running pipeline {name}");
        }
        graph
    }

    /// Number of loaded pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// True when no pipelines are loaded.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Names of all loaded pipelines, unordered.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.pipelines.keys()
    }
}

/// Extracts the pipeline name from a `pipeline_<name>.json` path.
fn pipeline_name_from(path: &Path) -> Option<String> {
    let filename = path.file_name()?.to_str()?;
    let name = filename
        .strip_prefix(PIPELINE_PREFIX)?
        .strip_suffix(PIPELINE_SUFFIX)?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}
