// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Opaque model handles and resource bundles.
//!
//! The engine owns the actual weights; this layer only ever holds cheap
//! tokens it can pass back into engine calls. Dropping a handle releases
//! nothing on the device — unloading is an explicit engine call made by
//! the residency tracker.

use std::path::PathBuf;
use std::sync::Arc;

/// A cheap, cloneable token identifying a model resource inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelHandle(Arc<str>);

impl ModelHandle {
    /// Wraps an engine-issued identifier.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// The engine-side identifier.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The resource bundle returned by a checkpoint load: the diffusion model
/// plus its companion encoders, any of which the checkpoint may omit.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    /// The main diffusion model.
    pub model: ModelHandle,
    /// Text encoder, when the checkpoint provides one.
    pub clip: Option<ModelHandle>,
    /// Image decoder, when the checkpoint provides one.
    pub vae: Option<ModelHandle>,
    /// Vision encoder for image-conditioned pipelines.
    pub vision: Option<ModelHandle>,
}

impl ModelBundle {
    /// A bundle holding only the main model.
    pub fn model_only(model: ModelHandle) -> Self {
        Self {
            model,
            clip: None,
            vae: None,
            vision: None,
        }
    }
}

/// Options for a checkpoint load.
#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    /// Whether to materialise the image decoder.
    pub output_vae: bool,
    /// Whether to materialise the text encoder.
    pub output_clip: bool,
    /// Directory of textual-inversion embeddings to make visible to the
    /// text encoder.
    pub embeddings_dir: Option<PathBuf>,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self {
            output_vae: true,
            output_clip: true,
            embeddings_dir: None,
        }
    }
}
