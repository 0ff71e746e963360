// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Deferred eviction of models from accelerator memory.
//!
//! A model goes through three states:
//!
//! ```text
//! Resident ──request_eviction()──► PendingEviction ──cleanup()──► Evicted
//!                                        │   ▲
//!                                        └───┘  still in use: skipped
//! ```
//!
//! `Resident` and `Evicted` are implicit; the tracker only stores the
//! pending set. Eviction is deferred because a model may be mid-sample on
//! another worker thread when its eviction is requested; the engine's own
//! in-use query is authoritative, and a pending entry simply survives
//! every cleanup pass until that query clears.
//!
//! Cleanup itself only runs when the engine's sampler mutex can be taken
//! without blocking. Under sustained sampling load that probe can fail
//! every time and pending models then accumulate — a deliberate policy
//! (blocking here deadlocks against the sampler), but worth monitoring on
//! busy workers.

use engine_api::{InferenceBackend, ModelBundle, ModelHandle};
use std::collections::HashMap;
use std::sync::Mutex;

/// Tracks models awaiting eviction from accelerator memory.
///
/// Explicitly constructed and owned by the bridge; create one per engine.
/// All methods take `&self` and are safe to call from any worker thread.
#[derive(Debug, Default)]
pub struct ResidencyTracker {
    /// Model name → resource bundle awaiting release.
    pending: Mutex<HashMap<String, ModelBundle>>,
}

impl ResidencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a model for eviction. No-op when the model is already
    /// queued; the bundle is held until a cleanup pass releases it.
    pub fn request_eviction(&self, name: &str, bundle: ModelBundle) {
        tracing::debug!("received request to unload {name}");
        if let Ok(mut pending) = self.pending.lock() {
            if !pending.contains_key(name) {
                tracing::debug!("model {name} queued for device unload");
                pending.insert(name.to_string(), bundle);
            }
        }
    }

    /// Number of models awaiting eviction.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Whether the named model is queued for eviction.
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending
            .lock()
            .map(|p| p.contains_key(name))
            .unwrap_or(false)
    }

    /// Attempts to evict every pending model that is no longer in use.
    ///
    /// Returns the number of models evicted. Returns immediately with 0
    /// when the engine's sampler mutex is contended — another cleanup or
    /// an active sampling pass owns it, and we never block on it. Models
    /// the engine reports in use stay pending for a later pass.
    pub fn cleanup(&self, backend: &dyn InferenceBackend) -> usize {
        let Ok(_sampler) = backend.sampler_mutex().try_lock() else {
            return 0;
        };

        // Snapshot the candidates so the pending lock is not held across
        // engine calls.
        let candidates: Vec<(String, ModelHandle)> = match self.pending.lock() {
            Ok(pending) => pending
                .iter()
                .map(|(name, bundle)| (name.clone(), bundle.model.clone()))
                .collect(),
            Err(_) => return 0,
        };

        let mut evicted = 0;
        for (name, model) in candidates {
            if backend.is_model_in_use(&model) {
                // Mid-sample on another thread; nothing we can do.
                continue;
            }

            tracing::debug!("unloading {name} from device");
            backend.unload_model(&model);

            // Dropping the bundle releases our handles on the companion
            // resources as well.
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&name);
            }
            backend.collect_garbage();
            evicted += 1;
            tracing::debug!("removal of model {name} completed");
        }
        evicted
    }

    /// Loads a model's weights onto the accelerator ahead of use.
    ///
    /// Skipped (returning `false`) when the device reports no free
    /// capacity; running without the preload is always preferable to
    /// forcing an over-allocation.
    pub fn load_to_device(&self, backend: &dyn InferenceBackend, model: &ModelHandle) -> bool {
        if !backend.has_free_capacity() {
            tracing::debug!("skipping device load of {model}: no free capacity");
            return false;
        }
        backend.load_model(model);
        true
    }
}
