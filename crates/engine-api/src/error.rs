// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error type for engine calls.

/// Errors surfaced by the wrapped inference engine.
///
/// This layer does not interpret engine-internal failures; the variants
/// only say which call failed so the bridge can propagate them unmodified.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Prompt validation could not run (distinct from a prompt being
    /// reported invalid, which is a [`ValidationReport`](crate::ValidationReport)).
    #[error("prompt validation failed: {0}")]
    Validation(String),

    /// Graph execution failed inside the engine.
    #[error("pipeline execution failed: {0}")]
    Execution(String),

    /// A checkpoint or auxiliary model failed to load. Hard to tell why
    /// from outside — bad file, not enough memory.
    #[error("model load failed for '{name}': {detail}")]
    ModelLoad { name: String, detail: String },
}
