// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for pipeline loading and patching.

use std::path::PathBuf;

/// Errors that can occur when loading or rewriting pipeline graphs.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A pipeline or design file could not be read.
    #[error("failed to read pipeline file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The file content is not the expected JSON shape.
    #[error("failed to parse pipeline file: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The filename does not follow the `pipeline_<name>.json` convention.
    #[error("pipeline filename does not embed a pipeline name: '{path}'")]
    BadFilename { path: PathBuf },

    /// A design document assigned the same title to two nodes; renaming
    /// would merge them and corrupt the graph's edges.
    #[error("design title '{title}' is used by more than one node")]
    DuplicateTitle { title: String },
}
