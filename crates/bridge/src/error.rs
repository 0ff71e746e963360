// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the worker bridge.

/// Errors surfaced to the worker process.
///
/// Engine failures pass through unmodified — this layer never interprets
/// them. Configuration and pipeline-file problems that can be degraded
/// (skip a file, return no result) are logged instead of raised and do
/// not appear here.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The wrapped engine reported a failure.
    #[error("engine error: {0}")]
    Engine(#[from] engine_api::EngineError),

    /// A pipeline graph could not be loaded or rewritten.
    #[error("pipeline error: {0}")]
    Graph(#[from] pipeline_graph::GraphError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
