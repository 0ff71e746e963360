// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The asynchronous event channel from the engine back to the caller.
//!
//! The engine delivers execution progress and finished outputs by invoking
//! an [`EventSink`] it was handed at execute time. The only payload this
//! layer interprets is `output.images`; everything else is logged and
//! dropped by the sink implementation.

use serde::{Deserialize, Serialize};

/// Encoded image format of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Png => f.write_str("PNG"),
            ImageFormat::Jpeg => f.write_str("JPEG"),
            ImageFormat::Webp => f.write_str("WEBP"),
        }
    }
}

/// A finished output image: encoded bytes plus their format.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputImage {
    /// Encoded image bytes.
    pub data: Vec<u8>,
    /// Encoding of `data`.
    pub format: ImageFormat,
}

/// The `output` block of an event payload.
#[derive(Debug, Clone, Default)]
pub struct EventOutput {
    /// Finished images, in generation order.
    pub images: Vec<OutputImage>,
}

/// Payload of a single engine event.
#[derive(Debug, Clone, Default)]
pub struct EventPayload {
    /// Present when the event carries finished outputs.
    pub output: Option<EventOutput>,
    /// Uninterpreted remainder (progress counters, node ids, ...).
    pub detail: Option<serde_json::Value>,
}

impl EventPayload {
    /// A payload carrying finished images.
    pub fn images(images: Vec<OutputImage>) -> Self {
        Self {
            output: Some(EventOutput { images }),
            detail: None,
        }
    }

    /// A payload carrying only uninterpreted detail.
    pub fn detail(detail: serde_json::Value) -> Self {
        Self {
            output: None,
            detail: Some(detail),
        }
    }
}

/// Receiver for engine events, implemented by the bridge.
///
/// `call_id` echoes the id passed to `execute`, correlating events with
/// the invocation that triggered them.
pub trait EventSink: Send + Sync {
    fn on_event(&self, label: &str, payload: &EventPayload, call_id: &str);
}
