// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-thread invocation state.
//!
//! Worker threads call into the bridge concurrently, and the engine hands
//! results back through a shared callback, so each thread needs its own
//! slot for the outgoing call id and the incoming images. This is a pair
//! of maps keyed by [`ThreadId`] behind one mutex rather than true
//! thread-local storage: the engine callback and the orchestrator must
//! both reach the *calling* thread's slot, and both already run on it.
//!
//! Reading images is destructive (one read consumes the slot), so a
//! stale result can never leak into an unrelated later run on a reused
//! worker thread. [`CallScope`] pairs the call-id write with that
//! destructive read and clears the slots on drop, including when a run
//! errors out between the two.

use engine_api::OutputImage;
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct SessionState {
    /// Outgoing call id per thread.
    call_ids: HashMap<ThreadId, String>,
    /// Incoming result buffer per thread.
    images: HashMap<ThreadId, Vec<OutputImage>>,
}

/// Shared per-thread slots for call ids and results.
#[derive(Debug, Default)]
pub struct InvocationContext {
    state: Mutex<SessionState>,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the calling thread's current call id.
    pub fn set_call_id(&self, call_id: String) {
        if let Ok(mut state) = self.state.lock() {
            state.call_ids.insert(thread::current().id(), call_id);
        }
    }

    /// The calling thread's current call id, if one is set.
    pub fn call_id(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.call_ids.get(&thread::current().id()).cloned())
    }

    /// Stores result images for the calling thread, replacing any
    /// unconsumed previous result.
    pub fn store_images(&self, images: Vec<OutputImage>) {
        if let Ok(mut state) = self.state.lock() {
            state.images.insert(thread::current().id(), images);
        }
    }

    /// Consumes the calling thread's result buffer. Destructive: a second
    /// read returns `None` until something is stored again.
    pub fn take_images(&self) -> Option<Vec<OutputImage>> {
        self.state
            .lock()
            .ok()
            .and_then(|mut state| state.images.remove(&thread::current().id()))
    }

    /// Opens a call scope for the calling thread: records the call id now,
    /// clears both slots when the scope ends. Any result still buffered
    /// from outside a scope is discarded so this call can only ever
    /// observe its own output.
    pub fn begin_call(&self, call_id: String) -> CallScope<'_> {
        if let Ok(mut state) = self.state.lock() {
            let tid = thread::current().id();
            state.call_ids.insert(tid, call_id);
            state.images.remove(&tid);
        }
        CallScope { context: self }
    }

    /// Removes both of the calling thread's slots.
    fn clear_current_thread(&self) {
        if let Ok(mut state) = self.state.lock() {
            let tid = thread::current().id();
            state.call_ids.remove(&tid);
            state.images.remove(&tid);
        }
    }
}

/// Scope of one invocation on the calling thread.
///
/// Guarantees the destructive result read pairs with the call-id write:
/// either [`finish`](CallScope::finish) consumes the result, or dropping
/// the scope (e.g. on an execution error) discards it so the next run on
/// this thread starts clean.
#[derive(Debug)]
pub struct CallScope<'a> {
    context: &'a InvocationContext,
}

impl CallScope<'_> {
    /// Consumes the calling thread's result buffer, ending the scope.
    pub fn finish(self) -> Option<Vec<OutputImage>> {
        self.context.take_images()
        // Drop clears the call id.
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.context.clear_current_thread();
    }
}
