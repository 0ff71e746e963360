// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The advisory model lock set.
//!
//! Pipelines check out the models they are about to use so two jobs never
//! sample the same checkpoint concurrently. The set is advisory: nothing
//! stops a caller bypassing it, the contract is scoped acquisition around
//! model use. Prefer [`ModelLockSet::try_lock_scoped`], whose guard
//! releases on drop; the raw `lock`/`unlock` pair exists for callers whose
//! acquisition and release sites live in different scopes.

use std::collections::HashSet;
use std::sync::Mutex;

/// Set of model names currently checked out for exclusive use.
///
/// Membership is the only state — no reference counting, no expiry.
#[derive(Debug, Default)]
pub struct ModelLockSet {
    locked: Mutex<HashSet<String>>,
}

impl ModelLockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every name, or none of them.
    ///
    /// Returns `false` without changing the set when any requested name is
    /// already locked.
    pub fn lock(&self, names: &[String]) -> bool {
        let Ok(mut locked) = self.locked.lock() else {
            return false;
        };
        if names.iter().any(|name| locked.contains(name)) {
            return false;
        }
        for name in names {
            locked.insert(name.clone());
        }
        true
    }

    /// Unlocks every present name; absent names are ignored. Never fails.
    pub fn unlock(&self, names: &[String]) {
        if let Ok(mut locked) = self.locked.lock() {
            for name in names {
                locked.remove(name);
            }
        }
    }

    /// Whether the named model is currently locked.
    pub fn is_locked(&self, name: &str) -> bool {
        self.locked
            .lock()
            .map(|locked| locked.contains(name))
            .unwrap_or(false)
    }

    /// Number of locked models.
    pub fn len(&self) -> usize {
        self.locked.lock().map(|locked| locked.len()).unwrap_or(0)
    }

    /// True when nothing is locked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All-or-nothing acquisition with release on drop.
    pub fn try_lock_scoped<'a>(&'a self, names: &[String]) -> Option<ModelLockGuard<'a>> {
        if self.lock(names) {
            Some(ModelLockGuard {
                set: self,
                names: names.to_vec(),
            })
        } else {
            None
        }
    }
}

/// RAII guard over a set of locked model names.
///
/// Dropping the guard unlocks every name it holds.
#[derive(Debug)]
pub struct ModelLockGuard<'a> {
    set: &'a ModelLockSet,
    names: Vec<String>,
}

impl ModelLockGuard<'_> {
    /// The names this guard holds locked.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Drop for ModelLockGuard<'_> {
    fn drop(&mut self) {
        self.set.unlock(&self.names);
    }
}
