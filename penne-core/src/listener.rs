// Copyright 2025 Penne Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Listener contract for typed change feed events.
//!
//! A [`ChangeFeedListener`] receives one callback per event, in the order the
//! feed produced them, from the worker's background task. Callbacks never
//! overlap for a given worker.
//!
//! # Example
//!
//! ```rust
//! use penne_core::listener::ChangeFeedListener;
//!
//! #[derive(Default)]
//! struct Counter {
//!     inserted: usize,
//!     removed: usize,
//! }
//!
//! impl ChangeFeedListener<String> for Counter {
//!     fn on_initializing_state(&mut self) {}
//!     fn on_ready_state(&mut self) {}
//!     fn on_initial(&mut self, _value: String) {}
//!     fn on_add(&mut self, _value: String) {
//!         self.inserted += 1;
//!     }
//!     fn on_change(&mut self, _old: String, _new: String) {}
//!     fn on_remove(&mut self, _value: String) {
//!         self.removed += 1;
//!     }
//! }
//! ```

use crate::mapper::MappingError;

/// Callbacks invoked by a change feed worker.
///
/// Implementations run on the worker's task and should return quickly; a slow
/// callback stalls consumption of the feed.
pub trait ChangeFeedListener<T>: Send + 'static {
    /// The feed is loading initial values.
    fn on_initializing_state(&mut self);

    /// Initial values have been delivered; changes follow.
    fn on_ready_state(&mut self);

    /// A value that existed when the feed was opened.
    fn on_initial(&mut self, value: T);

    /// A value was inserted.
    fn on_add(&mut self, value: T);

    /// A value was modified.
    fn on_change(&mut self, old_value: T, new_value: T);

    /// A value was deleted.
    fn on_remove(&mut self, value: T);

    /// A record could not be mapped and was dropped.
    ///
    /// The worker has already logged and counted the failure.
    fn on_error(&mut self, error: &MappingError) {
        let _ = error;
    }
}
