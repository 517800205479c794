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

//! Metrics instrumentation for change feed workers.
//!
//! This module records worker activity through the `metrics` crate, which
//! supports multiple exporters (Prometheus, StatsD, etc.). Nothing is recorded
//! unless the application installs a recorder.
//!
//! # Naming Conventions
//!
//! All metrics follow Prometheus naming conventions:
//! - Prefix with application name (penne\_)
//! - Include unit suffix (\_seconds, \_total)
//! - Counter metrics end with \_total
//!
//! # Labels
//!
//! - **table**: Fully qualified table name (low cardinality)
//! - **kind**: Event kind like "add", "change", "remove" (very low cardinality)
//! - **error\_type**: Error category (low cardinality)
//!
//! Never use document IDs or error messages as labels.
//!
//! # Examples
//!
//! ```rust
//! use penne_core::event::FeedEventKind;
//! use penne_core::metrics;
//!
//! metrics::init_metrics();
//! metrics::increment_events_dispatched("test.users", FeedEventKind::Add);
//! metrics::increment_mapping_failures("test.users", FeedEventKind::Change, "missing_key");
//! ```

use crate::event::FeedEventKind;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric name prefix for all Penne metrics.
#[doc(hidden)]
pub const METRIC_PREFIX: &str = "penne";

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Total number of raw records pulled from change feeds.
///
/// Type: Counter
/// Labels: table
#[doc(hidden)]
pub const RECORDS_PULLED_TOTAL: &str = "penne_records_pulled_total";

/// Total number of events delivered to listeners.
///
/// Type: Counter
/// Labels: table, kind
#[doc(hidden)]
pub const EVENTS_DISPATCHED_TOTAL: &str = "penne_events_dispatched_total";

/// Total number of records dropped because a payload could not be mapped.
///
/// Type: Counter
/// Labels: table, kind, error_type
#[doc(hidden)]
pub const MAPPING_FAILURES_TOTAL: &str = "penne_mapping_failures_total";

/// Total number of records skipped because they are not change events.
///
/// Type: Counter
/// Labels: table
const RECORDS_SKIPPED_TOTAL: &str = "penne_records_skipped_total";

/// Total number of faults reported by change feeds.
///
/// Type: Counter
/// Labels: table, error_type
const STREAM_FAULTS_TOTAL: &str = "penne_stream_faults_total";

/// Total number of bounded-wait pulls that returned no record.
///
/// Type: Counter
/// Labels: table
const PULL_TIMEOUTS_TOTAL: &str = "penne_pull_timeouts_total";

/// Time spent mapping a record and running its listener callback.
///
/// Type: Histogram
/// Labels: table
/// Unit: seconds
#[doc(hidden)]
pub const DISPATCH_DURATION_SECONDS: &str = "penne_dispatch_duration_seconds";

/// Number of change feed workers currently running.
///
/// Type: Gauge
/// Unit: count
const ACTIVE_WORKERS: &str = "penne_active_workers";

// ============================================================================
// Initialization
// ============================================================================

/// Initializes metric descriptions for documentation and introspection.
///
/// Call once at application startup, before starting workers.
pub fn init_metrics() {
    describe_counter!(
        RECORDS_PULLED_TOTAL,
        "Total number of raw records pulled from change feeds"
    );
    describe_counter!(
        EVENTS_DISPATCHED_TOTAL,
        "Total number of typed events delivered to listeners"
    );
    describe_counter!(
        MAPPING_FAILURES_TOTAL,
        "Total number of change records dropped because a payload could not be mapped"
    );
    describe_counter!(
        RECORDS_SKIPPED_TOTAL,
        "Total number of records that were not recognised as change events"
    );
    describe_counter!(
        STREAM_FAULTS_TOTAL,
        "Total number of faults reported by change feeds"
    );
    describe_counter!(
        PULL_TIMEOUTS_TOTAL,
        "Total number of bounded-wait pulls that elapsed without a record"
    );
    describe_histogram!(
        DISPATCH_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent mapping a change record and running its listener callback"
    );
    describe_gauge!(
        ACTIVE_WORKERS,
        metrics::Unit::Count,
        "Number of change feed workers currently running"
    );
}

// ============================================================================
// Counter Metrics
// ============================================================================

/// Increments the count of raw records pulled from a feed.
pub fn increment_records_pulled(table: &str) {
    counter!(RECORDS_PULLED_TOTAL, "table" => table.to_string()).increment(1);
}

/// Increments the count of events delivered to a listener.
///
/// # Examples
///
/// ```rust
/// use penne_core::event::FeedEventKind;
/// use penne_core::metrics;
///
/// metrics::increment_events_dispatched("test.users", FeedEventKind::Ready);
/// ```
pub fn increment_events_dispatched(table: &str, kind: FeedEventKind) {
    counter!(EVENTS_DISPATCHED_TOTAL, "table" => table.to_string(), "kind" => kind.as_str())
        .increment(1);
}

/// Increments the count of records dropped by mapping failures.
///
/// # Arguments
///
/// * `table` - Fully qualified table name
/// * `kind` - Kind of the dropped event
/// * `error_type` - Category from [`crate::mapper::MappingError::category`]
pub fn increment_mapping_failures(table: &str, kind: FeedEventKind, error_type: &'static str) {
    counter!(
        MAPPING_FAILURES_TOTAL,
        "table" => table.to_string(),
        "kind" => kind.as_str(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Increments the count of records that were not change events.
pub fn increment_records_skipped(table: &str) {
    counter!(RECORDS_SKIPPED_TOTAL, "table" => table.to_string()).increment(1);
}

/// Increments the count of stream faults.
///
/// `error_type` is a category from [`crate::source::StreamFault::category`].
pub fn increment_stream_faults(table: &str, error_type: &'static str) {
    counter!(STREAM_FAULTS_TOTAL, "table" => table.to_string(), "error_type" => error_type)
        .increment(1);
}

/// Increments the count of pulls that timed out.
pub fn increment_pull_timeouts(table: &str) {
    counter!(PULL_TIMEOUTS_TOTAL, "table" => table.to_string()).increment(1);
}

// ============================================================================
// Histogram Metrics
// ============================================================================

/// Records the time spent dispatching one record.
pub fn record_dispatch_duration(duration: Duration, table: &str) {
    histogram!(DISPATCH_DURATION_SECONDS, "table" => table.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Gauge Metrics
// ============================================================================

/// Marks a worker as started.
pub fn increment_active_workers() {
    gauge!(ACTIVE_WORKERS).increment(1.0);
}

/// Marks a worker as stopped.
pub fn decrement_active_workers() {
    gauge!(ACTIVE_WORKERS).decrement(1.0);
}
