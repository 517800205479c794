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

//! Background change feed worker.
//!
//! A [`ChangeFeedWorker`] owns one open feed and one tokio task. The task pulls
//! raw records with a bounded wait, classifies them, maps their payloads into
//! the target type and invokes the listener, strictly in arrival order.
//!
//! # Lifecycle
//!
//! ```text
//!  start() ──► RUNNING ──close()/fatal fault──► STOPPING ──loop exit, cursor released──► STOPPED
//! ```
//!
//! Stopping is cooperative. The loop checks the shared state between pulls, and
//! every pull returns within [`WorkerConfig::pull_timeout`], so a stop request is
//! observed within one timeout period plus the in-flight callback.
//!
//! # Failure Handling
//!
//! - **Mapping failures** drop the record. They are logged, counted and passed
//!   to [`ChangeFeedListener::on_error`]; the loop continues.
//! - **Stream faults** either stop the worker (`stop_on_fault`) or are retried
//!   after an exponential backoff with jitter.
//! - **Pull timeouts** are not errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use penne_core::worker::{ChangeFeedWorker, WorkerConfig};
//!
//! let config = WorkerConfig::builder()
//!     .table("users")
//!     .stop_on_fault(true)
//!     .build()?;
//!
//! let mut worker = ChangeFeedWorker::<User>::start(&connection, config, listener).await?;
//! // ...
//! worker.close().await?;
//! ```

use crate::binding::Mappable;
use crate::event::classify;
use crate::listener::ChangeFeedListener;
use crate::mapper;
use crate::metrics;
use crate::source::{ChangeFeedOptions, Connection, FeedCursor, StreamFault, TableRef};
use bson::Document;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

/// Default bounded wait for a single pull.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors that can occur while starting or stopping a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The target table or database could not be determined, or the
    /// configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The change feed could not be opened
    #[error("Failed to open change feed on {table}: {source}")]
    Open {
        table: String,
        #[source]
        source: StreamFault,
    },

    /// The background task panicked or was aborted
    #[error("Worker task failed: {0}")]
    Task(String),
}

/// Configuration for a change feed worker.
///
/// Use [`WorkerConfigBuilder`] to construct instances:
///
/// ```rust
/// use penne_core::worker::WorkerConfig;
/// use std::time::Duration;
///
/// let config = WorkerConfig::builder()
///     .database("test")
///     .table("users")
///     .pull_timeout(Duration::from_secs(1))
///     .build()
///     .unwrap();
///
/// assert!(!config.stop_on_fault);
/// ```
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Database to watch; defaults to the connection's selected database
    pub database: Option<String>,

    /// Table to watch; defaults to the target type's declared table
    pub table: Option<String>,

    /// Bounded wait for a single pull
    pub pull_timeout: Duration,

    /// Stop the worker on the first stream fault instead of retrying
    pub stop_on_fault: bool,

    /// Initial backoff before retrying after a fault
    pub initial_backoff: Duration,

    /// Maximum backoff before retrying after a fault
    pub max_backoff: Duration,

    /// Backoff jitter factor (0.0 to 1.0)
    /// Default: 0.1 (10% jitter)
    pub backoff_jitter: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database: None,
            table: None,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            stop_on_fault: false,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_jitter: 0.1,
        }
    }
}

impl WorkerConfig {
    /// Creates a new builder for configuring a worker.
    #[must_use]
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// Returns an error if:
    /// - `pull_timeout` is zero
    /// - `initial_backoff` is zero or greater than `max_backoff`
    /// - `backoff_jitter` is not in range [0.0, 1.0]
    /// - an explicit `database` or `table` is empty
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.pull_timeout.is_zero() {
            return Err(WorkerError::Configuration(
                "pull_timeout must be greater than 0".to_string(),
            ));
        }

        if self.initial_backoff.is_zero() {
            return Err(WorkerError::Configuration(
                "initial_backoff must be greater than 0".to_string(),
            ));
        }

        if self.initial_backoff > self.max_backoff {
            return Err(WorkerError::Configuration(format!(
                "initial_backoff ({:?}) must be <= max_backoff ({:?})",
                self.initial_backoff, self.max_backoff
            )));
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(WorkerError::Configuration(format!(
                "backoff_jitter ({}) must be between 0.0 and 1.0",
                self.backoff_jitter
            )));
        }

        if self.database.as_deref() == Some("") || self.table.as_deref() == Some("") {
            return Err(WorkerError::Configuration(
                "database and table names must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolves the table to watch for target type `T`.
    ///
    /// The table comes from the configuration, then from `T::TABLE`. The
    /// database comes from the configuration, then from the connection.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Configuration` if either cannot be determined.
    pub fn resolve_table<T, C>(&self, connection: &C) -> Result<TableRef, WorkerError>
    where
        T: Mappable,
        C: Connection + ?Sized,
    {
        let table = self
            .table
            .clone()
            .or_else(|| T::TABLE.map(str::to_string))
            .ok_or_else(|| {
                WorkerError::Configuration(format!(
                    "No table configured and {} does not declare one",
                    std::any::type_name::<T>()
                ))
            })?;

        let database = match &self.database {
            Some(database) => database.clone(),
            None => connection.current_database().ok_or_else(|| {
                WorkerError::Configuration(
                    "No database is being used by the connection".to_string(),
                )
            })?,
        };

        Ok(TableRef::new(database, table))
    }

    /// Calculates backoff duration with jitter for the given attempt.
    ///
    /// Uses exponential backoff: `initial * 2^(attempt-1)`, capped at `max_backoff`.
    /// Adds random jitter to prevent thundering herd: ±(base * jitter_factor / 2).
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);

        let base_ms = initial_ms
            .saturating_mul(1_u64 << attempt.saturating_sub(1).min(63))
            .min(max_ms);

        if self.backoff_jitter > 0.0 {
            let jitter_range = (base_ms as f64) * self.backoff_jitter;
            let jitter = (rand::random::<f64>() * jitter_range) - (jitter_range / 2.0);
            let final_ms = ((base_ms as f64) + jitter).max(0.0) as u64;
            Duration::from_millis(final_ms)
        } else {
            Duration::from_millis(base_ms)
        }
    }
}

/// Builder for [`WorkerConfig`].
#[derive(Debug, Default)]
pub struct WorkerConfigBuilder {
    database: Option<String>,
    table: Option<String>,
    pull_timeout: Option<Duration>,
    stop_on_fault: bool,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    backoff_jitter: Option<f64>,
}

impl WorkerConfigBuilder {
    /// Sets the database to watch.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the table to watch.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Sets the bounded wait for a single pull.
    ///
    /// Default: 3 seconds
    #[must_use]
    pub fn pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = Some(timeout);
        self
    }

    /// Stops the worker on the first stream fault (e.g. the table was dropped).
    ///
    /// Default: false (faults are retried with backoff)
    #[must_use]
    pub fn stop_on_fault(mut self, stop: bool) -> Self {
        self.stop_on_fault = stop;
        self
    }

    /// Sets the initial fault backoff.
    ///
    /// Default: 100ms
    #[must_use]
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum fault backoff.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff jitter factor (0.0 to 1.0).
    ///
    /// Default: 0.1
    #[must_use]
    pub fn backoff_jitter(mut self, jitter: f64) -> Self {
        self.backoff_jitter = Some(jitter);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Configuration` if validation fails.
    pub fn build(self) -> Result<WorkerConfig, WorkerError> {
        let defaults = WorkerConfig::default();
        let config = WorkerConfig {
            database: self.database,
            table: self.table,
            pull_timeout: self.pull_timeout.unwrap_or(defaults.pull_timeout),
            stop_on_fault: self.stop_on_fault,
            initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(defaults.max_backoff),
            backoff_jitter: self.backoff_jitter.unwrap_or(defaults.backoff_jitter),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Pulling and dispatching records
    Running = 0,
    /// Stop requested; the loop has not exited yet
    Stopping = 1,
    /// Loop exited and the feed was released (terminal)
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Worker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Raw records pulled from the feed
    pub records_pulled: u64,

    /// Events delivered to the listener
    pub events_dispatched: u64,

    /// Records dropped because a payload could not be mapped
    pub mapping_failures: u64,

    /// Records that were not change events
    pub records_skipped: u64,

    /// Pulls that elapsed without a record
    pub pull_timeouts: u64,

    /// Faults reported by the feed
    pub stream_faults: u64,
}

/// State shared between the worker handle and its task.
#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    wake: Notify,
    records_pulled: AtomicU64,
    events_dispatched: AtomicU64,
    mapping_failures: AtomicU64,
    records_skipped: AtomicU64,
    pull_timeouts: AtomicU64,
    stream_faults: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Running as u8),
            wake: Notify::new(),
            records_pulled: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            mapping_failures: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            pull_timeouts: AtomicU64::new(0),
            stream_faults: AtomicU64::new(0),
        }
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Moves RUNNING to STOPPING; returns false if already past RUNNING.
    fn request_stop(&self) -> bool {
        let requested = self
            .state
            .compare_exchange(
                WorkerState::Running as u8,
                WorkerState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        // Cuts a fault backoff short
        self.wake.notify_one();
        requested
    }

    fn mark_stopped(&self) {
        self.state.store(WorkerState::Stopped as u8, Ordering::Release);
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self) -> WorkerStats {
        WorkerStats {
            records_pulled: self.records_pulled.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            mapping_failures: self.mapping_failures.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            pull_timeouts: self.pull_timeouts.load(Ordering::Relaxed),
            stream_faults: self.stream_faults.load(Ordering::Relaxed),
        }
    }
}

/// Marks the worker stopped when the run task exits, including by unwinding.
struct StopGuard {
    shared: Arc<Shared>,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.shared.mark_stopped();
        metrics::decrement_active_workers();
    }
}

/// A background consumer delivering typed change events for one table.
///
/// # Thread Safety
///
/// The feed cursor and the listener are owned by the background task. The
/// handle only shares the lifecycle state and statistics with it, both atomic.
///
/// Dropping a running worker requests a stop; the task then exits on its own
/// and releases the feed. Use [`ChangeFeedWorker::close`] to wait for that.
pub struct ChangeFeedWorker<T> {
    table: TableRef,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    _target: PhantomData<fn() -> T>,
}

impl<T: Mappable> ChangeFeedWorker<T> {
    /// Opens a change feed and starts consuming it on a new task.
    ///
    /// The feed is opened with initial values, state markers and type
    /// discriminators enabled.
    ///
    /// # Errors
    ///
    /// - `WorkerError::Configuration` if the configuration is invalid or the
    ///   table/database cannot be determined
    /// - `WorkerError::Open` if the connection fails to open the feed
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start<C, L>(
        connection: &C,
        config: WorkerConfig,
        listener: L,
    ) -> Result<Self, WorkerError>
    where
        C: Connection + ?Sized,
        L: ChangeFeedListener<T>,
    {
        config.validate()?;
        let table = config.resolve_table::<T, C>(connection)?;

        info!(
            table = %table.full_name(),
            pull_timeout = ?config.pull_timeout,
            stop_on_fault = config.stop_on_fault,
            "Opening change feed"
        );

        let cursor = connection
            .open_changes(&table, &ChangeFeedOptions::all())
            .await
            .map_err(|source| WorkerError::Open {
                table: table.full_name(),
                source,
            })?;

        let shared = Arc::new(Shared::new());
        metrics::increment_active_workers();

        let handle = tokio::spawn(run::<T, L>(
            table.full_name(),
            config,
            cursor,
            listener,
            Arc::clone(&shared),
        ));

        Ok(Self {
            table,
            shared,
            handle: Some(handle),
            _target: PhantomData,
        })
    }
}

impl<T> ChangeFeedWorker<T> {
    /// Returns the table this worker consumes.
    #[must_use]
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Checks if the worker is still consuming records.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Returns the current worker statistics.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.shared.stats()
    }

    /// Stops the worker and waits for its task to exit.
    ///
    /// Returns once the loop has observed the stop request and released the
    /// feed: at most one pull timeout plus the in-flight callback. Calling it
    /// again after it returned is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Task` if the background task panicked.
    #[instrument(skip(self), fields(table = %self.table.full_name()))]
    pub async fn close(&mut self) -> Result<(), WorkerError> {
        let Some(handle) = self.handle.take() else {
            debug!("Worker already closed");
            return Ok(());
        };

        if self.shared.request_stop() {
            info!("Stopping change feed worker");
        }

        match handle.await {
            Ok(()) => {
                debug!("Worker stopped successfully");
                Ok(())
            }
            Err(e) => {
                error!(?e, "Worker task failed");
                Err(WorkerError::Task(e.to_string()))
            }
        }
    }
}

impl<T> Drop for ChangeFeedWorker<T> {
    fn drop(&mut self) {
        if self.handle.is_some() && self.shared.request_stop() {
            debug!(table = %self.table.full_name(), "Worker dropped while running, stop requested");
        }
    }
}

/// Worker task: pulls until stopped, then releases the cursor.
#[instrument(skip_all, fields(table = %table))]
async fn run<T, L>(
    table: String,
    config: WorkerConfig,
    mut cursor: Box<dyn FeedCursor>,
    mut listener: L,
    shared: Arc<Shared>,
) where
    T: Mappable,
    L: ChangeFeedListener<T>,
{
    let _stopped = StopGuard {
        shared: Arc::clone(&shared),
    };
    info!("Change feed worker started");
    let mut fault_attempts: u32 = 0;

    while shared.is_running() {
        match tokio::time::timeout(config.pull_timeout, cursor.next()).await {
            Err(_elapsed) => {
                trace!("Pull timed out");
                Shared::bump(&shared.pull_timeouts);
                metrics::increment_pull_timeouts(&table);
            }
            Ok(Ok(None)) => {
                fault_attempts = 0;
            }
            Ok(Ok(Some(record))) => {
                fault_attempts = 0;
                Shared::bump(&shared.records_pulled);
                metrics::increment_records_pulled(&table);
                dispatch::<T, L>(&table, &record, &mut listener, &shared);
            }
            Ok(Err(fault)) => {
                Shared::bump(&shared.stream_faults);
                metrics::increment_stream_faults(&table, fault.category());

                if config.stop_on_fault {
                    error!(error = %fault, "Stream fault, stopping worker");
                    shared.request_stop();
                    break;
                }

                fault_attempts = fault_attempts.saturating_add(1);
                let backoff = config.calculate_backoff(fault_attempts);
                warn!(
                    error = %fault,
                    attempt = fault_attempts,
                    backoff_ms = backoff.as_millis(),
                    "Stream fault, retrying pull"
                );

                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    () = shared.wake.notified() => {}
                }
            }
        }
    }

    if let Err(e) = cursor.close().await {
        warn!(error = %e, "Failed to release change feed");
    }

    let stats = shared.stats();
    info!(
        records_pulled = stats.records_pulled,
        events_dispatched = stats.events_dispatched,
        mapping_failures = stats.mapping_failures,
        stream_faults = stats.stream_faults,
        "Change feed worker stopped"
    );
}

/// Classifies one record, maps its payloads and invokes the listener.
fn dispatch<T, L>(table: &str, record: &Document, listener: &mut L, shared: &Shared)
where
    T: Mappable,
    L: ChangeFeedListener<T>,
{
    let Some(event) = classify(record) else {
        debug!(%record, "Skipping record that is not a change event");
        Shared::bump(&shared.records_skipped);
        metrics::increment_records_skipped(table);
        return;
    };

    let kind = event.kind();
    let started = Instant::now();

    match event.try_map(|payload| mapper::map::<T>(&payload)) {
        Ok(event) => {
            event.dispatch(listener);
            Shared::bump(&shared.events_dispatched);
            metrics::increment_events_dispatched(table, kind);
            metrics::record_dispatch_duration(started.elapsed(), table);
        }
        Err(e) => {
            error!(%kind, error = %e, "Failed to map change record, dropping it");
            Shared::bump(&shared.mapping_failures);
            metrics::increment_mapping_failures(table, kind, e.category());
            listener.on_error(&e);
        }
    }
}
