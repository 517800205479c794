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

//! Change feed sources.
//!
//! The worker does not talk to a database directly. It asks a [`Connection`]
//! to open a feed on a [`TableRef`] and then pulls raw records from the
//! returned [`FeedCursor`].
//!
//! ```text
//! ┌────────────┐  open_changes  ┌────────────┐   next()   ┌──────────────────┐
//! │ Connection │ ─────────────► │ FeedCursor │ ─────────► │ ChangeFeedWorker │
//! └────────────┘                └────────────┘  close()   └──────────────────┘
//! ```
//!
//! Implementations live in the `penne-sources` crate.

use crate::event::TYPE_FIELD;
use async_trait::async_trait;
use bson::Document;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal conditions reported by a feed.
#[derive(Debug, Error)]
pub enum StreamFault {
    /// The watched table (or its database) was dropped or renamed
    #[error("Table {table} is no longer available")]
    TableDropped { table: String },

    /// The connection to the data source failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The feed was closed by its producer
    #[error("Change feed closed")]
    Closed,

    /// Any other source-specific failure
    #[error("Stream error: {0}")]
    Other(String),
}

impl StreamFault {
    /// Returns true if the fault means the watched table is gone.
    #[must_use]
    pub fn is_table_drop(&self) -> bool {
        matches!(self, Self::TableDropped { .. })
    }

    /// Returns the error category for metrics/logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::TableDropped { .. } => "table_dropped",
            Self::Connection { .. } => "connection",
            Self::Closed => "closed",
            Self::Other(_) => "other",
        }
    }
}

/// Fully qualified table identity (database + table).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Database name
    pub database: String,

    /// Table name
    pub table: String,
}

impl TableRef {
    /// Creates a new table reference from database and table names.
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Returns the fully qualified name as "database.table".
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

/// Options requested when opening a change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFeedOptions {
    /// Emit an `initial` record for every value present when the feed opens
    pub include_initial: bool,

    /// Emit `state` records around the initial values
    pub include_states: bool,

    /// Tag every record with its `type`
    pub include_types: bool,
}

impl ChangeFeedOptions {
    /// Options with every record kind enabled, as used by the worker.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            include_initial: true,
            include_states: true,
            include_types: true,
        }
    }

    /// Shapes a raw record for a feed opened with these options.
    ///
    /// Returns `None` for a record the options exclude: `state` records
    /// without `include_states`, `initial` records without `include_initial`.
    /// Without `include_types` the `type` discriminator is removed.
    #[must_use]
    pub fn filter(&self, mut record: Document) -> Option<Document> {
        match record.get_str(TYPE_FIELD) {
            Ok("state") if !self.include_states => return None,
            Ok("initial") if !self.include_initial => return None,
            _ => {}
        }
        if !self.include_types {
            record.remove(TYPE_FIELD);
        }
        Some(record)
    }
}

impl Default for ChangeFeedOptions {
    fn default() -> Self {
        Self::all()
    }
}

/// An open change feed.
///
/// # Cancellation
///
/// [`FeedCursor::next`] must be cancellation safe: the worker bounds every pull
/// with a timeout and drops the pending future when it elapses. Dropping it
/// must not lose a record.
#[async_trait]
pub trait FeedCursor: Send {
    /// Waits for the next raw record.
    ///
    /// `Ok(None)` is a null pull and is skipped by the worker.
    ///
    /// # Errors
    ///
    /// Returns a [`StreamFault`] if the feed can no longer be read.
    async fn next(&mut self) -> Result<Option<Document>, StreamFault>;

    /// Releases the feed.
    ///
    /// # Errors
    ///
    /// Returns a [`StreamFault`] if the feed could not be released cleanly.
    async fn close(&mut self) -> Result<(), StreamFault>;
}

/// An established session with a data source.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Returns the database currently selected on this connection, if any.
    fn current_database(&self) -> Option<String>;

    /// Opens a change feed on `table`.
    ///
    /// # Errors
    ///
    /// Returns a [`StreamFault`] if the feed cannot be opened.
    async fn open_changes(
        &self,
        table: &TableRef,
        options: &ChangeFeedOptions,
    ) -> Result<Box<dyn FeedCursor>, StreamFault>;
}
