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

//! In-memory change feed source.
//!
//! This module provides a [`Connection`] whose feeds are scripted from the
//! same process through a [`FeedHandle`]. Each table owns one channel: records
//! pushed through its handles are delivered, in order, to the cursor opened on
//! that table.
//!
//! # Use Cases
//!
//! - **Tests** - drive a worker deterministically, including faults
//! - **Local development** - exercise listeners without a database
//!
//! # Limitations
//!
//! - **One reader per table** - a table's feed can be opened once
//! - **No persistence** - records are lost when the connection is dropped
//!
//! # Example
//!
//! ```rust
//! use penne_sources::memory::MemoryConnection;
//! use penne_core::source::{ChangeFeedOptions, Connection, StreamFault, TableRef};
//! use bson::doc;
//!
//! # async fn example() -> Result<(), StreamFault> {
//! let connection = MemoryConnection::new().with_database("shop");
//! let table = TableRef::new("shop", "items");
//! let feed = connection.feed(&table).await;
//!
//! feed.initializing();
//! feed.initial(doc! { "id": "a" });
//! feed.ready();
//! feed.end();
//!
//! let mut cursor = connection.open_changes(&table, &ChangeFeedOptions::all()).await?;
//! while let Ok(Some(record)) = cursor.next().await {
//!     println!("{record}");
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bson::{doc, Document};
use penne_core::event::{NEW_VALUE_FIELD, OLD_VALUE_FIELD, STATE_FIELD, TYPE_FIELD};
use penne_core::source::{ChangeFeedOptions, Connection, FeedCursor, StreamFault, TableRef};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

type Item = Result<Document, StreamFault>;

/// One table's channel. The receiver is handed out when the feed is opened.
#[derive(Debug)]
struct Feed {
    sender: mpsc::UnboundedSender<Item>,
    receiver: Option<mpsc::UnboundedReceiver<Item>>,
}

impl Feed {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

/// In-memory connection with scripted change feeds.
///
/// Cloning is cheap; clones share the same feeds.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnection {
    database: Option<String>,
    feeds: Arc<RwLock<HashMap<TableRef, Feed>>>,
}

impl MemoryConnection {
    /// Creates a connection with no database selected and no feeds.
    #[must_use]
    pub fn new() -> Self {
        debug!("Creating in-memory connection");
        Self::default()
    }

    /// Selects the database reported by [`Connection::current_database`].
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Returns a handle scripting the feed of `table`, creating it if needed.
    ///
    /// Records pushed before the feed is opened are buffered.
    pub async fn feed(&self, table: &TableRef) -> FeedHandle {
        let mut feeds = self.feeds.write().await;
        let feed = feeds.entry(table.clone()).or_insert_with(Feed::new);
        FeedHandle {
            table: table.full_name(),
            sender: feed.sender.clone(),
        }
    }

    /// Returns true if the feed of `table` has been opened.
    pub async fn is_open(&self, table: &TableRef) -> bool {
        self.feeds
            .read()
            .await
            .get(table)
            .is_some_and(|feed| feed.receiver.is_none())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn current_database(&self) -> Option<String> {
        self.database.clone()
    }

    async fn open_changes(
        &self,
        table: &TableRef,
        options: &ChangeFeedOptions,
    ) -> Result<Box<dyn FeedCursor>, StreamFault> {
        let mut feeds = self.feeds.write().await;
        let feed = feeds.entry(table.clone()).or_insert_with(Feed::new);

        let receiver = feed.receiver.take().ok_or_else(|| {
            StreamFault::Other(format!("Change feed on {} is already open", table.full_name()))
        })?;

        debug!(table = %table.full_name(), ?options, "Opened in-memory change feed");

        Ok(Box::new(MemoryCursor {
            table: table.full_name(),
            options: *options,
            receiver: Some(receiver),
        }))
    }
}

/// Scripts the records of one in-memory feed.
///
/// Pushes never block. Once the feed's cursor has been closed they are
/// dropped and traced.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    table: String,
    sender: mpsc::UnboundedSender<Item>,
}

impl FeedHandle {
    /// Pushes a raw record.
    pub fn push(&self, record: Document) {
        trace!(table = %self.table, %record, "Pushing record");
        if let Err(mpsc::error::SendError(dropped)) = self.sender.send(Ok(record)) {
            trace!(table = %self.table, ?dropped, "Feed closed, dropping record");
        }
    }

    /// Pushes a fault; the cursor returns it from its next pull.
    pub fn fault(&self, fault: StreamFault) {
        if let Err(mpsc::error::SendError(dropped)) = self.sender.send(Err(fault)) {
            trace!(table = %self.table, ?dropped, "Feed closed, dropping fault");
        }
    }

    /// Returns true once the feed's cursor has been closed or dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Pushes a `state: initializing` marker.
    pub fn initializing(&self) {
        self.push(doc! { TYPE_FIELD: "state", STATE_FIELD: "initializing" });
    }

    /// Pushes a `state: ready` marker.
    pub fn ready(&self) {
        self.push(doc! { TYPE_FIELD: "state", STATE_FIELD: "ready" });
    }

    /// Pushes a value that existed when the feed opened.
    pub fn initial(&self, value: Document) {
        self.push(doc! { TYPE_FIELD: "initial", NEW_VALUE_FIELD: value });
    }

    /// Pushes an inserted value.
    pub fn add(&self, value: Document) {
        self.push(doc! { TYPE_FIELD: "add", NEW_VALUE_FIELD: value });
    }

    /// Pushes a modified value.
    pub fn change(&self, old_value: Document, new_value: Document) {
        self.push(doc! {
            TYPE_FIELD: "change",
            OLD_VALUE_FIELD: old_value,
            NEW_VALUE_FIELD: new_value,
        });
    }

    /// Pushes a deleted value.
    pub fn remove(&self, value: Document) {
        self.push(doc! { TYPE_FIELD: "remove", OLD_VALUE_FIELD: value });
    }

    /// Reports the table as dropped.
    pub fn drop_table(&self) {
        self.fault(StreamFault::TableDropped {
            table: self.table.clone(),
        });
    }

    /// Ends the feed. Every later pull fails with [`StreamFault::Closed`].
    pub fn end(&self) {
        self.fault(StreamFault::Closed);
    }
}

/// Cursor over an in-memory feed.
#[derive(Debug)]
pub struct MemoryCursor {
    table: String,
    options: ChangeFeedOptions,
    receiver: Option<mpsc::UnboundedReceiver<Item>>,
}

#[async_trait]
impl FeedCursor for MemoryCursor {
    async fn next(&mut self) -> Result<Option<Document>, StreamFault> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(StreamFault::Closed);
        };

        loop {
            match receiver.recv().await {
                Some(Ok(record)) => {
                    if let Some(record) = self.options.filter(record) {
                        return Ok(Some(record));
                    }
                    trace!(table = %self.table, "Record excluded by feed options");
                }
                Some(Err(StreamFault::Closed)) | None => {
                    debug!(table = %self.table, "In-memory change feed ended");
                    self.receiver = None;
                    return Err(StreamFault::Closed);
                }
                Some(Err(fault)) => return Err(fault),
            }
        }
    }

    async fn close(&mut self) -> Result<(), StreamFault> {
        if self.receiver.take().is_some() {
            debug!(table = %self.table, "Closed in-memory change feed");
        }
        Ok(())
    }
}
