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

//! MongoDB change feed source.
//!
//! [`MongoConnection`] opens a feed on a collection in three phases:
//!
//! 1. `initializing` marker
//! 2. one `initial` record per document present when the feed opened
//! 3. `ready` marker, then live change stream events
//!
//! The change stream is opened before the snapshot is read, so writes racing
//! with the snapshot are not lost (they may be seen twice).
//!
//! # Event Translation
//!
//! | Change stream operation          | Record / fault                     |
//! |----------------------------------|------------------------------------|
//! | `insert`                         | `add` with `new_val`               |
//! | `update`, `replace`              | `change` with `old_val`, `new_val` |
//! | `delete`                         | `remove` with `old_val`            |
//! | `drop`, `dropDatabase`, `rename`, `invalidate` | [`StreamFault::TableDropped`] |
//!
//! `old_val` is the pre-image of the document. The collection must have
//! `changeStreamPreAndPostImages` enabled; without it, updates are skipped and
//! deletes carry only the document key.
//!
//! # Example
//!
//! ```rust,ignore
//! use penne_sources::mongodb::MongoConnection;
//! use penne_core::worker::{ChangeFeedWorker, WorkerConfig};
//!
//! let connection = MongoConnection::connect("mongodb://localhost:27017/shop?replicaSet=rs0").await?;
//! let worker = ChangeFeedWorker::<Item>::start(&connection, WorkerConfig::default(), listener).await?;
//! ```

use async_trait::async_trait;
use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::change_stream::ChangeStream;
use mongodb::options::{ChangeStreamOptions, FullDocumentBeforeChangeType, FullDocumentType};
use mongodb::{Client, Cursor};
use penne_core::event::{NEW_VALUE_FIELD, OLD_VALUE_FIELD, STATE_FIELD, TYPE_FIELD};
use penne_core::source::{ChangeFeedOptions, Connection, FeedCursor, StreamFault, TableRef};
use tracing::{debug, info, warn};

fn connection_fault(error: mongodb::error::Error) -> StreamFault {
    StreamFault::Connection {
        message: error.to_string(),
        source: Some(Box::new(error)),
    }
}

fn state_record(state: &str) -> Document {
    doc! { TYPE_FIELD: "state", STATE_FIELD: state }
}

/// Connection to a MongoDB deployment.
///
/// Change streams require a replica set or sharded cluster.
#[derive(Debug, Clone)]
pub struct MongoConnection {
    client: Client,
    database: Option<String>,
}

impl MongoConnection {
    /// Wraps a client. The selected database is the URI's default database.
    #[must_use]
    pub fn new(client: Client) -> Self {
        let database = client.default_database().map(|db| db.name().to_string());
        Self { client, database }
    }

    /// Connects to `uri`.
    ///
    /// # Errors
    ///
    /// Returns `StreamFault::Connection` if the URI is invalid.
    pub async fn connect(uri: &str) -> Result<Self, StreamFault> {
        let client = Client::with_uri_str(uri).await.map_err(connection_fault)?;
        info!("Connected to MongoDB");
        Ok(Self::new(client))
    }

    /// Selects the database used when a worker is not given one.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Returns the underlying client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Connection for MongoConnection {
    fn current_database(&self) -> Option<String> {
        self.database.clone()
    }

    async fn open_changes(
        &self,
        table: &TableRef,
        options: &ChangeFeedOptions,
    ) -> Result<Box<dyn FeedCursor>, StreamFault> {
        let collection = self
            .client
            .database(&table.database)
            .collection::<Document>(&table.table);

        let mut watch_options = ChangeStreamOptions::default();
        watch_options.full_document = Some(FullDocumentType::UpdateLookup);
        watch_options.full_document_before_change =
            Some(FullDocumentBeforeChangeType::WhenAvailable);

        let stream = collection
            .watch()
            .with_options(watch_options)
            .await
            .map_err(connection_fault)?;

        let snapshot = if options.include_initial {
            Some(collection.find(doc! {}).await.map_err(connection_fault)?)
        } else {
            None
        };

        info!(table = %table.full_name(), ?options, "Opened MongoDB change feed");

        Ok(Box::new(MongoCursor {
            table: table.full_name(),
            options: *options,
            phase: Phase::Initializing,
            snapshot,
            stream: Some(stream),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initializing,
    Snapshot,
    Ready,
    Live,
}

/// Cursor over a MongoDB change feed.
///
/// Both the snapshot cursor and the change stream keep their in-flight reads
/// internally, so a pull abandoned by a timeout resumes where it left off.
pub struct MongoCursor {
    table: String,
    options: ChangeFeedOptions,
    phase: Phase,
    snapshot: Option<Cursor<Document>>,
    stream: Option<ChangeStream<ChangeStreamEvent<Document>>>,
}

#[async_trait]
impl FeedCursor for MongoCursor {
    async fn next(&mut self) -> Result<Option<Document>, StreamFault> {
        loop {
            match self.phase {
                Phase::Initializing => {
                    self.phase = Phase::Snapshot;
                    if let Some(record) = self.options.filter(state_record("initializing")) {
                        return Ok(Some(record));
                    }
                }
                Phase::Snapshot => {
                    let Some(snapshot) = self.snapshot.as_mut() else {
                        self.phase = Phase::Ready;
                        continue;
                    };
                    match snapshot.try_next().await.map_err(connection_fault)? {
                        Some(document) => {
                            let record = doc! { TYPE_FIELD: "initial", NEW_VALUE_FIELD: document };
                            return Ok(self.options.filter(record));
                        }
                        None => {
                            debug!(table = %self.table, "Initial values delivered");
                            self.snapshot = None;
                            self.phase = Phase::Ready;
                        }
                    }
                }
                Phase::Ready => {
                    self.phase = Phase::Live;
                    if let Some(record) = self.options.filter(state_record("ready")) {
                        return Ok(Some(record));
                    }
                }
                Phase::Live => {
                    let stream = self.stream.as_mut().ok_or(StreamFault::Closed)?;
                    let Some(event) = stream.try_next().await.map_err(connection_fault)? else {
                        self.stream = None;
                        return Err(StreamFault::Closed);
                    };

                    return match translate(&self.table, event) {
                        Ok(record) => Ok(record.and_then(|r| self.options.filter(r))),
                        Err(fault) => {
                            self.stream = None;
                            Err(fault)
                        }
                    };
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), StreamFault> {
        debug!(table = %self.table, "Closing MongoDB change feed");
        self.snapshot = None;
        self.stream = None;
        Ok(())
    }
}

/// Translates a change stream event into a change record.
///
/// `Ok(None)` for events that carry no record.
fn translate(
    table: &str,
    event: ChangeStreamEvent<Document>,
) -> Result<Option<Document>, StreamFault> {
    let record = match event.operation_type {
        OperationType::Insert => event
            .full_document
            .map(|new| doc! { TYPE_FIELD: "add", NEW_VALUE_FIELD: new }),
        OperationType::Update | OperationType::Replace => {
            match (event.full_document_before_change, event.full_document) {
                (Some(old), Some(new)) => Some(doc! {
                    TYPE_FIELD: "change",
                    OLD_VALUE_FIELD: old,
                    NEW_VALUE_FIELD: new,
                }),
                _ => {
                    warn!(table, "Update without pre- or post-image, skipping");
                    None
                }
            }
        }
        OperationType::Delete => event
            .full_document_before_change
            .or(event.document_key)
            .map(|old| doc! { TYPE_FIELD: "remove", OLD_VALUE_FIELD: old }),
        OperationType::Drop
        | OperationType::DropDatabase
        | OperationType::Rename
        | OperationType::Invalidate => {
            warn!(table, operation = ?event.operation_type, "Watched collection is gone");
            return Err(StreamFault::TableDropped {
                table: table.to_string(),
            });
        }
        other => {
            debug!(table, operation = ?other, "Ignoring change stream event");
            None
        }
    };

    Ok(record)
}
