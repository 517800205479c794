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

#![cfg(feature = "mongodb-source")]

//! MongoDB change feed tests.
//!
//! These need a replica set. Run them with:
//!
//! ```bash
//! MONGODB_URI="mongodb://localhost:27017/?replicaSet=rs0&directConnection=true" \
//!     cargo test -p penne-sources --features mongodb-source -- --ignored
//! ```

use bson::{doc, Document};
use penne_core::source::{ChangeFeedOptions, Connection, FeedCursor, StreamFault, TableRef};
use penne_sources::mongodb::MongoConnection;
use std::time::Duration;

async fn connect() -> MongoConnection {
    let uri = std::env::var("MONGODB_URI").unwrap_or_else(|_| {
        "mongodb://localhost:27017/?replicaSet=rs0&directConnection=true".to_string()
    });
    MongoConnection::connect(&uri).await.expect("Failed to connect to MongoDB")
}

/// Creates an empty collection with pre-images enabled.
async fn fresh_table(connection: &MongoConnection, name: &str) -> TableRef {
    let table = TableRef::new("penne_test", name);
    let database = connection.client().database(&table.database);
    let _ = database.collection::<Document>(name).drop().await;
    database
        .run_command(doc! {
            "create": name,
            "changeStreamPreAndPostImages": { "enabled": true },
        })
        .await
        .expect("Failed to create collection");
    table
}

async fn pull(cursor: &mut Box<dyn FeedCursor>) -> Result<Document, StreamFault> {
    loop {
        let record = tokio::time::timeout(Duration::from_secs(10), cursor.next())
            .await
            .expect("no record within 10s")?;
        if let Some(record) = record {
            return Ok(record);
        }
    }
}

#[tokio::test]
#[ignore = "requires a MongoDB replica set"]
async fn test_initial_values_then_changes() {
    let connection = connect().await;
    let table = fresh_table(&connection, "initial_then_changes").await;
    let collection = connection
        .client()
        .database(&table.database)
        .collection::<Document>(&table.table);

    collection.insert_one(doc! { "_id": 1, "name": "Robin" }).await.unwrap();

    let mut cursor = connection
        .open_changes(&table, &ChangeFeedOptions::all())
        .await
        .unwrap();

    assert_eq!(pull(&mut cursor).await.unwrap(), doc! { "type": "state", "state": "initializing" });
    let initial = pull(&mut cursor).await.unwrap();
    assert_eq!(initial.get_str("type").unwrap(), "initial");
    assert_eq!(initial.get_document("new_val").unwrap().get_str("name").unwrap(), "Robin");
    assert_eq!(pull(&mut cursor).await.unwrap(), doc! { "type": "state", "state": "ready" });

    collection.insert_one(doc! { "_id": 2, "name": "Sam" }).await.unwrap();
    collection
        .update_one(doc! { "_id": 2 }, doc! { "$set": { "name": "Sammy" } })
        .await
        .unwrap();
    collection.delete_one(doc! { "_id": 1 }).await.unwrap();

    let add = pull(&mut cursor).await.unwrap();
    assert_eq!(add.get_str("type").unwrap(), "add");

    let change = pull(&mut cursor).await.unwrap();
    assert_eq!(change.get_str("type").unwrap(), "change");
    assert_eq!(change.get_document("old_val").unwrap().get_str("name").unwrap(), "Sam");
    assert_eq!(change.get_document("new_val").unwrap().get_str("name").unwrap(), "Sammy");

    let remove = pull(&mut cursor).await.unwrap();
    assert_eq!(remove.get_str("type").unwrap(), "remove");
    assert_eq!(remove.get_document("old_val").unwrap().get_str("name").unwrap(), "Robin");

    cursor.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a MongoDB replica set"]
async fn test_drop_reports_table_dropped() {
    let connection = connect().await;
    let table = fresh_table(&connection, "dropped").await;

    let options = ChangeFeedOptions {
        include_initial: false,
        include_states: false,
        include_types: true,
    };
    let mut cursor = connection.open_changes(&table, &options).await.unwrap();

    connection
        .client()
        .database(&table.database)
        .collection::<Document>(&table.table)
        .drop()
        .await
        .unwrap();

    let fault = pull(&mut cursor).await.unwrap_err();
    assert!(fault.is_table_drop());
}
