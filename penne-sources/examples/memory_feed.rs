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

//! Scripted In-Memory Change Feed
//!
//! Drives a worker from an in-memory feed and logs every typed event. No
//! database is required.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run -p penne-sources --example memory_feed
//! ```

use bson::doc;
use penne_core::binding::{CastType, FieldBinding, Mappable};
use penne_core::listener::ChangeFeedListener;
use penne_core::mapper::MappingError;
use penne_core::source::TableRef;
use penne_core::worker::{ChangeFeedWorker, WorkerConfig};
use penne_sources::memory::MemoryConnection;
use std::error::Error;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Default)]
struct User {
    id: String,
    name: String,
    age: i32,
}

impl Mappable for User {
    const TABLE: Option<&'static str> = Some("users");

    fn bindings() -> &'static [FieldBinding<Self>] {
        static BINDINGS: OnceLock<Vec<FieldBinding<User>>> = OnceLock::new();
        BINDINGS.get_or_init(|| {
            vec![
                FieldBinding::value("id", |u: &mut User, id: String| u.id = id),
                FieldBinding::value("name", |u: &mut User, name: String| u.name = name),
                FieldBinding::value("age", |u: &mut User, age: i32| u.age = age)
                    .cast(CastType::Int),
            ]
        })
    }
}

/// Logs every event
struct LoggingListener;

impl ChangeFeedListener<User> for LoggingListener {
    fn on_initializing_state(&mut self) {
        info!("Loading initial users");
    }

    fn on_ready_state(&mut self) {
        info!("Initial users loaded, watching for changes");
    }

    fn on_initial(&mut self, value: User) {
        info!(id = %value.id, name = %value.name, age = value.age, "Existing user");
    }

    fn on_add(&mut self, value: User) {
        info!(id = %value.id, name = %value.name, age = value.age, "User added");
    }

    fn on_change(&mut self, old_value: User, new_value: User) {
        info!(id = %new_value.id, from = old_value.age, to = new_value.age, "User changed");
    }

    fn on_remove(&mut self, value: User) {
        info!(id = %value.id, "User removed");
    }

    fn on_error(&mut self, error: &MappingError) {
        warn!(%error, "Dropped a record");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let connection = MemoryConnection::new().with_database("demo");
    let feed = connection.feed(&TableRef::new("demo", "users")).await;

    feed.initializing();
    feed.initial(doc! { "id": "u1", "name": "Robin", "age": "20" });
    feed.ready();
    feed.add(doc! { "id": "u2", "name": "Sam", "age": 31 });
    feed.change(
        doc! { "id": "u2", "name": "Sam", "age": 31 },
        doc! { "id": "u2", "name": "Sam", "age": 32 },
    );
    feed.add(doc! { "id": "u3", "name": "Kai" });
    feed.remove(doc! { "id": "u1", "name": "Robin", "age": 20 });

    let config = WorkerConfig::builder()
        .pull_timeout(Duration::from_millis(200))
        .build()?;
    let mut worker = ChangeFeedWorker::<User>::start(&connection, config, LoggingListener).await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    worker.close().await?;

    let stats = worker.stats();
    info!(
        dispatched = stats.events_dispatched,
        failures = stats.mapping_failures,
        "Worker closed"
    );

    Ok(())
}

/// Initialize structured logging
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,penne_core=debug,penne_sources=debug"));

    fmt().with_env_filter(filter).with_target(false).init();
}
