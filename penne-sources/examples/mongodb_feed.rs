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

//! MongoDB Change Feed
//!
//! Watches `testdb.users` and logs every typed event until Ctrl+C.
//!
//! # Prerequisites
//!
//! A replica set with pre-images enabled on the collection:
//!
//! ```bash
//! docker exec mongodb mongosh testdb --eval '
//!   db.createCollection("users", { changeStreamPreAndPostImages: { enabled: true } })
//! '
//! ```
//!
//! # Running the Example
//!
//! ```bash
//! cargo run -p penne-sources --example mongodb_feed --features mongodb-source
//! ```

use penne_core::binding::{FieldBinding, Mappable};
use penne_core::listener::ChangeFeedListener;
use penne_core::worker::{ChangeFeedWorker, WorkerConfig};
use penne_sources::mongodb::MongoConnection;
use std::error::Error;
use std::sync::OnceLock;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Default)]
struct User {
    name: String,
    email: Option<String>,
}

impl Mappable for User {
    const TABLE: Option<&'static str> = Some("users");

    fn bindings() -> &'static [FieldBinding<Self>] {
        static BINDINGS: OnceLock<Vec<FieldBinding<User>>> = OnceLock::new();
        BINDINGS.get_or_init(|| {
            vec![
                FieldBinding::value("name", |u: &mut User, name: String| u.name = name),
                FieldBinding::value("email", |u: &mut User, email: Option<String>| u.email = email),
            ]
        })
    }
}

struct ConsoleListener;

impl ChangeFeedListener<User> for ConsoleListener {
    fn on_initializing_state(&mut self) {
        info!("Initializing");
    }
    fn on_ready_state(&mut self) {
        info!("Ready");
    }
    fn on_initial(&mut self, value: User) {
        info!(?value, "Initial");
    }
    fn on_add(&mut self, value: User) {
        info!(?value, "Add");
    }
    fn on_change(&mut self, old_value: User, new_value: User) {
        info!(?old_value, ?new_value, "Change");
    }
    fn on_remove(&mut self, value: User) {
        info!(?value, "Remove");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let uri = std::env::var("MONGODB_URI").unwrap_or_else(|_| {
        "mongodb://localhost:27017/testdb?replicaSet=rs0&directConnection=true".to_string()
    });
    let connection = MongoConnection::connect(&uri).await?;

    let mut worker =
        ChangeFeedWorker::<User>::start(&connection, WorkerConfig::default(), ConsoleListener)
            .await?;
    info!(table = %worker.table().full_name(), "Watching, press Ctrl+C to stop");

    signal::ctrl_c().await?;
    worker.close().await?;

    Ok(())
}
