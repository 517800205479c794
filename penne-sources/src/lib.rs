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

//! Change feed sources for Penne.
//!
//! This crate provides implementations of the
//! [`Connection`](penne_core::source::Connection) and
//! [`FeedCursor`](penne_core::source::FeedCursor) traits.
//!
//! # Available Sources
//!
//! - **Memory**: scripted in-process feeds, for tests and local development
//! - **MongoDB** (`mongodb-source` feature): change streams on a replica set
//!
//! # Feature Flags
//!
//! - `mongodb-source`: Enables the MongoDB-backed source (requires a replica set)
//!
//! # Example: Memory Source
//!
//! ```rust
//! use penne_sources::memory::MemoryConnection;
//! use penne_core::source::{ChangeFeedOptions, Connection, TableRef};
//! use bson::doc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = MemoryConnection::new().with_database("shop");
//! let table = TableRef::new("shop", "items");
//!
//! let feed = connection.feed(&table).await;
//! feed.add(doc! { "id": "a", "qty": 1 });
//!
//! let mut cursor = connection.open_changes(&table, &ChangeFeedOptions::all()).await?;
//! let record = cursor.next().await?;
//! assert!(record.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod memory;

#[cfg(feature = "mongodb-source")]
pub mod mongodb;
