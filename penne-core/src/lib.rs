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

//! Penne Core - typed change feeds for document databases
//!
//! This crate turns a live stream of change records into strongly-typed
//! values delivered through listener callbacks.
//!
//! # Key Components
//!
//! - **Binding**: [`binding`] declares how the fields of a target type are read from a document
//! - **Coercion**: [`coerce`] converts raw values into explicitly requested scalar and array types
//! - **Mapping**: [`mapper`] builds target values from documents using their bindings
//! - **Events**: [`event`] classifies raw change records
//! - **Listener**: [`listener`] is the callback contract that receives typed events
//! - **Sources**: [`source`] abstracts the connection and cursor producing raw records
//! - **Worker**: [`worker`] drives a cursor on a background task and dispatches events
//!
//! # Example
//!
//! ```rust
//! use penne_core::binding::{CastType, FieldBinding, Mappable};
//! use penne_core::mapper;
//! use bson::doc;
//! use std::sync::OnceLock;
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     id: String,
//!     age: i32,
//! }
//!
//! impl Mappable for User {
//!     const TABLE: Option<&'static str> = Some("users");
//!
//!     fn bindings() -> &'static [FieldBinding<Self>] {
//!         static BINDINGS: OnceLock<Vec<FieldBinding<User>>> = OnceLock::new();
//!         BINDINGS.get_or_init(|| {
//!             vec![
//!                 FieldBinding::value("id", |user: &mut User, id: String| user.id = id),
//!                 FieldBinding::value("age", |user: &mut User, age: i32| user.age = age)
//!                     .cast(CastType::Int),
//!             ]
//!         })
//!     }
//! }
//!
//! let user: User = mapper::map(&doc! { "id": "u1", "age": "20" }).unwrap();
//! assert_eq!(user.age, 20);
//! ```

pub mod binding;
pub mod coerce;
pub mod event;
pub mod listener;
pub mod mapper;
pub mod metrics;
pub mod source;
pub mod value;
pub mod worker;
