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

//! Shared fixtures for the Penne benchmarks.

use bson::{doc, Bson, Document};
use penne_core::binding::{CastType, FieldBinding, Mappable};
use std::sync::OnceLock;

/// Contact details flattened into the enclosing document.
#[derive(Debug, Default)]
pub struct Contact {
    pub email: String,
    pub city: String,
}

impl Mappable for Contact {
    const AS_ROOT: bool = true;

    fn bindings() -> &'static [FieldBinding<Self>] {
        static BINDINGS: OnceLock<Vec<FieldBinding<Contact>>> = OnceLock::new();
        BINDINGS.get_or_init(|| {
            vec![
                FieldBinding::value("email", |c: &mut Contact, v: String| c.email = v)
                    .path(&["contact"]),
                FieldBinding::value("city", |c: &mut Contact, v: String| c.city = v)
                    .path(&["contact", "address"]),
            ]
        })
    }
}

/// Benchmark target type covering keys, paths, casts and nesting.
#[derive(Debug, Default)]
pub struct Profile {
    pub id: String,
    pub age: i32,
    pub score: f64,
    pub active: bool,
    pub tags: Vec<String>,
    pub contact: Contact,
}

impl Mappable for Profile {
    const TABLE: Option<&'static str> = Some("profiles");

    fn bindings() -> &'static [FieldBinding<Self>] {
        static BINDINGS: OnceLock<Vec<FieldBinding<Profile>>> = OnceLock::new();
        BINDINGS.get_or_init(|| {
            vec![
                FieldBinding::value("id", |p: &mut Profile, v: String| p.id = v).key("_id"),
                FieldBinding::value("age", |p: &mut Profile, v: i32| p.age = v).cast(CastType::Int),
                FieldBinding::value("score", |p: &mut Profile, v: f64| p.score = v)
                    .cast(CastType::Double),
                FieldBinding::value("active", |p: &mut Profile, v: bool| p.active = v)
                    .cast(CastType::Boolean),
                FieldBinding::value("tags", |p: &mut Profile, v: Vec<String>| p.tags = v)
                    .cast(CastType::Array(&CastType::String)),
                FieldBinding::object("contact", |p: &mut Profile, v: Contact| p.contact = v),
            ]
        })
    }
}

/// Creates a profile document; odd indexes carry values that need coercion.
#[must_use]
pub fn profile_document(i: usize) -> Document {
    let (age, score, active) = if i % 2 == 1 {
        (Bson::String("42".into()), Bson::Int64(7), Bson::String("TRUE".into()))
    } else {
        (Bson::Int32(42), Bson::Double(7.5), Bson::Boolean(true))
    };

    doc! {
        "_id": format!("p{i}"),
        "age": age,
        "score": score,
        "active": active,
        "tags": ["a", 1, true],
        "contact": {
            "email": format!("p{i}@example.com"),
            "address": { "city": "Lisbon" },
        },
    }
}
