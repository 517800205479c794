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

//! Document to typed value mapping.
//!
//! [`map`] builds a fresh instance of a [`Mappable`] type from a document by
//! walking the type's binding table:
//!
//! 1. Start from `T::default()`
//! 2. For each binding, walk `path` from the document and read `key`
//! 3. Apply the binding's cast, if any
//! 4. Expand nested mappable types (root-flattened ones from the same document)
//! 5. Assign the value
//!
//! Any failure aborts the whole call; partially populated values are never
//! returned. The input document is only borrowed.

use crate::binding::{FieldBinding, Mappable};
use crate::coerce::{coerce, CoercionError};
use crate::value::ValueError;
use bson::spec::ElementType;
use bson::{Bson, Document};
use thiserror::Error;

/// Errors that can occur while mapping a document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    /// A bound key, or one of the sub-documents on its path, is missing
    #[error("Invalid key \"{key}\" in path {path:?} in object {document}")]
    MissingKey {
        key: String,
        path: Vec<String>,
        document: Document,
    },

    /// An explicit cast failed
    #[error("Failed to coerce field \"{field}\": {source}")]
    Coercion {
        field: &'static str,
        source: CoercionError,
    },

    /// The value does not fit the field
    #[error("Cannot assign field \"{field}\": {source}")]
    Assign {
        field: &'static str,
        source: ValueError,
    },

    /// A nested mappable field did not hold a document
    #[error("Field \"{field}\" expects a nested document, found {found:?}")]
    NotADocument {
        field: &'static str,
        found: ElementType,
    },
}

impl MappingError {
    fn missing<T>(binding: &FieldBinding<T>, document: &Document) -> Self {
        Self::MissingKey {
            key: binding.resolved_key().to_string(),
            path: binding.path.iter().map(|p| (*p).to_string()).collect(),
            document: document.clone(),
        }
    }

    /// Returns the error category for metrics/logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingKey { .. } => "missing_key",
            Self::Coercion { .. } => "coercion",
            Self::Assign { .. } => "assign",
            Self::NotADocument { .. } => "not_a_document",
        }
    }
}

/// Maps `document` into a new `T`.
///
/// # Errors
///
/// - [`MappingError::MissingKey`] if a bound key or path segment is absent
/// - [`MappingError::Coercion`] if an explicit cast fails
/// - [`MappingError::Assign`] if a value does not fit its field
/// - [`MappingError::NotADocument`] if a nested field is not a document
///
/// # Examples
///
/// ```rust
/// use penne_core::binding::{FieldBinding, Mappable};
/// use penne_core::mapper::{self, MappingError};
/// use bson::doc;
/// use std::sync::OnceLock;
///
/// #[derive(Debug, Default)]
/// struct Tag {
///     name: String,
/// }
///
/// impl Mappable for Tag {
///     fn bindings() -> &'static [FieldBinding<Self>] {
///         static BINDINGS: OnceLock<Vec<FieldBinding<Tag>>> = OnceLock::new();
///         BINDINGS.get_or_init(|| vec![FieldBinding::value("name", |t: &mut Tag, v: String| t.name = v)])
///     }
/// }
///
/// let tag: Tag = mapper::map(&doc! { "name": "rust" }).unwrap();
/// assert_eq!(tag.name, "rust");
///
/// let err = mapper::map::<Tag>(&doc! { "label": "rust" }).unwrap_err();
/// assert!(matches!(err, MappingError::MissingKey { .. }));
/// ```
pub fn map<T: Mappable>(document: &Document) -> Result<T, MappingError> {
    let mut instance = T::default();

    for binding in T::bindings() {
        let raw = resolve(document, binding)?;

        let value = match binding.cast {
            Some(cast) => coerce(raw.clone(), cast).map_err(|source| MappingError::Coercion {
                field: binding.field,
                source,
            })?,
            None => raw.clone(),
        };

        binding.assign(&mut instance, document, value)?;
    }

    Ok(instance)
}

/// Finds the raw value a binding reads.
fn resolve<'d, T>(
    document: &'d Document,
    binding: &FieldBinding<T>,
) -> Result<&'d Bson, MappingError> {
    let mut scope = document;
    for segment in binding.path {
        scope = match scope.get(*segment) {
            Some(Bson::Document(inner)) => inner,
            _ => return Err(MappingError::missing(binding, document)),
        };
    }

    scope
        .get(binding.resolved_key())
        .ok_or_else(|| MappingError::missing(binding, document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::CastType;
    use bson::doc;
    use std::sync::OnceLock;

    #[derive(Debug, Default, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
        label: Option<String>,
    }

    impl Mappable for Point {
        fn bindings() -> &'static [FieldBinding<Self>] {
            static BINDINGS: OnceLock<Vec<FieldBinding<Point>>> = OnceLock::new();
            BINDINGS.get_or_init(|| {
                vec![
                    FieldBinding::value("x", |p: &mut Point, x: i64| p.x = x).path(&["position"]),
                    FieldBinding::value("y", |p: &mut Point, y: i64| p.y = y)
                        .path(&["position"])
                        .cast(CastType::Long),
                    FieldBinding::value("label", |p: &mut Point, label: Option<String>| {
                        p.label = label;
                    })
                    .key("name"),
                ]
            })
        }
    }

    #[test]
    fn test_path_and_key_resolution() {
        let point: Point = map(&doc! {
            "position": { "x": 3, "y": "4" },
            "name": null,
        })
        .unwrap();

        assert_eq!(
            point,
            Point {
                x: 3,
                y: 4,
                label: None
            }
        );
    }

    #[test]
    fn test_missing_intermediate_path() {
        let err = map::<Point>(&doc! { "name": "origin" }).unwrap_err();
        match err {
            MappingError::MissingKey { key, path, .. } => {
                assert_eq!(key, "x");
                assert_eq!(path, vec!["position".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_path_through_non_document() {
        let err = map::<Point>(&doc! { "position": 12, "name": "origin" }).unwrap_err();
        assert_eq!(err.category(), "missing_key");
    }

    #[test]
    fn test_missing_key_message() {
        let err = map::<Point>(&doc! { "position": { "x": 1, "y": 2 } }).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Invalid key \"name\" in path []"));
        assert!(message.contains("position"));
    }

    #[test]
    fn test_assign_mismatch() {
        let err = map::<Point>(&doc! {
            "position": { "x": "3", "y": 4 },
            "name": "a",
        })
        .unwrap_err();
        assert!(matches!(err, MappingError::Assign { field: "x", .. }));
    }

    #[test]
    fn test_input_is_untouched() {
        let document = doc! { "position": { "x": 1, "y": "2" }, "name": "p" };
        let before = document.clone();
        let _ = map::<Point>(&document).unwrap();
        assert_eq!(document, before);
    }
}
