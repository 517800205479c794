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

//! Declarative field bindings for mappable types.
//!
//! A type becomes mappable by implementing [`Mappable`] and returning a static
//! table of [`FieldBinding`]s. Each binding names the document key a field is
//! read from, the path of sub-documents leading to that key, an optional
//! explicit [`CastType`], and how the value is stored on the target.
//!
//! # Binding Table
//!
//! ```text
//! Document                         FieldBinding<User>
//! ────────                         ──────────────────
//! { "id": "u1",          ◄──────── value("uuid").key("id")
//!   "age": "20",         ◄──────── value("age").cast(Int)
//!   "contact": {                   object::<Contact>("contact")
//!       "email": ...     ◄──────── (Contact) value("email").path(&["contact"])
//!   } }
//! ```
//!
//! Bindings are built once per type, usually inside a [`std::sync::OnceLock`],
//! and are read-only afterwards.
//!
//! # Root-Flattened Objects
//!
//! A nested type that sets [`Mappable::AS_ROOT`] is not mapped from the raw
//! value under its parent's key. It is mapped from the same document its
//! parent was mapped from, so its own bindings use `path` entries to reach
//! their data.

use crate::mapper::{self, MappingError};
use crate::value::FromBson;
use bson::{Bson, Document};
use std::fmt;

/// Explicit target representation for a bound value.
///
/// When a binding carries a cast type, the raw document value is coerced with
/// [`crate::coerce::coerce`] before it is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastType {
    /// 8-bit signed integer
    Byte,
    /// 16-bit signed integer
    Short,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Text
    String,
    /// Boolean
    Boolean,
    /// Array whose elements are coerced into the given type
    Array(&'static CastType),
}

impl CastType {
    /// Returns true for the integral and floating point casts.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CastType::Byte
                | CastType::Short
                | CastType::Int
                | CastType::Long
                | CastType::Float
                | CastType::Double
        )
    }
}

impl fmt::Display for CastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CastType::Byte => f.write_str("byte"),
            CastType::Short => f.write_str("short"),
            CastType::Int => f.write_str("int"),
            CastType::Long => f.write_str("long"),
            CastType::Float => f.write_str("float"),
            CastType::Double => f.write_str("double"),
            CastType::String => f.write_str("string"),
            CastType::Boolean => f.write_str("boolean"),
            CastType::Array(element) => write!(f, "{element}[]"),
        }
    }
}

/// Stores a resolved value on the target.
///
/// Receives the target, the document the target is being mapped from, and the
/// (possibly coerced) raw value found at the binding's key.
type Assign<T> = Box<dyn Fn(&mut T, &Document, Bson) -> Result<(), MappingError> + Send + Sync>;

/// Binding metadata for one field of a mappable type.
pub struct FieldBinding<T> {
    /// Name of the field on the target type
    pub field: &'static str,

    /// Explicit document key; the field name is used when absent
    pub key: Option<&'static str>,

    /// Keys leading from the mapped document to the sub-document holding `key`
    pub path: &'static [&'static str],

    /// Explicit cast applied before nested expansion and assignment
    pub cast: Option<CastType>,

    nested: bool,
    assign: Assign<T>,
}

impl<T: 'static> FieldBinding<T> {
    /// Binds a field whose value is converted structurally with [`FromBson`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use penne_core::binding::{CastType, FieldBinding};
    ///
    /// #[derive(Default)]
    /// struct User {
    ///     hobbies: Vec<String>,
    /// }
    ///
    /// let binding = FieldBinding::value("hobbies", |user: &mut User, hobbies: Vec<String>| {
    ///     user.hobbies = hobbies;
    /// })
    /// .cast(CastType::Array(&CastType::String));
    ///
    /// assert_eq!(binding.resolved_key(), "hobbies");
    /// ```
    pub fn value<V>(field: &'static str, setter: fn(&mut T, V)) -> Self
    where
        V: FromBson + 'static,
    {
        Self {
            field,
            key: None,
            path: &[],
            cast: None,
            nested: false,
            assign: Box::new(move |target: &mut T, _root: &Document, raw: Bson| {
                let value =
                    V::from_bson(raw).map_err(|source| MappingError::Assign { field, source })?;
                setter(target, value);
                Ok(())
            }),
        }
    }

    /// Binds a field whose type is itself mappable.
    ///
    /// The nested value is mapped recursively. When `N::AS_ROOT` is set it is
    /// mapped from the parent's document; otherwise the raw value at this
    /// binding's key must be a document and is mapped instead.
    pub fn object<N>(field: &'static str, setter: fn(&mut T, N)) -> Self
    where
        N: Mappable,
    {
        Self {
            field,
            key: None,
            path: &[],
            cast: None,
            nested: true,
            assign: Box::new(move |target: &mut T, root: &Document, raw: Bson| {
                let nested = if N::AS_ROOT {
                    mapper::map::<N>(root)?
                } else {
                    match raw {
                        Bson::Document(document) => mapper::map::<N>(&document)?,
                        other => {
                            return Err(MappingError::NotADocument {
                                field,
                                found: other.element_type(),
                            })
                        }
                    }
                };
                setter(target, nested);
                Ok(())
            }),
        }
    }

    /// Reads the field from `key` instead of the field name.
    #[must_use]
    pub fn key(mut self, key: &'static str) -> Self {
        self.key = Some(key);
        self
    }

    /// Reads the field from the sub-document reached by walking `path`.
    #[must_use]
    pub fn path(mut self, path: &'static [&'static str]) -> Self {
        self.path = path;
        self
    }

    /// Coerces the raw value into `cast` before assignment.
    #[must_use]
    pub fn cast(mut self, cast: CastType) -> Self {
        self.cast = Some(cast);
        self
    }
}

impl<T> FieldBinding<T> {
    /// Returns the document key this binding reads.
    #[inline]
    pub fn resolved_key(&self) -> &'static str {
        self.key.unwrap_or(self.field)
    }

    /// Returns true if the bound field is a nested mappable type.
    #[inline]
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub(crate) fn assign(
        &self,
        target: &mut T,
        root: &Document,
        value: Bson,
    ) -> Result<(), MappingError> {
        (self.assign)(target, root, value)
    }
}

impl<T> fmt::Debug for FieldBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldBinding")
            .field("field", &self.field)
            .field("key", &self.resolved_key())
            .field("path", &self.path)
            .field("cast", &self.cast)
            .field("nested", &self.nested)
            .finish()
    }
}

/// A type that can be built from a document.
///
/// Instances start from [`Default`] and are populated field by field from
/// the binding table returned by [`Mappable::bindings`].
///
/// # Example
///
/// ```rust
/// use penne_core::binding::{FieldBinding, Mappable};
/// use std::sync::OnceLock;
///
/// #[derive(Debug, Default)]
/// struct Contact {
///     email: String,
/// }
///
/// impl Mappable for Contact {
///     const AS_ROOT: bool = true;
///
///     fn bindings() -> &'static [FieldBinding<Self>] {
///         static BINDINGS: OnceLock<Vec<FieldBinding<Contact>>> = OnceLock::new();
///         BINDINGS.get_or_init(|| {
///             vec![FieldBinding::value("email", |c: &mut Contact, email: String| c.email = email)
///                 .path(&["contact"])]
///         })
///     }
/// }
/// ```
pub trait Mappable: Default + Send + 'static {
    /// Map nested occurrences of this type from the enclosing document.
    const AS_ROOT: bool = false;

    /// Table this type is stored in, used when a worker is not given one.
    const TABLE: Option<&'static str> = None;

    /// Returns the binding table of this type.
    fn bindings() -> &'static [FieldBinding<Self>];
}
