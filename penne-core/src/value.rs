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

//! Structural conversion from raw document values into field types.
//!
//! [`FromBson`] is what lets a binding assign a value "as-is": the value must
//! already have a shape compatible with the field. Integers convert between
//! widths when they fit; nothing else is reinterpreted. Explicit
//! reinterpretation is the job of [`crate::coerce`].

use bson::spec::ElementType;
use bson::{Bson, Document};
use thiserror::Error;

/// Error returned when a value does not fit the field it is assigned to.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    /// The value has an incompatible type
    #[error("expected {expected}, found {found:?}")]
    Mismatch {
        expected: &'static str,
        found: ElementType,
    },

    /// An integer does not fit the target width
    #[error("integer {value} is out of range for {expected}")]
    OutOfRange { expected: &'static str, value: i64 },
}

impl ValueError {
    fn mismatch(expected: &'static str, found: &Bson) -> Self {
        Self::Mismatch {
            expected,
            found: found.element_type(),
        }
    }
}

/// Conversion from an owned [`Bson`] value.
pub trait FromBson: Sized {
    /// Converts `value`, failing if its shape does not match `Self`.
    fn from_bson(value: Bson) -> Result<Self, ValueError>;
}

impl FromBson for Bson {
    fn from_bson(value: Bson) -> Result<Self, ValueError> {
        Ok(value)
    }
}

impl FromBson for Document {
    fn from_bson(value: Bson) -> Result<Self, ValueError> {
        match value {
            Bson::Document(document) => Ok(document),
            other => Err(ValueError::mismatch("document", &other)),
        }
    }
}

impl FromBson for String {
    fn from_bson(value: Bson) -> Result<Self, ValueError> {
        match value {
            Bson::String(s) => Ok(s),
            other => Err(ValueError::mismatch("string", &other)),
        }
    }
}

impl FromBson for bool {
    fn from_bson(value: Bson) -> Result<Self, ValueError> {
        match value {
            Bson::Boolean(b) => Ok(b),
            other => Err(ValueError::mismatch("boolean", &other)),
        }
    }
}

fn integer(value: &Bson, expected: &'static str) -> Result<i64, ValueError> {
    match value {
        Bson::Int32(n) => Ok(i64::from(*n)),
        Bson::Int64(n) => Ok(*n),
        other => Err(ValueError::mismatch(expected, other)),
    }
}

macro_rules! impl_from_bson_int {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromBson for $ty {
                fn from_bson(value: Bson) -> Result<Self, ValueError> {
                    let n = integer(&value, $name)?;
                    <$ty>::try_from(n).map_err(|_| ValueError::OutOfRange {
                        expected: $name,
                        value: n,
                    })
                }
            }
        )*
    };
}

impl_from_bson_int!(i8 => "byte", i16 => "short", i32 => "int", i64 => "long");

impl FromBson for f64 {
    fn from_bson(value: Bson) -> Result<Self, ValueError> {
        match value {
            Bson::Double(d) => Ok(d),
            Bson::Int32(n) => Ok(f64::from(n)),
            Bson::Int64(n) => Ok(n as f64),
            other => Err(ValueError::mismatch("double", &other)),
        }
    }
}

impl FromBson for f32 {
    fn from_bson(value: Bson) -> Result<Self, ValueError> {
        match value {
            Bson::Double(d) => Ok(d as f32),
            Bson::Int32(n) => Ok(n as f32),
            Bson::Int64(n) => Ok(n as f32),
            other => Err(ValueError::mismatch("float", &other)),
        }
    }
}

impl<T: FromBson> FromBson for Vec<T> {
    fn from_bson(value: Bson) -> Result<Self, ValueError> {
        match value {
            Bson::Array(items) => items.into_iter().map(T::from_bson).collect(),
            other => Err(ValueError::mismatch("array", &other)),
        }
    }
}

impl<T: FromBson> FromBson for Option<T> {
    fn from_bson(value: Bson) -> Result<Self, ValueError> {
        match value {
            Bson::Null => Ok(None),
            other => T::from_bson(other).map(Some),
        }
    }
}
