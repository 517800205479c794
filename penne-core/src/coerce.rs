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

//! Explicit type coercion for bound values.
//!
//! [`coerce`] converts a raw value into the representation requested by a
//! binding's [`CastType`]. Only the combinations below are converted; any other
//! combination returns the value unchanged.
//!
//! | From    | To                      | Result                                        |
//! |---------|-------------------------|-----------------------------------------------|
//! | number  | byte/short/int/long     | truncated and narrowed (wrapping)             |
//! | number  | float/double            | widened or rounded                            |
//! | number  | string                  | decimal text                                  |
//! | number  | boolean                 | `true` iff the integral value equals 1        |
//! | boolean | string                  | `"true"` / `"false"`                          |
//! | boolean | any numeric             | `1` / `0`                                     |
//! | string  | boolean                 | only `"true"` / `"false"`, case-insensitive   |
//! | string  | any numeric             | parsed, [`CoercionError`] if it cannot be     |
//! | array   | array of `T`            | elementwise                                   |
//!
//! Integral outputs are stored as `Int32` (byte, short, int) or `Int64` (long);
//! floating outputs are stored as `Double`.

use crate::binding::CastType;
use bson::Bson;
use thiserror::Error;

/// Error raised when an explicit cast cannot convert a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    /// A string could not be parsed as the requested numeric type
    #[error("cannot parse {input:?} as {cast}")]
    Parse { input: String, cast: CastType },
}

/// Numeric view of a BSON value.
#[derive(Debug, Clone, Copy)]
enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(n) => Some(Number::Integer(i64::from(*n))),
            Bson::Int64(n) => Some(Number::Integer(*n)),
            Bson::Double(d) => Some(Number::Float(*d)),
            _ => None,
        }
    }

    /// Truncates to a 32-bit integer: integers wrap, floats saturate.
    fn as_i32(self) -> i32 {
        match self {
            Number::Integer(n) => n as i32,
            Number::Float(d) => d as i32,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Number::Integer(n) => n,
            Number::Float(d) => d as i64,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Integer(n) => n as f64,
            Number::Float(d) => d,
        }
    }

    fn to_text(self) -> String {
        match self {
            Number::Integer(n) => n.to_string(),
            Number::Float(d) => d.to_string(),
        }
    }
}

/// Coerces `value` into the representation requested by `cast`.
///
/// # Errors
///
/// Returns [`CoercionError::Parse`] when a string cannot be parsed as the
/// requested numeric type, including inside an array.
///
/// # Examples
///
/// ```rust
/// use penne_core::binding::CastType;
/// use penne_core::coerce::coerce;
/// use bson::Bson;
///
/// assert_eq!(coerce(Bson::String("20".into()), CastType::Int).unwrap(), Bson::Int32(20));
/// assert_eq!(coerce(Bson::Boolean(true), CastType::String).unwrap(), Bson::String("true".into()));
///
/// // Strings other than "true"/"false" are left alone
/// assert_eq!(
///     coerce(Bson::String("yes".into()), CastType::Boolean).unwrap(),
///     Bson::String("yes".into())
/// );
/// ```
pub fn coerce(value: Bson, cast: CastType) -> Result<Bson, CoercionError> {
    if let Some(number) = Number::of(&value) {
        return Ok(coerce_number(number, cast).unwrap_or(value));
    }

    match value {
        Bson::Boolean(b) => Ok(coerce_boolean(b, cast).unwrap_or(Bson::Boolean(b))),
        Bson::String(s) => match coerce_string(&s, cast)? {
            Some(coerced) => Ok(coerced),
            None => Ok(Bson::String(s)),
        },
        Bson::Array(items) => match cast {
            CastType::Array(element) => items
                .into_iter()
                .map(|item| coerce(item, *element))
                .collect::<Result<Vec<_>, _>>()
                .map(Bson::Array),
            _ => Ok(Bson::Array(items)),
        },
        other => Ok(other),
    }
}

fn coerce_number(number: Number, cast: CastType) -> Option<Bson> {
    let coerced = match cast {
        CastType::Byte => Bson::Int32(i32::from(number.as_i32() as i8)),
        CastType::Short => Bson::Int32(i32::from(number.as_i32() as i16)),
        CastType::Int => Bson::Int32(number.as_i32()),
        CastType::Long => Bson::Int64(number.as_i64()),
        CastType::Float => Bson::Double(f64::from(number.as_f64() as f32)),
        CastType::Double => Bson::Double(number.as_f64()),
        CastType::String => Bson::String(number.to_text()),
        CastType::Boolean => Bson::Boolean(number.as_i32() == 1),
        CastType::Array(_) => return None,
    };
    Some(coerced)
}

fn coerce_boolean(b: bool, cast: CastType) -> Option<Bson> {
    let bit = i32::from(b);
    let coerced = match cast {
        CastType::String => Bson::String(b.to_string()),
        CastType::Byte | CastType::Short | CastType::Int => Bson::Int32(bit),
        CastType::Long => Bson::Int64(i64::from(bit)),
        CastType::Float | CastType::Double => Bson::Double(f64::from(bit)),
        CastType::Boolean | CastType::Array(_) => return None,
    };
    Some(coerced)
}

fn coerce_string(s: &str, cast: CastType) -> Result<Option<Bson>, CoercionError> {
    let parse_error = || CoercionError::Parse {
        input: s.to_string(),
        cast,
    };

    let coerced = match cast {
        CastType::Boolean => {
            if s.eq_ignore_ascii_case("true") {
                Bson::Boolean(true)
            } else if s.eq_ignore_ascii_case("false") {
                Bson::Boolean(false)
            } else {
                return Ok(None);
            }
        }
        CastType::Byte => Bson::Int32(i32::from(s.parse::<i8>().map_err(|_| parse_error())?)),
        CastType::Short => Bson::Int32(i32::from(s.parse::<i16>().map_err(|_| parse_error())?)),
        CastType::Int => Bson::Int32(s.parse::<i32>().map_err(|_| parse_error())?),
        CastType::Long => Bson::Int64(s.parse::<i64>().map_err(|_| parse_error())?),
        CastType::Float => Bson::Double(f64::from(s.parse::<f32>().map_err(|_| parse_error())?)),
        CastType::Double => Bson::Double(s.parse::<f64>().map_err(|_| parse_error())?),
        CastType::String | CastType::Array(_) => return Ok(None),
    };
    Ok(Some(coerced))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Bson {
        Bson::String(s.to_string())
    }

    #[test]
    fn test_number_narrowing() {
        assert_eq!(coerce(Bson::Int32(300), CastType::Byte).unwrap(), Bson::Int32(44));
        assert_eq!(coerce(Bson::Int64(70_000), CastType::Short).unwrap(), Bson::Int32(4464));
        assert_eq!(coerce(Bson::Double(20.9), CastType::Int).unwrap(), Bson::Int32(20));
        assert_eq!(coerce(Bson::Int32(7), CastType::Long).unwrap(), Bson::Int64(7));
        assert_eq!(coerce(Bson::Int32(7), CastType::Double).unwrap(), Bson::Double(7.0));
        assert_eq!(
            coerce(Bson::Double(0.1), CastType::Float).unwrap(),
            Bson::Double(f64::from(0.1_f32))
        );
    }

    #[test]
    fn test_number_to_text_and_boolean() {
        assert_eq!(coerce(Bson::Int32(42), CastType::String).unwrap(), text("42"));
        assert_eq!(coerce(Bson::Double(2.5), CastType::String).unwrap(), text("2.5"));

        // Equality to one, not a general non-zero test
        assert_eq!(coerce(Bson::Int32(1), CastType::Boolean).unwrap(), Bson::Boolean(true));
        assert_eq!(coerce(Bson::Double(1.7), CastType::Boolean).unwrap(), Bson::Boolean(true));
        assert_eq!(coerce(Bson::Int32(2), CastType::Boolean).unwrap(), Bson::Boolean(false));
        assert_eq!(coerce(Bson::Int64(0), CastType::Boolean).unwrap(), Bson::Boolean(false));
    }

    #[test]
    fn test_boolean_conversions() {
        assert_eq!(coerce(Bson::Boolean(true), CastType::String).unwrap(), text("true"));
        assert_eq!(coerce(Bson::Boolean(false), CastType::String).unwrap(), text("false"));
        assert_eq!(coerce(Bson::Boolean(true), CastType::Int).unwrap(), Bson::Int32(1));
        assert_eq!(coerce(Bson::Boolean(false), CastType::Long).unwrap(), Bson::Int64(0));
        assert_eq!(coerce(Bson::Boolean(true), CastType::Double).unwrap(), Bson::Double(1.0));
    }

    #[test]
    fn test_string_to_boolean_is_strict() {
        assert_eq!(coerce(text("true"), CastType::Boolean).unwrap(), Bson::Boolean(true));
        assert_eq!(coerce(text("FALSE"), CastType::Boolean).unwrap(), Bson::Boolean(false));
        assert_eq!(coerce(text("yes"), CastType::Boolean).unwrap(), text("yes"));
        assert_eq!(coerce(text("1"), CastType::Boolean).unwrap(), text("1"));
    }

    #[test]
    fn test_string_parse() {
        assert_eq!(coerce(text("20"), CastType::Int).unwrap(), Bson::Int32(20));
        assert_eq!(coerce(text("-3"), CastType::Byte).unwrap(), Bson::Int32(-3));
        assert_eq!(coerce(text("9000000000"), CastType::Long).unwrap(), Bson::Int64(9_000_000_000));
        assert_eq!(coerce(text("2.25"), CastType::Double).unwrap(), Bson::Double(2.25));

        let err = coerce(text("twenty"), CastType::Int).unwrap_err();
        assert_eq!(
            err,
            CoercionError::Parse {
                input: "twenty".to_string(),
                cast: CastType::Int
            }
        );
        assert!(coerce(text("200"), CastType::Byte).is_err());
    }

    #[test]
    fn test_text_round_trip() {
        for n in [0_i64, 1, -1, 42, i64::from(i32::MAX), i64::MIN] {
            let as_text = coerce(Bson::Int64(n), CastType::String).unwrap();
            assert_eq!(coerce(as_text, CastType::Long).unwrap(), Bson::Int64(n));
        }
        for d in [0.5_f64, -12.75, 1e300, 3.0] {
            let as_text = coerce(Bson::Double(d), CastType::String).unwrap();
            assert_eq!(coerce(as_text, CastType::Double).unwrap(), Bson::Double(d));
        }
    }

    #[test]
    fn test_arrays() {
        let hobbies = Bson::Array(vec![text("cooking"), text("sleeping")]);
        assert_eq!(
            coerce(hobbies.clone(), CastType::Array(&CastType::String)).unwrap(),
            hobbies
        );

        let scores = Bson::Array(vec![text("1"), Bson::Int64(2), Bson::Boolean(true)]);
        assert_eq!(
            coerce(scores, CastType::Array(&CastType::Int)).unwrap(),
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(2), Bson::Int32(1)])
        );

        let bad = Bson::Array(vec![text("1"), text("x")]);
        assert!(coerce(bad, CastType::Array(&CastType::Int)).is_err());
    }

    #[test]
    fn test_unsupported_combinations_pass_through() {
        assert_eq!(coerce(Bson::Null, CastType::Int).unwrap(), Bson::Null);
        assert_eq!(coerce(text("abc"), CastType::String).unwrap(), text("abc"));
        assert_eq!(
            coerce(Bson::Array(vec![]), CastType::Int).unwrap(),
            Bson::Array(vec![])
        );
        assert_eq!(
            coerce(Bson::Int32(5), CastType::Array(&CastType::Int)).unwrap(),
            Bson::Int32(5)
        );
    }
}
