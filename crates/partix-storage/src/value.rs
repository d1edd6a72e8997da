//! Column types and runtime values.
//!
//! `Value` is what a table slot, a parameter or an expression result holds.
//! Every value stored in a table has already been coerced to its column's
//! `ColumnType`, so rows inside one table never mix integer widths.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Column type, with its stable wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ColumnType {
    /// 8-bit signed integer.
    TinyInt = 1,
    /// 16-bit signed integer.
    SmallInt = 2,
    /// 32-bit signed integer.
    Integer = 3,
    /// 64-bit signed integer.
    BigInt = 4,
    /// 64-bit floating point.
    Double = 5,
    /// Microseconds since the epoch.
    Timestamp = 6,
    /// UTF-8 string.
    Varchar = 7,
    /// Byte string.
    Varbinary = 8,
    /// Boolean.
    Boolean = 9,
}

impl ColumnType {
    /// Returns the wire code.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire code.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::TinyInt),
            2 => Some(Self::SmallInt),
            3 => Some(Self::Integer),
            4 => Some(Self::BigInt),
            5 => Some(Self::Double),
            6 => Some(Self::Timestamp),
            7 => Some(Self::Varchar),
            8 => Some(Self::Varbinary),
            9 => Some(Self::Boolean),
            _ => None,
        }
    }

    /// Width of the serialized payload, or `None` for variable-length types.
    #[must_use]
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Self::TinyInt | Self::Boolean => Some(1),
            Self::SmallInt => Some(2),
            Self::Integer => Some(4),
            Self::BigInt | Self::Double | Self::Timestamp => Some(8),
            Self::Varchar | Self::Varbinary => None,
        }
    }

    /// Returns true for the integer types.
    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::TinyInt | Self::SmallInt | Self::Integer | Self::BigInt
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Timestamp => "TIMESTAMP",
            Self::Varchar => "VARCHAR",
            Self::Varbinary => "VARBINARY",
            Self::Boolean => "BOOLEAN",
        };
        f.write_str(name)
    }
}

/// A runtime value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// NULL of any type.
    Null,
    /// 8-bit signed integer.
    TinyInt(i8),
    /// 16-bit signed integer.
    SmallInt(i16),
    /// 32-bit signed integer.
    Integer(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit floating point.
    Double(f64),
    /// Microseconds since the epoch.
    Timestamp(i64),
    /// UTF-8 string.
    Varchar(String),
    /// Byte string.
    Varbinary(Vec<u8>),
    /// Boolean.
    Boolean(bool),
}

impl Value {
    /// Creates a varchar value.
    pub fn varchar(v: impl Into<String>) -> Self {
        Value::Varchar(v.into())
    }

    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the column type of this value, `None` for NULL.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::TinyInt(_) => Some(ColumnType::TinyInt),
            Value::SmallInt(_) => Some(ColumnType::SmallInt),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::BigInt(_) => Some(ColumnType::BigInt),
            Value::Double(_) => Some(ColumnType::Double),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::Varchar(_) => Some(ColumnType::Varchar),
            Value::Varbinary(_) => Some(ColumnType::Varbinary),
            Value::Boolean(_) => Some(ColumnType::Boolean),
        }
    }

    /// Converts integer types to an i64.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(i) => Some(i64::from(*i)),
            Value::SmallInt(i) => Some(i64::from(*i)),
            Value::Integer(i) => Some(i64::from(*i)),
            Value::BigInt(i) | Value::Timestamp(i) => Some(*i),
            _ => None,
        }
    }

    /// Converts numeric types to an f64.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Integer(_) | Value::BigInt(_) => {
                self.to_i64().map(|i| i as f64)
            }
            _ => None,
        }
    }

    /// Returns the boolean, `None` for NULL and non-booleans.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string payload of a varchar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(s) => Some(s),
            _ => None,
        }
    }

    /// Number of bytes this value occupies when serialized.
    pub fn serialized_size(&self) -> usize {
        1 + match self {
            Value::Null => 0,
            Value::Varchar(s) => 4 + s.len(),
            Value::Varbinary(b) => 4 + b.len(),
            other => other
                .column_type()
                .and_then(ColumnType::fixed_width)
                .unwrap_or(0),
        }
    }

    /// Coerces this value into a value of `target`.
    ///
    /// NULL coerces to anything. Integer narrowing is range-checked.
    pub fn coerce(self, target: ColumnType, column: &str) -> StorageResult<Value> {
        let mismatch = |v: &Value| StorageError::TypeMismatch {
            column: column.to_string(),
            expected: target,
            found: v.describe(),
        };

        if self.is_null() || self.column_type() == Some(target) {
            return Ok(self);
        }

        let coerced = match target {
            ColumnType::TinyInt => self
                .to_i64()
                .and_then(|i| i8::try_from(i).ok())
                .map(Value::TinyInt),
            ColumnType::SmallInt => self
                .to_i64()
                .and_then(|i| i16::try_from(i).ok())
                .map(Value::SmallInt),
            ColumnType::Integer => self
                .to_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(Value::Integer),
            ColumnType::BigInt => self.to_i64().map(Value::BigInt),
            ColumnType::Timestamp => self.to_i64().map(Value::Timestamp),
            ColumnType::Double => self.to_f64().map(Value::Double),
            ColumnType::Varchar | ColumnType::Varbinary | ColumnType::Boolean => None,
        };

        coerced.ok_or_else(|| mismatch(&self))
    }

    /// Returns true if the two values can be compared by value.
    ///
    /// NULL is comparable with anything; numeric widths compare with each other.
    pub fn comparable_with(&self, other: &Value) -> bool {
        self.is_null() || other.is_null() || self.rank() == other.rank()
    }

    fn describe(&self) -> String {
        match self.column_type() {
            Some(t) => format!("{} {}", t, self),
            None => "NULL".to_string(),
        }
    }

    fn numeric_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self.to_i64(), other.to_i64()) {
            (Some(a), Some(b)) if !self.is_timestamp() && !other.is_timestamp() => Some(a.cmp(&b)),
            _ => {
                let (a, b) = (self.to_f64()?, other.to_f64()?);
                Some(a.partial_cmp(&b).unwrap_or(Ordering::Equal))
            }
        }
    }

    fn is_timestamp(&self) -> bool {
        matches!(self, Value::Timestamp(_))
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::TinyInt(_)
            | Value::SmallInt(_)
            | Value::Integer(_)
            | Value::BigInt(_)
            | Value::Double(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Varchar(_) => 4,
            Value::Varbinary(_) => 5,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // NULL sorts before everything
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,

            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::Varbinary(a), Value::Varbinary(b)) => a.cmp(b),

            // Numeric family compares by value across widths
            (a, b) => a
                .numeric_cmp(b)
                .unwrap_or_else(|| a.rank().cmp(&b.rank())),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with the cross-width equality above.
        match self {
            Value::Null => 0u8.hash(state),
            Value::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Integer(_) | Value::BigInt(_) => {
                2u8.hash(state);
                self.to_i64().unwrap_or_default().hash(state);
            }
            Value::Double(f) => {
                2u8.hash(state);
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    (*f as i64).hash(state);
                } else {
                    f.to_bits().hash(state);
                }
            }
            Value::Timestamp(t) => {
                3u8.hash(state);
                t.hash(state);
            }
            Value::Varchar(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Varbinary(b) => {
                5u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::TinyInt(i) => write!(f, "{}", i),
            Value::SmallInt(i) => write!(f, "{}", i),
            Value::Integer(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Double(v) => write!(f, "{}", v),
            Value::Timestamp(t) => write!(f, "ts:{}", t),
            Value::Varchar(s) => write!(f, "{}", s),
            Value::Varbinary(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Varchar(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}
