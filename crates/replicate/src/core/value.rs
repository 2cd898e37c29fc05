//! Row values moved between source and destination.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,

    Bool(bool),

    /// Signed integers of every width.
    I64(i64),

    /// `BIGINT UNSIGNED` values above `i64::MAX` need the full range.
    U64(u64),

    F32(f32),

    F64(f64),

    Text(String),

    Bytes(Vec<u8>),

    /// `DECIMAL`/`NUMERIC`.
    Decimal(Decimal),

    /// `DATETIME` and `TIMESTAMP`.
    DateTime(NaiveDateTime),

    Date(NaiveDate),

    Time(TimeValue),
}

/// A MySQL `TIME` value.
///
/// `TIME` is a signed duration from `-838:59:59.000000` to
/// `838:59:59.000000`, not a time of day, so hours may exceed 23 and the
/// value may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeValue {
    pub negative: bool,
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub microseconds: u32,
}

impl TimeValue {
    /// Split into the `(days, hours)` pair of the MySQL binary protocol.
    pub fn days_and_hours(&self) -> (u32, u8) {
        (self.hours / 24, (self.hours % 24) as u8)
    }
}

/// Last ordering-key value of a batch, bound as the exclusive lower limit of
/// the next keyset read.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    Int(i64),
    UInt(u64),
    Text(String),
}

impl KeyValue {
    /// Extract a cursor bound from a row value.
    ///
    /// Returns `None` for values that cannot serve as a bound (NULL, floats,
    /// temporal and binary values), which makes the caller fall back to
    /// offset paging.
    pub fn from_sql(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::I64(v) => Some(KeyValue::Int(*v)),
            SqlValue::U64(v) => Some(KeyValue::UInt(*v)),
            SqlValue::Text(v) => Some(KeyValue::Text(v.clone())),
            _ => None,
        }
    }
}

/// A batch of rows read from one table.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Rows in column order of the originating read.
    pub rows: Vec<Vec<SqlValue>>,

    /// Keyset cursor position after this batch, if the read was keyset-ordered
    /// and the last row's key was usable as a bound.
    pub last_key: Option<KeyValue>,
}

impl Batch {
    pub fn new(rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            rows,
            last_key: None,
        }
    }

    pub fn with_last_key(mut self, key: Option<KeyValue>) -> Self {
        self.last_key = key;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
