//! Line protocol encoding.
//!
//! Rows are serialized into a [`Buffer`] as they are built and handed to a
//! transport as one contiguous byte region. Each row has the shape
//!
//! ```text
//! table[,symbol=value...] column=value[,column=value...] [timestamp]\n
//! ```
//!
//! # Protocol Versions
//!
//! - [`ProtocolVersion::V1`]: text only. Doubles are written as decimal text
//!   and the designated timestamp is sent as nanoseconds without a suffix.
//! - [`ProtocolVersion::V2`]: doubles and n-dimensional double arrays use a
//!   binary form introduced by `==` and a type byte; nanosecond timestamps
//!   carry an `n` suffix.
//! - [`ProtocolVersion::V3`]: adds decimals, in binary or as text literals.
//!
//! # Key Components
//!
//! - [`Buffer`]: row encoder with state checks and rollback markers.
//! - [`ColumnValue`]: every value type a column can hold.
//! - [`Decimal`], [`DoubleArray`], [`GeoHash`], [`Long256`]: structured values.
//!
//! # Errors
//!
//! A failed call never leaves a partial entry behind: whatever the call had
//! written is truncated before the error is returned, so the buffer keeps
//! complete rows plus the entries already accepted for the open row.
mod buffer;
mod column;
mod name;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result, fmt_error};

pub use buffer::Buffer;
pub use column::{ColumnValue, Decimal, DoubleArray, GeoHash, Long256};

pub(crate) const DOUBLE_BINARY_FORMAT: u8 = 16;
pub(crate) const ARRAY_BINARY_FORMAT: u8 = 14;
pub(crate) const DECIMAL_BINARY_FORMAT: u8 = 23;
pub(crate) const ARRAY_ELEM_DOUBLE: u8 = 10;

pub const DEFAULT_MAX_NAME_LEN: usize = 127;
pub const DEFAULT_MAX_BUF_SIZE: usize = 100 * 1024 * 1024;
pub const DEFAULT_INIT_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
}

impl ProtocolVersion {
    pub fn supports_binary(self) -> bool {
        self >= ProtocolVersion::V2
    }

    pub fn supports_decimal(self) -> bool {
        self >= ProtocolVersion::V3
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            3 => Ok(ProtocolVersion::V3),
            other => Err(fmt_error!(
                ConfigError,
                "unsupported protocol version {other}, expected 1, 2 or 3"
            )),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanos,
    Micros,
    Millis,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn nanos_per_unit(self) -> i64 {
        match self {
            TimeUnit::Nanos => 1,
            TimeUnit::Micros => 1_000,
            TimeUnit::Millis => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3_600 * 1_000_000_000,
            TimeUnit::Days => 86_400 * 1_000_000_000,
        }
    }

    /// Converts `value` to nanoseconds, `None` on overflow.
    pub fn to_nanos(self, value: i64) -> Option<i64> {
        value.checked_mul(self.nanos_per_unit())
    }

    /// Converts `value` to microseconds, rounding nanoseconds down.
    pub fn to_micros(self, value: i64) -> Option<i64> {
        match self {
            TimeUnit::Nanos => Some(value.div_euclid(1_000)),
            unit => value.checked_mul(unit.nanos_per_unit() / 1_000),
        }
    }
}

/// Current wall clock time in nanoseconds since the epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as i64)
}

/// Current wall clock time in microseconds since the epoch.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_micros() as i64)
}
