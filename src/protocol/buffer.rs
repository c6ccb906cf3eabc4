use log::trace;

use crate::error::{Result, fmt_error};

use super::column::{ColumnValue, Decimal, DoubleArray, format_uuid, validate_decimal_literal};
use super::name::{NameKind, validate_name};
use super::{
    ARRAY_BINARY_FORMAT, DECIMAL_BINARY_FORMAT, DEFAULT_INIT_BUF_SIZE, DEFAULT_MAX_BUF_SIZE,
    DEFAULT_MAX_NAME_LEN, DOUBLE_BINARY_FORMAT, ProtocolVersion, TimeUnit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Table = 1,
    Symbol = 1 << 1,
    Column = 1 << 2,
    At = 1 << 3,
    Flush = 1 << 4,
}

impl Op {
    fn descr(self) -> &'static str {
        match self {
            Op::Table => "table",
            Op::Symbol => "symbol",
            Op::Column => "column",
            Op::At => "at",
            Op::Flush => "flush",
        }
    }
}

/// Row construction state. Each variant is the set of [`Op`]s it allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    MayFlushOrTable = Op::Flush as isize | Op::Table as isize,
    TableWritten = Op::Symbol as isize | Op::Column as isize,
    SymbolWritten = Op::Symbol as isize | Op::Column as isize | Op::At as isize,
    ColumnWritten = Op::Column as isize | Op::At as isize,
}

impl State {
    fn allows(self, op: Op) -> bool {
        self as isize & op as isize != 0
    }

    fn next_op_descr(self) -> &'static str {
        match self {
            State::MayFlushOrTable => "should have called `flush` or `table` instead",
            State::TableWritten => "should have called `symbol` or `column` instead",
            State::SymbolWritten => "should have called `symbol`, `column` or `at` instead",
            State::ColumnWritten => "should have called `column` or `at` instead",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Marker {
    len: usize,
    rows: usize,
}

/// Accumulates encoded rows until they are flushed.
///
/// ```
/// use ilp_client::protocol::{Buffer, ProtocolVersion, TimeUnit};
///
/// let mut buffer = Buffer::new(ProtocolVersion::V1);
/// buffer
///     .table("trades")?
///     .symbol("sym", "ETH-USD")?
///     .column_f64("price", 2615.54)?
///     .at(1_700_000_000_000, TimeUnit::Millis)?;
/// assert_eq!(
///     buffer.as_bytes(),
///     b"trades,sym=ETH-USD price=2615.54 1700000000000000000\n"
/// );
/// # Ok::<(), ilp_client::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Buffer {
    output: Vec<u8>,
    version: ProtocolVersion,
    max_name_len: usize,
    max_buf_size: usize,
    state: State,
    marker: Option<Marker>,
    row_ends: Vec<usize>,
}

impl Buffer {
    pub fn new(version: ProtocolVersion) -> Self {
        Self::with_limits(
            version,
            DEFAULT_INIT_BUF_SIZE,
            DEFAULT_MAX_NAME_LEN,
            DEFAULT_MAX_BUF_SIZE,
        )
    }

    pub fn with_limits(
        version: ProtocolVersion,
        init_buf_size: usize,
        max_name_len: usize,
        max_buf_size: usize,
    ) -> Self {
        Self {
            output: Vec::with_capacity(init_buf_size.min(max_buf_size)),
            version,
            max_name_len,
            max_buf_size,
            state: State::MayFlushOrTable,
            marker: None,
            row_ends: Vec::new(),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.output
    }

    pub fn len(&self) -> usize {
        self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.output.capacity()
    }

    /// Number of complete rows.
    pub fn row_count(&self) -> usize {
        self.row_ends.len()
    }

    /// Offsets one past each row terminator.
    pub fn row_ends(&self) -> &[usize] {
        &self.row_ends
    }

    /// Whether a row has been opened with `table` but not finished.
    pub fn has_open_row(&self) -> bool {
        self.state != State::MayFlushOrTable
    }

    /// Discards all content, the open row and the marker.
    pub fn clear(&mut self) {
        self.output.clear();
        self.row_ends.clear();
        self.state = State::MayFlushOrTable;
        self.marker = None;
    }

    /// Remembers the current position so later rows can be dropped with
    /// [`rewind_to_marker`](Buffer::rewind_to_marker).
    pub fn set_marker(&mut self) -> Result<()> {
        if self.has_open_row() {
            return Err(fmt_error!(
                InvalidApiCall,
                "Can't set the marker whilst constructing a line. \
                 A marker may only be set on an empty buffer or after `at` or `at_now` is called."
            ));
        }
        self.marker = Some(Marker {
            len: self.output.len(),
            rows: self.row_ends.len(),
        });
        Ok(())
    }

    /// Drops everything written since [`set_marker`](Buffer::set_marker).
    pub fn rewind_to_marker(&mut self) -> Result<()> {
        let marker = self.marker.take().ok_or_else(|| {
            fmt_error!(InvalidApiCall, "Can't rewind to the marker: No marker set.")
        })?;
        self.output.truncate(marker.len);
        self.row_ends.truncate(marker.rows);
        self.state = State::MayFlushOrTable;
        Ok(())
    }

    pub fn clear_marker(&mut self) {
        self.marker = None;
    }

    /// Discards the open row, keeping every complete one.
    pub fn cancel_row(&mut self) {
        let end = self.row_ends.last().copied().unwrap_or(0);
        self.output.truncate(end);
        self.state = State::MayFlushOrTable;
    }

    pub fn table(&mut self, name: &str) -> Result<&mut Self> {
        self.check_op(Op::Table)?;
        validate_name(name, NameKind::Table, self.max_name_len)?;
        let start = self.output.len();
        write_escaped_unquoted(&mut self.output, name);
        self.check_capacity(start)?;
        self.state = State::TableWritten;
        Ok(self)
    }

    pub fn symbol(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        self.check_op(Op::Symbol)?;
        validate_name(name, NameKind::Column, self.max_name_len)?;
        let start = self.output.len();
        self.output.push(b',');
        write_escaped_unquoted(&mut self.output, name);
        self.output.push(b'=');
        write_escaped_unquoted(&mut self.output, value);
        self.check_capacity(start)?;
        self.state = State::SymbolWritten;
        Ok(self)
    }

    pub fn column(&mut self, name: &str, value: ColumnValue<'_>) -> Result<&mut Self> {
        self.check_op(Op::Column)?;
        validate_name(name, NameKind::Column, self.max_name_len)?;
        let start = self.output.len();
        self.write_column_key(name);
        if let Err(err) = self.write_value(value) {
            self.output.truncate(start);
            return Err(err);
        }
        self.check_capacity(start)?;
        self.state = State::ColumnWritten;
        Ok(self)
    }

    pub fn column_bool(&mut self, name: &str, value: bool) -> Result<&mut Self> {
        self.column(name, ColumnValue::Bool(value))
    }

    pub fn column_i64(&mut self, name: &str, value: i64) -> Result<&mut Self> {
        self.column(name, ColumnValue::Long(value))
    }

    pub fn column_f64(&mut self, name: &str, value: f64) -> Result<&mut Self> {
        self.column(name, ColumnValue::Double(value))
    }

    pub fn column_str(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        self.column(name, ColumnValue::Str(value))
    }

    pub fn column_ts(&mut self, name: &str, value: i64, unit: TimeUnit) -> Result<&mut Self> {
        self.column(name, ColumnValue::Timestamp(value, unit))
    }

    pub fn column_decimal(&mut self, name: &str, value: &Decimal) -> Result<&mut Self> {
        self.column(name, ColumnValue::Decimal(value))
    }

    pub fn column_arr(&mut self, name: &str, value: &DoubleArray) -> Result<&mut Self> {
        self.column(name, ColumnValue::Array(value))
    }

    /// Terminates the row with a designated timestamp.
    pub fn at(&mut self, timestamp: i64, unit: TimeUnit) -> Result<()> {
        self.check_op(Op::At)?;
        let start = self.output.len();
        self.output.push(b' ');
        if self.version.supports_binary() {
            if unit == TimeUnit::Nanos {
                push_i64(&mut self.output, timestamp);
                self.output.push(b'n');
            } else {
                let micros = self.checked_micros(timestamp, unit, start)?;
                push_i64(&mut self.output, micros);
                self.output.push(b't');
            }
        } else {
            let Some(nanos) = unit.to_nanos(timestamp) else {
                self.output.truncate(start);
                return Err(fmt_error!(
                    InvalidTimestamp,
                    "timestamp {timestamp} {unit:?} cannot be represented in nanoseconds"
                ));
            };
            push_i64(&mut self.output, nanos);
        }
        self.output.push(b'\n');
        self.check_capacity(start)?;
        self.finish_row();
        Ok(())
    }

    /// Terminates the row and lets the server assign the timestamp.
    pub fn at_now(&mut self) -> Result<()> {
        self.check_op(Op::At)?;
        let start = self.output.len();
        self.output.push(b'\n');
        self.check_capacity(start)?;
        self.finish_row();
        Ok(())
    }

    /// Fails when the buffer holds an unfinished row.
    pub fn check_can_flush(&self) -> Result<()> {
        self.check_op(Op::Flush)
    }

    fn finish_row(&mut self) {
        self.row_ends.push(self.output.len());
        self.state = State::MayFlushOrTable;
        trace!("row {} complete, buffer at {} bytes", self.row_ends.len(), self.output.len());
    }

    fn check_op(&self, op: Op) -> Result<()> {
        if self.state.allows(op) {
            return Ok(());
        }
        if op == Op::Table {
            return Err(fmt_error!(
                InvalidApiCall,
                "duplicated table call: the previous row was not terminated with `at` or `at_now`"
            ));
        }
        Err(fmt_error!(
            InvalidApiCall,
            "State error: Bad call to `{}`, {}.",
            op.descr(),
            self.state.next_op_descr()
        ))
    }

    fn check_capacity(&mut self, start: usize) -> Result<()> {
        if self.output.len() <= self.max_buf_size {
            return Ok(());
        }
        let needed = self.output.len();
        self.output.truncate(start);
        Err(fmt_error!(
            InvalidApiCall,
            "Could not write to buffer: {needed} bytes exceed the maximum buffer size of {} bytes",
            self.max_buf_size
        ))
    }

    fn checked_micros(&mut self, value: i64, unit: TimeUnit, start: usize) -> Result<i64> {
        unit.to_micros(value).ok_or_else(|| {
            self.output.truncate(start);
            fmt_error!(
                InvalidTimestamp,
                "timestamp {value} {unit:?} cannot be represented in microseconds"
            )
        })
    }

    fn write_column_key(&mut self, name: &str) {
        let sep = if self.state.allows(Op::Symbol) { b' ' } else { b',' };
        self.output.push(sep);
        write_escaped_unquoted(&mut self.output, name);
        self.output.push(b'=');
    }

    fn write_value(&mut self, value: ColumnValue<'_>) -> Result<()> {
        let out = &mut self.output;
        match value {
            ColumnValue::Bool(v) => out.push(if v { b't' } else { b'f' }),
            ColumnValue::Byte(v) => push_long(out, v as i64),
            ColumnValue::Short(v) => push_long(out, v as i64),
            ColumnValue::Int(v) => push_long(out, v as i64),
            ColumnValue::Long(v) => push_long(out, v),
            ColumnValue::Float(v) => self.write_double(v as f64)?,
            ColumnValue::Double(v) => self.write_double(v)?,
            ColumnValue::Char(c) => {
                let mut tmp = [0u8; 4];
                write_escaped_quoted(out, c.encode_utf8(&mut tmp));
            }
            ColumnValue::Date(millis) => self.write_timestamp(millis, TimeUnit::Millis)?,
            ColumnValue::Timestamp(v, unit) => self.write_timestamp(v, unit)?,
            ColumnValue::Long256(v) => {
                out.extend_from_slice(format!("0x{v:x}i").as_bytes());
            }
            ColumnValue::Str(s) | ColumnValue::Varchar(s) => write_escaped_quoted(out, s),
            ColumnValue::Uuid(v) => write_escaped_quoted(out, &format_uuid(v)),
            ColumnValue::GeoHash(v) => write_escaped_quoted(out, &v.to_literal()),
            ColumnValue::Decimal(v) => {
                self.require_decimal()?;
                self.output.push(b'=');
                self.output.push(DECIMAL_BINARY_FORMAT);
                v.encode(&mut self.output);
            }
            ColumnValue::DecimalStr(text) => {
                self.require_decimal()?;
                validate_decimal_literal(text)?;
                self.output.extend_from_slice(text.as_bytes());
                self.output.push(b'd');
            }
            ColumnValue::Array(array) => {
                if !self.version.supports_binary() {
                    return Err(fmt_error!(
                        ProtocolVersionError,
                        "arrays are not supported by protocol version {}",
                        self.version
                    ));
                }
                self.output.push(b'=');
                self.output.push(ARRAY_BINARY_FORMAT);
                array.encode(&mut self.output);
            }
        }
        Ok(())
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        if self.version.supports_binary() {
            self.output.push(b'=');
            self.output.push(DOUBLE_BINARY_FORMAT);
            self.output.extend_from_slice(&value.to_le_bytes());
        } else {
            if !value.is_finite() {
                return Err(fmt_error!(
                    InvalidValue,
                    "{value} cannot be sent with protocol version 1"
                ));
            }
            self.output.extend_from_slice(value.to_string().as_bytes());
        }
        Ok(())
    }

    fn write_timestamp(&mut self, value: i64, unit: TimeUnit) -> Result<()> {
        if unit == TimeUnit::Nanos && self.version.supports_binary() {
            push_i64(&mut self.output, value);
            self.output.push(b'n');
            return Ok(());
        }
        let micros = unit.to_micros(value).ok_or_else(|| {
            fmt_error!(
                InvalidTimestamp,
                "timestamp {value} {unit:?} cannot be represented in microseconds"
            )
        })?;
        push_i64(&mut self.output, micros);
        self.output.push(b't');
        Ok(())
    }

    fn require_decimal(&self) -> Result<()> {
        if self.version.supports_decimal() {
            Ok(())
        } else {
            Err(fmt_error!(
                ProtocolVersionError,
                "decimals are not supported by protocol version {}",
                self.version
            ))
        }
    }
}

fn push_long(out: &mut Vec<u8>, value: i64) {
    push_i64(out, value);
    out.push(b'i');
}

fn push_i64(out: &mut Vec<u8>, value: i64) {
    let mut digits = [0u8; 20];
    let mut n = value.unsigned_abs();
    let mut pos = digits.len();
    loop {
        pos -= 1;
        digits[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if value < 0 {
        out.push(b'-');
    }
    out.extend_from_slice(&digits[pos..]);
}

fn write_escaped_unquoted(out: &mut Vec<u8>, s: &str) {
    for &b in s.as_bytes() {
        if matches!(b, b' ' | b',' | b'=' | b'\n' | b'\r' | b'\\') {
            out.push(b'\\');
        }
        out.push(b);
    }
}

fn write_escaped_quoted(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for &b in s.as_bytes() {
        if matches!(b, b'"' | b'\\' | b'\n' | b'\r') {
            out.push(b'\\');
        }
        out.push(b);
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::protocol::{GeoHash, Long256};

    fn v1() -> Buffer {
        Buffer::new(ProtocolVersion::V1)
    }

    #[test]
    fn encodes_text_row() {
        let mut buffer = v1();
        buffer
            .table("weather")
            .unwrap()
            .symbol("city", "New York")
            .unwrap()
            .column_f64("temp", 21.5)
            .unwrap()
            .column_i64("humidity", 60)
            .unwrap()
            .column_bool("raining", false)
            .unwrap()
            .column_str("note", "said \"hi\"\\")
            .unwrap()
            .at(1_000, TimeUnit::Micros)
            .unwrap();

        assert_eq!(
            std::str::from_utf8(buffer.as_bytes()).unwrap(),
            "weather,city=New\\ York temp=21.5,humidity=60i,raining=f,note=\"said \\\"hi\\\"\\\\\" 1000000\n"
        );
        assert_eq!(buffer.row_count(), 1);
        assert_eq!(buffer.row_ends(), &[buffer.len()]);
    }

    #[test]
    fn escapes_names_and_symbols() {
        let mut buffer = v1();
        buffer
            .table("my table")
            .unwrap()
            .symbol("a=b", "x,y\nz")
            .unwrap()
            .at_now()
            .unwrap();
        assert_eq!(buffer.as_bytes(), b"my\\ table,a\\=b=x\\,y\\\nz\n");
    }

    #[test]
    fn rows_keep_call_order() {
        let mut buffer = v1();
        for i in 0..3 {
            buffer
                .table("t")
                .unwrap()
                .column_i64("seq", i)
                .unwrap()
                .at_now()
                .unwrap();
        }
        assert_eq!(buffer.as_bytes(), b"t seq=0i\nt seq=1i\nt seq=2i\n");
        assert_eq!(buffer.row_ends(), &[9, 18, 27]);
    }

    #[test]
    fn duplicated_table_is_reported() {
        let mut buffer = v1();
        buffer.table("t").unwrap();
        let err = buffer.column_bool("col\n", true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidName);
        assert!(err.msg().contains("name contains an illegal char"));

        let err = buffer.table("t").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApiCall);
        assert!(err.msg().contains("duplicated table"));
        assert_eq!(buffer.as_bytes(), b"t");
    }

    #[test]
    fn symbols_must_precede_columns() {
        let mut buffer = v1();
        buffer.table("t").unwrap().column_i64("a", 1).unwrap();
        let err = buffer.symbol("s", "v").unwrap_err();
        assert_eq!(
            err.msg(),
            "State error: Bad call to `symbol`, should have called `column` or `at` instead."
        );
    }

    #[test]
    fn at_requires_a_field() {
        let mut buffer = v1();
        buffer.table("t").unwrap();
        assert_eq!(buffer.at_now().unwrap_err().code(), ErrorCode::InvalidApiCall);
        assert!(buffer.check_can_flush().is_err());
    }

    #[test]
    fn column_requires_table() {
        let mut buffer = v1();
        let err = buffer.column_i64("a", 1).unwrap_err();
        assert_eq!(
            err.msg(),
            "State error: Bad call to `column`, should have called `flush` or `table` instead."
        );
    }

    #[test]
    fn v1_rejects_non_finite_doubles_without_partial_entry() {
        let mut buffer = v1();
        buffer.table("t").unwrap().column_i64("a", 1).unwrap();
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = buffer.column_f64("x", value).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidValue);
        }
        assert_eq!(buffer.as_bytes(), b"t a=1i");
        buffer.at_now().unwrap();
    }

    #[test]
    fn v2_writes_binary_doubles() {
        let mut buffer = Buffer::new(ProtocolVersion::V2);
        buffer
            .table("t")
            .unwrap()
            .column_f64("x", f64::NAN)
            .unwrap()
            .at_now()
            .unwrap();
        let mut expected = b"t x==".to_vec();
        expected.push(DOUBLE_BINARY_FORMAT);
        expected.extend_from_slice(&f64::NAN.to_le_bytes());
        expected.push(b'\n');
        assert_eq!(buffer.as_bytes(), &expected[..]);
    }

    #[test]
    fn designated_timestamp_by_version() {
        let mut buffer = v1();
        buffer.table("t").unwrap().column_i64("a", 1).unwrap();
        buffer.at(5, TimeUnit::Seconds).unwrap();
        assert_eq!(buffer.as_bytes(), b"t a=1i 5000000000\n");

        let mut buffer = Buffer::new(ProtocolVersion::V2);
        buffer.table("t").unwrap().column_i64("a", 1).unwrap();
        buffer.at(123, TimeUnit::Nanos).unwrap();
        buffer.table("t").unwrap().column_i64("a", 1).unwrap();
        buffer.at(5, TimeUnit::Millis).unwrap();
        assert_eq!(buffer.as_bytes(), b"t a=1i 123n\nt a=1i 5000t\n");
    }

    #[test]
    fn designated_timestamp_overflow() {
        let mut buffer = v1();
        buffer.table("t").unwrap().column_i64("a", 1).unwrap();
        let err = buffer.at(i64::MAX / 2, TimeUnit::Micros).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTimestamp);
        assert_eq!(buffer.as_bytes(), b"t a=1i");
        buffer.at_now().unwrap();
    }

    #[test]
    fn timestamp_columns() {
        let mut buffer = v1();
        buffer
            .table("t")
            .unwrap()
            .column_ts("a", 1_500, TimeUnit::Nanos)
            .unwrap()
            .column("b", ColumnValue::Date(2))
            .unwrap()
            .at_now()
            .unwrap();
        assert_eq!(buffer.as_bytes(), b"t a=1t,b=2000t\n");

        let mut buffer = Buffer::new(ProtocolVersion::V2);
        buffer
            .table("t")
            .unwrap()
            .column_ts("a", 1_500, TimeUnit::Nanos)
            .unwrap()
            .at_now()
            .unwrap();
        assert_eq!(buffer.as_bytes(), b"t a=1500n\n");
    }

    #[test]
    fn misc_column_types() {
        let mut buffer = v1();
        buffer
            .table("t")
            .unwrap()
            .column("l", ColumnValue::Long256(Long256::new(0xff, 0, 0, 0)))
            .unwrap()
            .column("u", ColumnValue::Uuid(0x1234_5678_9abc_def0_1122_3344_5566_7788))
            .unwrap()
            .column("c", ColumnValue::Char('"'))
            .unwrap()
            .column("g", ColumnValue::GeoHash(GeoHash::from_base32("u33").unwrap()))
            .unwrap()
            .column("s", ColumnValue::Short(-7))
            .unwrap()
            .column("v", ColumnValue::Varchar("a\nb"))
            .unwrap()
            .at_now()
            .unwrap();
        assert_eq!(
            std::str::from_utf8(buffer.as_bytes()).unwrap(),
            "t l=0xffi,u=\"12345678-9abc-def0-1122-334455667788\",c=\"\\\"\",g=\"u33\",s=-7i,v=\"a\\\nb\"\n"
        );
    }

    #[test]
    fn arrays_need_v2() {
        let array = DoubleArray::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut buffer = v1();
        buffer.table("t").unwrap();
        let err = buffer.column_arr("a", &array).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolVersionError);
        assert_eq!(buffer.as_bytes(), b"t");

        let mut buffer = Buffer::new(ProtocolVersion::V2);
        buffer.table("t").unwrap().column_arr("a", &array).unwrap();
        buffer.at_now().unwrap();

        let mut expected = b"t a==".to_vec();
        expected.extend_from_slice(&[ARRAY_BINARY_FORMAT, 10, 2]);
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(&2u32.to_le_bytes());
        for v in [1.0f64, 2.0, 3.0, 4.0] {
            expected.extend_from_slice(&v.to_le_bytes());
        }
        expected.push(b'\n');
        assert_eq!(buffer.as_bytes(), &expected[..]);
    }

    #[test]
    fn decimals_need_v3() {
        let decimal = Decimal::from_i64(12345, 2);
        let mut buffer = Buffer::new(ProtocolVersion::V2);
        buffer.table("t").unwrap();
        assert_eq!(
            buffer.column_decimal("d", &decimal).unwrap_err().code(),
            ErrorCode::ProtocolVersionError
        );

        let mut buffer = Buffer::new(ProtocolVersion::V3);
        buffer
            .table("t")
            .unwrap()
            .column_decimal("d", &decimal)
            .unwrap()
            .column("e", ColumnValue::DecimalStr("-1.25"))
            .unwrap()
            .at_now()
            .unwrap();
        let mut expected = b"t d==".to_vec();
        expected.extend_from_slice(&[DECIMAL_BINARY_FORMAT, 2, 2, 0x30, 0x39]);
        expected.extend_from_slice(b",e=-1.25d\n");
        assert_eq!(buffer.as_bytes(), &expected[..]);

        buffer.table("t").unwrap();
        let err = buffer.column("e", ColumnValue::DecimalStr("1.2.3")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidDecimal);
    }

    #[test]
    fn max_buf_size_truncates_the_offending_entry() {
        let mut buffer = Buffer::with_limits(ProtocolVersion::V1, 16, 127, 20);
        buffer.table("t").unwrap().column_i64("a", 1).unwrap();
        let err = buffer.column_str("b", "this will not fit").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApiCall);
        assert_eq!(buffer.as_bytes(), b"t a=1i");
        buffer.at_now().unwrap();
    }

    #[test]
    fn cancel_row_keeps_complete_rows() {
        let mut buffer = v1();
        buffer.table("t").unwrap().column_i64("a", 1).unwrap();
        buffer.at_now().unwrap();
        buffer.table("t").unwrap().column_i64("a", 2).unwrap();
        buffer.cancel_row();
        assert_eq!(buffer.as_bytes(), b"t a=1i\n");
        assert!(!buffer.has_open_row());
        buffer.table("u").unwrap().column_i64("b", 3).unwrap().at_now().unwrap();
        assert_eq!(buffer.row_count(), 2);
    }

    #[test]
    fn marker_rewinds_rows() {
        let mut buffer = v1();
        buffer.table("t").unwrap().column_i64("a", 1).unwrap().at_now().unwrap();
        buffer.set_marker().unwrap();
        buffer.table("t").unwrap().column_i64("a", 2).unwrap().at_now().unwrap();
        buffer.table("t").unwrap();
        assert!(buffer.set_marker().is_err());

        buffer.rewind_to_marker().unwrap();
        assert_eq!(buffer.as_bytes(), b"t a=1i\n");
        assert_eq!(buffer.row_count(), 1);
        assert!(buffer.rewind_to_marker().is_err());
    }

    #[test]
    fn clear_resets_everything() {
        let mut buffer = v1();
        buffer.table("t").unwrap().column_i64("a", 1).unwrap().at_now().unwrap();
        buffer.table("t").unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.row_count(), 0);
        buffer.table("t").unwrap();
    }

    #[test]
    fn push_i64_extremes() {
        let mut out = Vec::new();
        push_i64(&mut out, i64::MIN);
        assert_eq!(out, i64::MIN.to_string().as_bytes());
        out.clear();
        push_i64(&mut out, 0);
        assert_eq!(out, b"0");
    }
}
