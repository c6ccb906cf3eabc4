use std::fmt;

use crate::error::{Error, Result, fmt_error};

use super::TimeUnit;

pub(crate) const MAX_ARRAY_DIMS: usize = 32;
pub(crate) const MAX_DECIMAL_BYTES: usize = 32;

const GEOHASH_BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// A typed column value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnValue<'a> {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    /// Milliseconds since the epoch.
    Date(i64),
    Timestamp(i64, TimeUnit),
    Long256(Long256),
    Str(&'a str),
    Varchar(&'a str),
    Uuid(u128),
    GeoHash(GeoHash),
    Decimal(&'a Decimal),
    /// A decimal given as its text literal, e.g. `"123.45"`.
    DecimalStr(&'a str),
    Array(&'a DoubleArray),
}

/// A 256-bit unsigned integer, least significant limb first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Long256 {
    limbs: [u64; 4],
}

impl Long256 {
    pub fn new(l0: u64, l1: u64, l2: u64, l3: u64) -> Self {
        Self {
            limbs: [l0, l1, l2, l3],
        }
    }

    pub fn limbs(&self) -> [u64; 4] {
        self.limbs
    }
}

impl fmt::LowerHex for Long256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(top) = self.limbs.iter().rposition(|&l| l != 0) else {
            return f.write_str("0");
        };
        write!(f, "{:x}", self.limbs[top])?;
        for limb in self.limbs[..top].iter().rev() {
            write!(f, "{limb:016x}")?;
        }
        Ok(())
    }
}

/// A geohash of 1 to 60 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoHash {
    value: u64,
    bits: u8,
}

impl GeoHash {
    pub const MAX_BITS: u8 = 60;

    pub fn new(value: u64, bits: u8) -> Result<Self> {
        if bits == 0 || bits > Self::MAX_BITS {
            return Err(fmt_error!(
                InvalidValue,
                "geohash precision must be between 1 and {} bits, got {bits}",
                Self::MAX_BITS
            ));
        }
        if value >> bits != 0 {
            return Err(fmt_error!(
                InvalidValue,
                "geohash value {value:#x} does not fit into {bits} bits"
            ));
        }
        Ok(Self { value, bits })
    }

    /// Parses a base32 geohash such as `"u33d"`.
    pub fn from_base32(hash: &str) -> Result<Self> {
        let chars = hash.len();
        if chars == 0 || chars * 5 > Self::MAX_BITS as usize {
            return Err(fmt_error!(
                InvalidValue,
                "geohash must have between 1 and 12 chars, got {hash:?}"
            ));
        }
        let mut value = 0u64;
        for c in hash.bytes() {
            let digit = GEOHASH_BASE32
                .iter()
                .position(|&b| b == c.to_ascii_lowercase())
                .ok_or_else(|| fmt_error!(InvalidValue, "invalid geohash char {:?}", c as char))?;
            value = value << 5 | digit as u64;
        }
        Self::new(value, (chars * 5) as u8)
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Column storage width in bytes.
    pub fn storage_bytes(&self) -> usize {
        match self.bits {
            0..=7 => 1,
            8..=15 => 2,
            16..=31 => 4,
            _ => 8,
        }
    }

    /// Text form accepted by the server: base32 chars when the precision is
    /// a multiple of five bits, a string of `0`/`1` otherwise.
    pub fn to_literal(&self) -> String {
        if self.bits % 5 == 0 {
            (0..self.bits / 5)
                .rev()
                .map(|i| GEOHASH_BASE32[(self.value >> (i * 5) & 0x1f) as usize] as char)
                .collect()
        } else {
            (0..self.bits)
                .rev()
                .map(|i| if self.value >> i & 1 == 1 { '1' } else { '0' })
                .collect()
        }
    }
}

/// A fixed-point decimal: an unscaled big-endian two's-complement integer of
/// up to 32 bytes and a scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    scale: u8,
    unscaled: Vec<u8>,
}

impl Decimal {
    pub fn new(scale: u8, unscaled: impl Into<Vec<u8>>) -> Result<Self> {
        let unscaled = unscaled.into();
        if unscaled.is_empty() || unscaled.len() > MAX_DECIMAL_BYTES {
            return Err(fmt_error!(
                InvalidDecimal,
                "decimal unscaled value must be 1 to {MAX_DECIMAL_BYTES} bytes, got {}",
                unscaled.len()
            ));
        }
        Ok(Self { scale, unscaled })
    }

    /// Builds the decimal `value * 10^-scale` using the fewest bytes that
    /// keep the sign.
    pub fn from_i128(value: i128, scale: u8) -> Self {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        while start < bytes.len() - 1 {
            let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        Self {
            scale,
            unscaled: bytes[start..].to_vec(),
        }
    }

    pub fn from_i64(value: i64, scale: u8) -> Self {
        Self::from_i128(value as i128, scale)
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn unscaled(&self) -> &[u8] {
        &self.unscaled
    }

    /// The unscaled value when it fits into an `i128`.
    pub fn unscaled_i128(&self) -> Option<i128> {
        if self.unscaled.len() > 16 {
            return None;
        }
        let fill = if self.unscaled[0] & 0x80 != 0 { 0xff } else { 0x00 };
        let mut bytes = [fill; 16];
        bytes[16 - self.unscaled.len()..].copy_from_slice(&self.unscaled);
        Some(i128::from_be_bytes(bytes))
    }

    /// Appends `scale`, `len` and the unscaled bytes.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.scale);
        out.push(self.unscaled.len() as u8);
        out.extend_from_slice(&self.unscaled);
    }

    /// Reads a decimal written by [`Decimal::encode`] and returns it with
    /// the number of bytes consumed.
    pub fn decode(input: &[u8]) -> Result<(Self, usize)> {
        let [scale, len, rest @ ..] = input else {
            return Err(fmt_error!(InvalidDecimal, "decimal header is truncated"));
        };
        let len = *len as usize;
        if rest.len() < len {
            return Err(fmt_error!(
                InvalidDecimal,
                "decimal needs {len} bytes, only {} available",
                rest.len()
            ));
        }
        Ok((Self::new(*scale, &rest[..len])?, 2 + len))
    }
}

/// Checks a decimal text literal: optional sign, digits with an optional
/// fraction, optional exponent.
pub(crate) fn validate_decimal_literal(text: &str) -> Result<()> {
    let invalid = || fmt_error!(InvalidDecimal, "invalid decimal literal: {text:?}");
    let bytes = text.as_bytes();
    let mut pos = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        pos += 1;
    }
    let int_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    let mut digits = pos - int_start;
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        let frac_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        digits += pos - frac_start;
    }
    if digits == 0 {
        return Err(invalid());
    }
    if pos < bytes.len() && matches!(bytes[pos], b'e' | b'E') {
        pos += 1;
        if matches!(bytes.get(pos), Some(b'+' | b'-')) {
            pos += 1;
        }
        let exp_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == exp_start {
            return Err(invalid());
        }
    }
    if pos != bytes.len() {
        return Err(invalid());
    }
    Ok(())
}

/// An n-dimensional array of doubles stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleArray {
    shape: Vec<u32>,
    data: Vec<f64>,
}

impl DoubleArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        if shape.is_empty() || shape.len() > MAX_ARRAY_DIMS {
            return Err(fmt_error!(
                ArrayError,
                "array must have between 1 and {MAX_ARRAY_DIMS} dimensions, got {}",
                shape.len()
            ));
        }
        let mut dims = Vec::with_capacity(shape.len());
        let mut elements: usize = 1;
        for &dim in &shape {
            let dim32 = u32::try_from(dim)
                .ok()
                .filter(|d| *d <= i32::MAX as u32)
                .ok_or_else(|| fmt_error!(ArrayError, "array dimension {dim} is too large"))?;
            dims.push(dim32);
            elements = elements
                .checked_mul(dim)
                .ok_or_else(|| fmt_error!(ArrayError, "array shape {shape:?} overflows"))?;
        }
        if elements != data.len() {
            return Err(fmt_error!(
                ArrayError,
                "array shape {shape:?} needs {elements} elements, got {}",
                data.len()
            ));
        }
        Ok(Self { shape: dims, data })
    }

    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            shape: vec![values.len() as u32],
            data: values.to_vec(),
        }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != width) {
            return Err(Error::new(
                crate::error::ErrorCode::ArrayError,
                "array rows must all have the same length",
            ));
        }
        Self::new(vec![rows.len(), width], rows.concat())
    }

    pub fn shape(&self) -> &[u32] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Appends element type, rank, dimensions and elements.
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.push(super::ARRAY_ELEM_DOUBLE);
        out.push(self.shape.len() as u8);
        for dim in &self.shape {
            out.extend_from_slice(&dim.to_le_bytes());
        }
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Formats a UUID in its canonical 8-4-4-4-12 form.
pub(crate) fn format_uuid(uuid: u128) -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        (uuid >> 96) as u32,
        (uuid >> 80) as u16,
        (uuid >> 64) as u16,
        (uuid >> 48) as u16,
        uuid & 0xffff_ffff_ffff
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn decimal_round_trips_for_every_scale_and_width() {
        for len in [1usize, 2, 4, 8, 16, 32] {
            for scale in 0..=255u8 {
                let unscaled: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(37) ^ scale).collect();
                let decimal = Decimal::new(scale, unscaled.clone()).unwrap();

                let mut wire = Vec::new();
                decimal.encode(&mut wire);
                assert_eq!(wire.len(), 2 + len);
                assert_eq!(wire[0], scale);
                assert_eq!(wire[1] as usize, len);

                let (decoded, consumed) = Decimal::decode(&wire).unwrap();
                assert_eq!(consumed, wire.len());
                assert_eq!(decoded.scale(), scale);
                assert_eq!(decoded.unscaled(), &unscaled[..]);
            }
        }
    }

    #[test]
    fn decimal_uses_minimal_two_complement() {
        assert_eq!(Decimal::from_i64(0, 2).unscaled(), &[0x00]);
        assert_eq!(Decimal::from_i64(127, 2).unscaled(), &[0x7f]);
        assert_eq!(Decimal::from_i64(128, 2).unscaled(), &[0x00, 0x80]);
        assert_eq!(Decimal::from_i64(-1, 2).unscaled(), &[0xff]);
        assert_eq!(Decimal::from_i64(-128, 2).unscaled(), &[0x80]);
        assert_eq!(Decimal::from_i64(-129, 2).unscaled(), &[0xff, 0x7f]);
        assert_eq!(Decimal::from_i64(12345, 2).unscaled_i128(), Some(12345));
        assert_eq!(Decimal::from_i128(-987654321, 0).unscaled_i128(), Some(-987654321));
    }

    #[test]
    fn decimal_rejects_bad_widths() {
        assert_eq!(
            Decimal::new(0, Vec::new()).unwrap_err().code(),
            ErrorCode::InvalidDecimal
        );
        assert!(Decimal::new(0, vec![0u8; 33]).is_err());
        assert!(Decimal::decode(&[2, 4, 0, 0]).is_err());
        assert!(Decimal::decode(&[2]).is_err());
    }

    #[test]
    fn decimal_literals() {
        for ok in ["0", "-1", "+1.5", "123.456", ".5", "5.", "1e10", "1.5E-3"] {
            validate_decimal_literal(ok).unwrap();
        }
        for bad in ["", "-", ".", "1.2.3", "NaN", "Infinity", "1e", "12a", " 1"] {
            assert!(validate_decimal_literal(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn long256_hex() {
        assert_eq!(format!("{:x}", Long256::default()), "0");
        assert_eq!(format!("{:x}", Long256::new(0xff, 0, 0, 0)), "ff");
        assert_eq!(
            format!("{:x}", Long256::new(1, 2, 0, 0)),
            "20000000000000001"
        );
        assert_eq!(
            format!("{:x}", Long256::new(0, 0, 0, 0xabc)),
            "abc000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn geohash_literals() {
        let hash = GeoHash::from_base32("u33d").unwrap();
        assert_eq!(hash.bits(), 20);
        assert_eq!(hash.to_literal(), "u33d");
        assert_eq!(hash.storage_bytes(), 4);

        let bits = GeoHash::new(0b1011, 4).unwrap();
        assert_eq!(bits.to_literal(), "1011");
        assert_eq!(bits.storage_bytes(), 1);

        assert_eq!(GeoHash::new(0, 60).unwrap().storage_bytes(), 8);
        assert_eq!(GeoHash::new(0, 8).unwrap().to_literal(), "00000000");
    }

    #[test]
    fn geohash_validation() {
        assert!(GeoHash::new(0, 0).is_err());
        assert!(GeoHash::new(0, 61).is_err());
        assert!(GeoHash::new(0b100, 2).is_err());
        assert!(GeoHash::from_base32("abc").is_err());
        assert!(GeoHash::from_base32("").is_err());
    }

    #[test]
    fn array_shape_must_match_data() {
        let array = DoubleArray::new(vec![2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(array.shape(), &[2, 3]);

        let err = DoubleArray::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ArrayError);
        assert!(DoubleArray::new(vec![], vec![]).is_err());
        assert!(DoubleArray::new(vec![1; 33], vec![0.0]).is_err());
        assert!(DoubleArray::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());

        let rows = DoubleArray::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(rows.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn uuid_is_canonical() {
        let uuid = 0x1234_5678_9abc_def0_1122_3344_5566_7788u128;
        assert_eq!(format_uuid(uuid), "12345678-9abc-def0-1122-334455667788");
    }
}
