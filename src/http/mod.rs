//! Incremental HTTP/1.1 header parsing.
//!
//! The HTTP transport reads server responses through [`HeaderParser`], which
//! consumes bytes as they arrive from a non-blocking socket and keeps every
//! parsed token as a range inside its own fixed-capacity buffer. Nothing is
//! allocated per header; `clear()` rewinds the parser for the next message.
//!
//! # Key Components
//!
//! - [`HeaderParser`]: request-line or status-line parser with header, cookie
//!   and URL query parameter lookup.
//! - [`Cookie`]: a `Set-Cookie` header broken into its attributes.
//! - [`BoundaryAugmenter`]: builds multipart delimiters.
//! - [`decode_chunk`]: decoder for `Transfer-Encoding: chunked` bodies.
//!
//! # Errors
//!
//! Parsing fails with [`HeaderError::MalformedInput`] when the bytes cannot
//! form a valid message and with [`HeaderError::BufferOverflow`] when the
//! message does not fit the configured capacity. Neither is retryable.
mod boundary;
mod chunked;
mod cookie;
mod header;

use std::ops::Range;

use thiserror::Error;

use crate::error::{Error, ErrorCode};

pub use boundary::BoundaryAugmenter;
pub use chunked::{ChunkResult, decode_chunk, decode_chunks};
pub use cookie::{Cookie, parse_http_date};
pub use header::HeaderParser;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("malformed HTTP input: {0}")]
    MalformedInput(String),
    #[error("HTTP header buffer overflow: {0}")]
    BufferOverflow(&'static str),
}

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Self {
        Error::new(ErrorCode::ServerFlushError, err.to_string())
    }
}

/// Narrows `range` so it starts and ends on a non-blank byte.
pub(crate) fn trim(buf: &[u8], range: Range<usize>) -> Range<usize> {
    let (mut lo, mut hi) = (range.start, range.end);
    while lo < hi && is_blank(buf[lo]) {
        lo += 1;
    }
    while hi > lo && is_blank(buf[hi - 1]) {
        hi -= 1;
    }
    lo..hi
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

pub(crate) fn find_byte(buf: &[u8], range: Range<usize>, needle: u8) -> Option<usize> {
    let start = range.start;
    buf[range].iter().position(|&b| b == needle).map(|p| start + p)
}

/// Splits `buf[range]` on `sep`, yielding absolute ranges.
pub(crate) fn split_on(
    buf: &[u8],
    range: Range<usize>,
    sep: u8,
) -> impl Iterator<Item = Range<usize>> + '_ {
    let mut offset = range.start;
    buf[range].split(move |&b| b == sep).map(move |part| {
        let part_range = offset..offset + part.len();
        offset = part_range.end + 1;
        part_range
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_strips_spaces_and_tabs() {
        let buf = b" \tvalue \t";
        assert_eq!(trim(buf, 0..buf.len()), 2..7);
        assert_eq!(trim(b"   ", 0..3), 3..3);
    }

    #[test]
    fn split_on_yields_absolute_ranges() {
        let buf = b"xxa;bb;;c";
        let parts: Vec<_> = split_on(buf, 2..buf.len(), b';').collect();
        assert_eq!(parts, vec![2..3, 4..6, 7..7, 8..9]);
    }
}
