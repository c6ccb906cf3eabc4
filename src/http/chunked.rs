use super::HeaderError;

/// Outcome of decoding one chunk of a `Transfer-Encoding: chunked` body.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkResult<'a> {
    /// A whole chunk is present in the input.
    Complete {
        data: &'a [u8],
        consumed: usize,
        is_last: bool,
    },
    /// More input is required before the next chunk can be decoded.
    NeedMore,
}

/// Decodes the chunk at the start of `data`.
pub fn decode_chunk(data: &[u8]) -> Result<ChunkResult<'_>, HeaderError> {
    // <hex>[;ext]\r\n
    let crlf = match find_crlf(data) {
        Some(pos) => pos,
        None => return Ok(ChunkResult::NeedMore),
    };

    let size_line = std::str::from_utf8(&data[..crlf])
        .map_err(|_| HeaderError::MalformedInput("invalid chunk size line".to_string()))?;
    let size_hex = size_line.split(';').next().unwrap_or("").trim();
    let size = usize::from_str_radix(size_hex, 16)
        .map_err(|_| HeaderError::MalformedInput(format!("invalid chunk size: {size_hex:?}")))?;

    if size == 0 {
        // last-chunk, then trailer lines up to the terminating empty line
        let mut pos = crlf + 2;
        loop {
            match find_crlf(&data[pos..]) {
                None => return Ok(ChunkResult::NeedMore),
                Some(0) => {
                    return Ok(ChunkResult::Complete {
                        data: &[],
                        consumed: pos + 2,
                        is_last: true,
                    });
                }
                Some(line) => pos += line + 2,
            }
        }
    }

    let chunk_start = crlf + 2;
    let chunk_end = chunk_start
        .checked_add(size)
        .ok_or_else(|| HeaderError::MalformedInput("chunk size overflows".to_string()))?;
    let total = chunk_end + 2;

    if data.len() < total {
        return Ok(ChunkResult::NeedMore);
    }
    if &data[chunk_end..total] != b"\r\n" {
        return Err(HeaderError::MalformedInput(
            "chunk is not terminated by CRLF".to_string(),
        ));
    }

    Ok(ChunkResult::Complete {
        data: &data[chunk_start..chunk_end],
        consumed: total,
        is_last: false,
    })
}

/// Decodes as many chunks as `input` holds, appending their payload to `body`.
///
/// Returns the number of bytes consumed and whether the last chunk was seen.
pub fn decode_chunks(input: &[u8], body: &mut Vec<u8>) -> Result<(usize, bool), HeaderError> {
    let mut pos = 0;
    loop {
        match decode_chunk(&input[pos..])? {
            ChunkResult::Complete {
                data,
                consumed,
                is_last,
            } => {
                body.extend_from_slice(data);
                pos += consumed;
                if is_last {
                    return Ok((pos, true));
                }
            }
            ChunkResult::NeedMore => return Ok((pos, false)),
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(1)).find(|&i| data[i] == b'\r' && data[i + 1] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_chunk_simple() {
        let data = b"5\r\nhello\r\n";
        match decode_chunk(data).unwrap() {
            ChunkResult::Complete {
                data,
                consumed,
                is_last,
            } => {
                assert_eq!(data, b"hello");
                assert_eq!(consumed, 10);
                assert!(!is_last);
            }
            ChunkResult::NeedMore => panic!("expected Complete"),
        }
    }

    #[test]
    fn decode_chunk_last() {
        match decode_chunk(b"0\r\n\r\n").unwrap() {
            ChunkResult::Complete {
                is_last,
                data,
                consumed,
            } => {
                assert!(is_last);
                assert!(data.is_empty());
                assert_eq!(consumed, 5);
            }
            ChunkResult::NeedMore => panic!("expected Complete"),
        }
    }

    #[test]
    fn last_chunk_waits_for_final_crlf() {
        assert_eq!(decode_chunk(b"0\r\n").unwrap(), ChunkResult::NeedMore);
        assert_eq!(decode_chunk(b"0\r\nX-Trace: 1\r\n").unwrap(), ChunkResult::NeedMore);
    }

    #[test]
    fn last_chunk_consumes_trailers() {
        let input = b"0\r\nX-Trace: 1\r\nX-Other: 2\r\n\r\nHTTP/1.1";
        match decode_chunk(input).unwrap() {
            ChunkResult::Complete { consumed, is_last, .. } => {
                assert!(is_last);
                assert_eq!(&input[consumed..], b"HTTP/1.1");
            }
            ChunkResult::NeedMore => panic!("expected Complete"),
        }
    }

    #[test]
    fn decode_chunk_need_more() {
        assert_eq!(decode_chunk(b"5\r\nhel").unwrap(), ChunkResult::NeedMore);
        assert_eq!(decode_chunk(b"5").unwrap(), ChunkResult::NeedMore);
    }

    #[test]
    fn decode_chunk_ignores_extensions() {
        match decode_chunk(b"3;name=value\r\nabc\r\n").unwrap() {
            ChunkResult::Complete { data, .. } => assert_eq!(data, b"abc"),
            ChunkResult::NeedMore => panic!("expected Complete"),
        }
    }

    #[test]
    fn decode_chunk_rejects_bad_size() {
        let err = decode_chunk(b"zz\r\nabc\r\n").unwrap_err();
        assert!(matches!(err, HeaderError::MalformedInput(_)));
    }

    #[test]
    fn decode_chunks_across_reads() {
        let input = b"4\r\n{\"me\r\n6\r\nssage\"\r\n3\r\n:1}\r\n0\r\n\r\n";
        let mut body = Vec::new();

        let (consumed, done) = decode_chunks(&input[..12], &mut body).unwrap();
        assert!(!done);
        assert_eq!(consumed, 9);
        assert_eq!(body, b"{\"me");

        let end = input.len() - 2;
        let (rest, done) = decode_chunks(&input[consumed..end], &mut body).unwrap();
        assert!(!done);
        let consumed = consumed + rest;

        let (rest, done) = decode_chunks(&input[consumed..], &mut body).unwrap();
        assert!(done);
        assert_eq!(consumed + rest, input.len());
        assert_eq!(body, b"{\"message\":1}");
    }
}
