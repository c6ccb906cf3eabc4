use std::ops::Range;

use log::trace;

use super::cookie::{CookieSpan, parse_set_cookie};
use super::{BoundaryAugmenter, Cookie, HeaderError, find_byte, split_on, trim};

/// Resumable HTTP/1.1 request-line, status-line and header parser.
///
/// Input may be fed in arbitrary slices; every call to [`parse`] continues
/// where the previous one stopped. All parsed tokens live in the parser's
/// fixed-capacity buffer, so a message that does not fit fails with
/// [`HeaderError::BufferOverflow`] instead of being truncated.
///
/// [`parse`]: HeaderParser::parse
#[derive(Debug)]
pub struct HeaderParser {
    buf: Vec<u8>,
    wptr: usize,
    lo: usize,

    need_method: bool,
    need_protocol: bool,
    is_method: bool,
    is_url: bool,
    is_query: bool,
    is_protocol: bool,
    is_status_code: bool,
    incomplete: bool,

    method: Option<Range<usize>>,
    url: Option<Range<usize>>,
    query: Option<Range<usize>>,
    protocol: Option<Range<usize>>,
    status_code: Option<Range<usize>>,
    header_name: Option<Range<usize>>,

    headers: Vec<(Range<usize>, Range<usize>)>,
    url_params: Vec<(Range<usize>, Range<usize>)>,
    cookies: Vec<CookieSpan>,
    content_length: i64,
    boundary: BoundaryAugmenter,
}

impl HeaderParser {
    /// Creates a parser whose buffer holds at most `capacity` bytes of
    /// request line, headers and decoded query string.
    pub fn new(capacity: usize) -> Self {
        let mut parser = Self {
            buf: vec![0; capacity],
            wptr: 0,
            lo: 0,
            need_method: true,
            need_protocol: true,
            is_method: true,
            is_url: true,
            is_query: false,
            is_protocol: true,
            is_status_code: true,
            incomplete: true,
            method: None,
            url: None,
            query: None,
            protocol: None,
            status_code: None,
            header_name: None,
            headers: Vec::new(),
            url_params: Vec::new(),
            cookies: Vec::new(),
            content_length: -1,
            boundary: BoundaryAugmenter::new(),
        };
        parser.clear();
        parser
    }

    /// Consumes bytes from `input` and returns how many were used.
    ///
    /// With `method_line` set the first line is parsed as a request line,
    /// with `protocol_line` set as a status line. Parsing stops right after
    /// the blank line that ends the header block; the remaining input belongs
    /// to the body.
    pub fn parse(
        &mut self,
        input: &[u8],
        method_line: bool,
        protocol_line: bool,
    ) -> Result<usize, HeaderError> {
        if !self.incomplete {
            return Ok(0);
        }

        let mut p = if method_line && self.need_method {
            self.parse_method(input)?
        } else if protocol_line && self.need_protocol {
            self.parse_protocol(input)?
        } else {
            0
        };

        while p < input.len() {
            if self.wptr == self.buf.len() {
                return Err(HeaderError::BufferOverflow("header is too large"));
            }

            let b = input[p];
            p += 1;
            if b == b'\r' {
                continue;
            }
            self.buf[self.wptr] = b;
            self.wptr += 1;

            match b {
                b':' if self.header_name.is_none() => {
                    self.header_name = Some(self.lo..self.wptr - 1);
                    self.lo = self.wptr;
                }
                b'\n' => match self.header_name.take() {
                    None if self.lo + 1 == self.wptr => {
                        self.incomplete = false;
                        self.parse_known_headers()?;
                        return Ok(p);
                    }
                    None => {
                        return Err(HeaderError::MalformedInput(format!(
                            "header line without a colon: {:?}",
                            String::from_utf8_lossy(&self.buf[self.lo..self.wptr - 1])
                        )));
                    }
                    Some(name) => {
                        let name = trim(&self.buf, name);
                        let value = trim(&self.buf, self.lo..self.wptr - 1);
                        self.add_header(name, value);
                        self.lo = self.wptr;
                    }
                },
                _ => {}
            }
        }
        Ok(p)
    }

    /// Rewinds the parser for the next message, keeping its buffer.
    pub fn clear(&mut self) {
        self.wptr = 0;
        self.lo = 0;
        self.need_method = true;
        self.need_protocol = true;
        self.is_method = true;
        self.is_url = true;
        self.is_query = false;
        self.is_protocol = true;
        self.is_status_code = true;
        self.incomplete = true;
        self.method = None;
        self.url = None;
        self.query = None;
        self.protocol = None;
        self.status_code = None;
        self.header_name = None;
        self.headers.clear();
        self.url_params.clear();
        self.cookies.clear();
        self.content_length = -1;
    }

    /// Releases the buffer. Any further `parse` fails with an overflow.
    pub fn close(&mut self) {
        self.clear();
        self.buf = Vec::new();
        self.headers = Vec::new();
        self.url_params = Vec::new();
        self.cookies = Vec::new();
        self.boundary.close();
    }

    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn method(&self) -> Option<&str> {
        self.text(self.method.as_ref())
    }

    pub fn url(&self) -> Option<&str> {
        self.text(self.url.as_ref())
    }

    /// Raw, undecoded query string.
    pub fn query(&self) -> Option<&str> {
        self.text(self.query.as_ref())
    }

    pub fn protocol(&self) -> Option<&str> {
        self.text(self.protocol.as_ref())
    }

    pub fn status_code(&self) -> Option<u16> {
        self.text(self.status_code.as_ref())?.parse().ok()
    }

    /// Value of the `Content-Length` header, or -1 when absent.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_bytes(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn header_bytes(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| self.buf[n.clone()].eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| &self.buf[v.clone()])
    }

    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    /// Looks up a decoded URL query parameter.
    pub fn url_param(&self, name: &str) -> Option<&str> {
        self.url_param_bytes(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn url_param_bytes(&self, name: &str) -> Option<&[u8]> {
        self.url_params
            .iter()
            .find(|(n, _)| &self.buf[n.clone()] == name.as_bytes())
            .map(|(_, v)| &self.buf[v.clone()])
    }

    pub fn url_param_count(&self) -> usize {
        self.url_params.len()
    }

    /// The preferred cookie named `name`.
    ///
    /// When several `Set-Cookie` headers share a name, the one with the
    /// longest path wins, then the one that expires last, then the first
    /// one received.
    pub fn cookie(&self, name: &str) -> Option<Cookie<'_>> {
        self.cookies
            .iter()
            .find(|c| &self.buf[c.name.clone()] == name.as_bytes())
            .map(|c| c.view(&self.buf))
    }

    /// All cookies in preference order.
    pub fn cookies(&self) -> impl Iterator<Item = Cookie<'_>> {
        self.cookies.iter().map(|c| c.view(&self.buf))
    }

    /// Multipart delimiter (`"\r\n--" + boundary`) announced by the
    /// `Content-Type` header, if any.
    pub fn boundary(&mut self) -> Option<&[u8]> {
        let content_type = self.headers.iter().find_map(|(n, v)| {
            self.buf[n.clone()]
                .eq_ignore_ascii_case(b"content-type")
                .then(|| v.clone())
        })?;

        let mut boundary = None;
        for param in split_on(&self.buf, content_type, b';').skip(1) {
            let param = trim(&self.buf, param);
            if let Some(eq) = find_byte(&self.buf, param.clone(), b'=') {
                let key = trim(&self.buf, param.start..eq);
                if self.buf[key].eq_ignore_ascii_case(b"boundary") {
                    boundary = Some(unquote(&self.buf, trim(&self.buf, eq + 1..param.end)));
                    break;
                }
            }
        }

        let boundary = boundary?;
        Some(self.boundary.of(&self.buf[boundary]))
    }

    fn text(&self, range: Option<&Range<usize>>) -> Option<&str> {
        range.and_then(|r| std::str::from_utf8(&self.buf[r.clone()]).ok())
    }

    fn add_header(&mut self, name: Range<usize>, value: Range<usize>) {
        if self.buf[name.clone()].eq_ignore_ascii_case(b"set-cookie") {
            if let Some(cookie) = parse_set_cookie(&self.buf, value) {
                self.cookies.push(cookie);
            }
            return;
        }
        let known = self
            .headers
            .iter()
            .any(|(n, _)| self.buf[n.clone()].eq_ignore_ascii_case(&self.buf[name.clone()]));
        if !known {
            self.headers.push((name, value));
        }
    }

    fn parse_known_headers(&mut self) -> Result<(), HeaderError> {
        self.parse_content_length()?;
        // stable, so equal keys keep arrival order
        self.cookies.sort_by(|a, b| {
            b.path_len()
                .cmp(&a.path_len())
                .then(b.expires.cmp(&a.expires))
        });
        trace!(
            "parsed {} headers, {} cookies, {} url params",
            self.headers.len(),
            self.cookies.len(),
            self.url_params.len()
        );
        Ok(())
    }

    fn parse_content_length(&mut self) -> Result<(), HeaderError> {
        self.content_length = -1;
        let Some(value) = self.header_bytes("Content-Length") else {
            return Ok(());
        };
        let parsed = std::str::from_utf8(value)
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|len| *len >= 0);
        match parsed {
            Some(len) => {
                self.content_length = len;
                Ok(())
            }
            None => Err(HeaderError::MalformedInput(
                "Malformed Content-Length header".to_string(),
            )),
        }
    }

    fn parse_method(&mut self, input: &[u8]) -> Result<usize, HeaderError> {
        let mut p = 0;
        while p < input.len() {
            if self.wptr == self.buf.len() {
                return Err(HeaderError::BufferOverflow("url is too long"));
            }

            let b = input[p];
            p += 1;
            match b {
                b'\r' => continue,
                b' ' => {
                    if self.is_method {
                        self.method = Some(self.lo..self.wptr);
                        self.lo = self.wptr + 1;
                        self.is_method = false;
                    } else if self.is_url {
                        self.url = Some(self.lo..self.wptr);
                        self.lo = self.wptr + 1;
                        self.is_url = false;
                    } else if self.is_query {
                        self.query = Some(self.lo..self.wptr);
                        self.lo = self.wptr + 1;
                        self.is_query = false;
                    }
                }
                b'?' if self.is_url && !self.is_method => {
                    self.url = Some(self.lo..self.wptr);
                    self.lo = self.wptr + 1;
                    self.is_url = false;
                    self.is_query = true;
                }
                b'\n' => {
                    if self.method.is_none() {
                        return Err(HeaderError::MalformedInput("bad method".to_string()));
                    }
                    self.need_method = false;
                    if let Some(query) = self.query.clone() {
                        self.decode_query(query)?;
                    }
                    self.lo = self.wptr;
                    return Ok(p);
                }
                _ => {}
            }
            self.buf[self.wptr] = b;
            self.wptr += 1;
        }
        Ok(p)
    }

    fn parse_protocol(&mut self, input: &[u8]) -> Result<usize, HeaderError> {
        let mut p = 0;
        while p < input.len() {
            if self.wptr == self.buf.len() {
                return Err(HeaderError::BufferOverflow("protocol line is too long"));
            }

            let b = input[p];
            p += 1;
            match b {
                b'\r' => continue,
                b' ' => {
                    if self.is_protocol {
                        self.protocol = Some(self.lo..self.wptr);
                        self.lo = self.wptr + 1;
                        self.is_protocol = false;
                    } else if self.is_status_code {
                        self.status_code = Some(self.lo..self.wptr);
                        self.lo = self.wptr + 1;
                        self.is_status_code = false;
                    }
                }
                b'\n' => {
                    if self.is_protocol {
                        return Err(HeaderError::MalformedInput("bad protocol".to_string()));
                    }
                    if self.is_status_code {
                        // status line without reason phrase
                        self.status_code = Some(self.lo..self.wptr);
                        self.is_status_code = false;
                    }
                    self.need_protocol = false;
                    self.lo = self.wptr;
                    return Ok(p);
                }
                _ => {}
            }
            self.buf[self.wptr] = b;
            self.wptr += 1;
        }
        Ok(p)
    }

    /// Copies the raw query behind the request line and decodes it there,
    /// so `query()` keeps returning the undecoded text.
    fn decode_query(&mut self, query: Range<usize>) -> Result<(), HeaderError> {
        let size = query.len();
        if size == 0 {
            return Ok(());
        }
        let start = self.wptr;
        let end = start + size;
        if end >= self.buf.len() {
            return Err(HeaderError::BufferOverflow("URL query string is too long"));
        }
        self.buf.copy_within(query, start);
        let removed = self.url_decode(start, end)?;
        self.wptr = end - removed;
        Ok(())
    }

    /// Decodes `buf[lo..hi]` in place and records `name=value` pairs.
    /// Returns how many bytes shorter the decoded text is.
    fn url_decode(&mut self, lo: usize, hi: usize) -> Result<usize, HeaderError> {
        let mut value_lo = lo;
        let mut rp = lo;
        let mut wp = lo;
        let mut offset = 0;
        let mut name: Option<Range<usize>> = None;

        while rp < hi {
            let b = self.buf[rp];
            rp += 1;
            match b {
                b'=' => {
                    if value_lo < wp {
                        name = Some(value_lo..wp);
                    }
                    value_lo = rp - offset;
                }
                b'&' => {
                    if let Some(n) = name.take() {
                        self.put_url_param(n, value_lo..wp);
                    }
                    value_lo = rp - offset;
                }
                b'+' => {
                    self.buf[wp] = b' ';
                    wp += 1;
                    continue;
                }
                b'%' => {
                    let decoded = if rp + 1 < hi {
                        hex_value(self.buf[rp])
                            .zip(hex_value(self.buf[rp + 1]))
                            .map(|(h, l)| h << 4 | l)
                    } else {
                        None
                    };
                    let Some(decoded) = decoded else {
                        return Err(HeaderError::MalformedInput(
                            "invalid query encoding".to_string(),
                        ));
                    };
                    rp += 2;
                    self.buf[wp] = decoded;
                    wp += 1;
                    offset += 2;
                    continue;
                }
                _ => {}
            }
            self.buf[wp] = b;
            wp += 1;
        }

        if let Some(n) = name {
            if value_lo < wp {
                self.put_url_param(n, value_lo..wp);
            }
        }
        Ok(offset)
    }

    fn put_url_param(&mut self, name: Range<usize>, value: Range<usize>) {
        let existing = self
            .url_params
            .iter_mut()
            .find(|(n, _)| self.buf[n.clone()] == self.buf[name.clone()]);
        match existing {
            Some(entry) => entry.1 = value,
            None => self.url_params.push((name, value)),
        }
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn unquote(buf: &[u8], range: Range<usize>) -> Range<usize> {
    if range.len() >= 2 && buf[range.start] == b'"' && buf[range.end - 1] == b'"' {
        range.start + 1..range.end - 1
    } else {
        range
    }
}
