use std::ops::Range;

use chrono::DateTime;
use log::{error, warn};

use super::{find_byte, split_on, trim};

/// A cookie received in a `Set-Cookie` header.
///
/// Borrowed from the [`HeaderParser`](super::HeaderParser) that produced it
/// and invalidated by the parser's `clear()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie<'a> {
    pub name: &'a str,
    pub value: &'a str,
    pub domain: Option<&'a str>,
    pub path: Option<&'a str>,
    pub same_site: Option<&'a str>,
    pub secure: bool,
    pub http_only: bool,
    pub partitioned: bool,
    /// `Max-Age` in seconds, 0 when absent.
    pub max_age: i64,
    /// `Expires` as epoch microseconds, -1 when absent.
    pub expires: i64,
}

/// Cookie attributes stored as ranges into the parser buffer.
#[derive(Debug, Clone)]
pub(super) struct CookieSpan {
    pub name: Range<usize>,
    pub value: Range<usize>,
    pub domain: Option<Range<usize>>,
    pub path: Option<Range<usize>>,
    pub same_site: Option<Range<usize>>,
    pub secure: bool,
    pub http_only: bool,
    pub partitioned: bool,
    pub max_age: i64,
    pub expires: i64,
}

impl CookieSpan {
    fn new(name: Range<usize>, value: Range<usize>) -> Self {
        Self {
            name,
            value,
            domain: None,
            path: None,
            same_site: None,
            secure: false,
            http_only: false,
            partitioned: false,
            max_age: 0,
            expires: -1,
        }
    }

    pub fn path_len(&self) -> usize {
        self.path.as_ref().map_or(0, |p| p.len())
    }

    pub fn view<'a>(&self, buf: &'a [u8]) -> Cookie<'a> {
        let text = |r: &Range<usize>| std::str::from_utf8(&buf[r.clone()]).unwrap_or_default();
        Cookie {
            name: text(&self.name),
            value: text(&self.value),
            domain: self.domain.as_ref().map(text),
            path: self.path.as_ref().map(text),
            same_site: self.same_site.as_ref().map(text),
            secure: self.secure,
            http_only: self.http_only,
            partitioned: self.partitioned,
            max_age: self.max_age,
            expires: self.expires,
        }
    }
}

/// Parses the value of a `Set-Cookie` header held in `buf[line]`.
///
/// Returns `None` for a cookie that has no name. Bad attribute values are
/// logged and left at their defaults.
pub(super) fn parse_set_cookie(buf: &[u8], line: Range<usize>) -> Option<CookieSpan> {
    let mut parts = split_on(buf, line.clone(), b';');
    let first = parts.next()?;

    let Some(eq) = find_byte(buf, first.clone(), b'=') else {
        error!("cookie name is missing [cookie={}]", lossy(buf, &line));
        return None;
    };
    let name = trim(buf, first.start..eq);
    let value = trim(buf, eq + 1..first.end);
    if name.is_empty() {
        error!("cookie name is missing [cookie={}]", lossy(buf, &line));
        return None;
    }
    if std::str::from_utf8(&buf[line.clone()]).is_err() {
        error!("cookie is not valid UTF-8 [cookie={}]", lossy(buf, &line));
        return None;
    }

    let mut cookie = CookieSpan::new(name, value);
    for attr in parts {
        let attr = trim(buf, attr);
        if attr.is_empty() {
            continue;
        }
        let (key, val) = match find_byte(buf, attr.clone(), b'=') {
            Some(eq) => (trim(buf, attr.start..eq), Some(trim(buf, eq + 1..attr.end))),
            None => (attr, None),
        };
        let key_bytes = &buf[key.clone()];

        if key_bytes.eq_ignore_ascii_case(b"domain") {
            cookie.domain = val;
        } else if key_bytes.eq_ignore_ascii_case(b"path") {
            cookie.path = val;
        } else if key_bytes.eq_ignore_ascii_case(b"samesite") {
            cookie.same_site = val;
        } else if key_bytes.eq_ignore_ascii_case(b"secure") {
            cookie.secure = true;
        } else if key_bytes.eq_ignore_ascii_case(b"httponly") {
            cookie.http_only = true;
        } else if key_bytes.eq_ignore_ascii_case(b"partitioned") {
            cookie.partitioned = true;
        } else if key_bytes.eq_ignore_ascii_case(b"max-age") {
            match val.as_ref().and_then(|v| parse_i64(&buf[v.clone()])) {
                Some(max_age) => cookie.max_age = max_age,
                None => error!("invalid cookie Max-Age value [cookie={}]", lossy(buf, &line)),
            }
        } else if key_bytes.eq_ignore_ascii_case(b"expires") {
            match val.as_ref().and_then(|v| parse_http_date(&buf[v.clone()])) {
                Some(expires) => cookie.expires = expires,
                None => error!("invalid cookie Expires value [cookie={}]", lossy(buf, &line)),
            }
        } else {
            warn!(
                "unknown cookie attribute [attribute={}, cookie={}]",
                lossy(buf, &key),
                lossy(buf, &line)
            );
        }
    }
    Some(cookie)
}

/// Parses an HTTP-date (`Wed, 21 Oct 2015 07:28:00 GMT`) into epoch micros.
pub fn parse_http_date(value: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(value).ok()?;
    DateTime::parse_from_rfc2822(text.trim())
        .ok()
        .map(|date| date.timestamp_micros())
}

fn parse_i64(value: &[u8]) -> Option<i64> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

fn lossy(buf: &[u8], range: &Range<usize>) -> String {
    String::from_utf8_lossy(&buf[range.clone()]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Option<Cookie<'_>> {
        let buf = line.as_bytes();
        parse_set_cookie(buf, 0..buf.len()).map(|span| span.view(buf))
    }

    #[test]
    fn parses_all_attributes() {
        let cookie = parse(
            "id=123; Domain=questdb.io; Path=/api; Secure; HttpOnly; Partitioned; \
             Max-Age=3600; SameSite=Strict; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
        )
        .unwrap();

        assert_eq!(cookie.name, "id");
        assert_eq!(cookie.value, "123");
        assert_eq!(cookie.domain, Some("questdb.io"));
        assert_eq!(cookie.path, Some("/api"));
        assert_eq!(cookie.same_site, Some("Strict"));
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert!(cookie.partitioned);
        assert_eq!(cookie.max_age, 3600);
        assert_eq!(cookie.expires, 1_445_412_480_000_000);
    }

    #[test]
    fn attribute_names_are_case_insensitive() {
        let cookie = parse("a=b; path=/x; SECURE; httponly; max-age=5").unwrap();
        assert_eq!(cookie.path, Some("/x"));
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.max_age, 5);
    }

    #[test]
    fn defaults_when_attributes_are_absent() {
        let cookie = parse("session=").unwrap();
        assert_eq!(cookie.name, "session");
        assert_eq!(cookie.value, "");
        assert_eq!(cookie.max_age, 0);
        assert_eq!(cookie.expires, -1);
        assert!(!cookie.secure);
    }

    #[test]
    fn bad_attribute_values_keep_defaults() {
        let cookie = parse("a=b; Max-Age=soon; Expires=tomorrow; Flavour=choc").unwrap();
        assert_eq!(cookie.max_age, 0);
        assert_eq!(cookie.expires, -1);
    }

    #[test]
    fn cookie_without_name_is_skipped() {
        assert!(parse("").is_none());
        assert!(parse("=abc").is_none());
        assert!(parse("abc; Path=/").is_none());
        assert!(parse(" ; Secure").is_none());
    }
}
