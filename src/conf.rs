//! `schema::key=value;key=value;` configuration strings.
//!
//! The schema picks the transport (`tcp`, `tcps`, `udp`, `http`, `https`);
//! every key maps onto a [`SenderBuilder`] setting. A literal `;` inside a
//! value is written as `;;`. Unknown keys are rejected so typos surface at
//! build time.
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use log::debug;

use crate::error::{Error, ErrorCode, Result, fmt_error};
use crate::protocol::ProtocolVersion;
use crate::sender::{SenderBuilder, Transport};

/// Environment variable read by [`SenderBuilder::from_env`].
pub const CONF_ENV: &str = "QDB_CLIENT_CONF";

/// A parsed configuration string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conf {
    pub schema: String,
    pub params: Vec<(String, String)>,
}

impl Conf {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl FromStr for Conf {
    type Err = Error;

    fn from_str(conf: &str) -> Result<Self> {
        let (schema, rest) = conf.split_once("::").ok_or_else(|| {
            Error::new(
                ErrorCode::ConfigError,
                "missing \"::\" after the schema, expected e.g. \"http::addr=localhost:9000;\"",
            )
        })?;
        let schema = schema.trim();
        if schema.is_empty() {
            return Err(Error::new(ErrorCode::ConfigError, "schema is empty"));
        }

        let mut params = Vec::new();
        let mut chars = rest.chars().peekable();
        loop {
            let mut key = String::new();
            let mut has_value = false;
            for c in chars.by_ref() {
                if c == '=' {
                    has_value = true;
                    break;
                }
                if c == ';' {
                    break;
                }
                key.push(c);
            }
            let key = key.trim().to_string();
            match (key.is_empty(), has_value) {
                (true, false) if chars.peek().is_none() => break,
                (true, _) => return Err(Error::new(ErrorCode::ConfigError, "empty key")),
                (false, false) => {
                    return Err(fmt_error!(ConfigError, "missing \"=\" after key {key:?}"));
                }
                (false, true) => {}
            }

            let mut value = String::new();
            let mut terminated = false;
            while let Some(c) = chars.next() {
                if c == ';' {
                    if chars.peek() == Some(&';') {
                        chars.next();
                        value.push(';');
                        continue;
                    }
                    terminated = true;
                    break;
                }
                value.push(c);
            }
            if params.iter().any(|(k, _): &(String, String)| *k == key) {
                return Err(fmt_error!(ConfigError, "duplicate key {key:?}"));
            }
            params.push((key, value));
            if !terminated {
                break;
            }
        }

        Ok(Conf {
            schema: schema.to_string(),
            params,
        })
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| fmt_error!(ConfigError, "invalid value for {key:?}: {value:?}"))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse_num::<u64>(key, value).map(Duration::from_millis)
}

/// `off` disables a threshold, anything else must be a number.
fn parse_threshold<T: FromStr>(key: &str, value: &str) -> Result<Option<T>> {
    if value.trim().eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    parse_num(key, value).map(Some)
}

fn parse_addr(value: &str, default_port: u16) -> Result<(String, u16)> {
    let value = value.trim();
    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.starts_with('[') => {
            let port = parse_num("addr", port)?;
            Ok((host.trim_matches(['[', ']']).to_string(), port))
        }
        _ if value.is_empty() => Err(Error::new(ErrorCode::ConfigError, "\"addr\" is empty")),
        _ => Ok((value.to_string(), default_port)),
    }
}

impl SenderBuilder {
    /// Parses a configuration string into a builder.
    ///
    /// `tcps` and `https` still need a TLS implementation through
    /// [`SenderBuilder::tls`] before [`build`](SenderBuilder::build).
    pub fn from_conf(conf: &str) -> Result<Self> {
        let conf: Conf = conf.parse()?;
        let (transport, secure) = match conf.schema.as_str() {
            "http" => (Transport::Http, false),
            "https" => (Transport::Http, true),
            "tcp" => (Transport::Tcp, false),
            "tcps" => (Transport::Tcp, true),
            "udp" => (Transport::Udp, false),
            other => {
                return Err(fmt_error!(
                    ConfigError,
                    "unsupported schema {other:?}, expected one of http, https, tcp, tcps, udp"
                ));
            }
        };

        let addr = conf
            .get("addr")
            .ok_or_else(|| Error::new(ErrorCode::ConfigError, "missing \"addr\" parameter"))?;
        let (host, port) = parse_addr(addr, transport.default_port())?;
        let mut builder = SenderBuilder::new(transport, host, port).secure(secure);

        for (key, value) in &conf.params {
            let key = key.as_str();
            builder = match key {
                "addr" => builder,
                "protocol_version" => {
                    let version = parse_num::<u8>(key, value)?;
                    builder.protocol_version(ProtocolVersion::try_from(version)?)
                }
                "auto_flush" => match value.as_str() {
                    "on" => builder.auto_flush(true),
                    "off" => builder.auto_flush(false),
                    _ => {
                        return Err(fmt_error!(
                            ConfigError,
                            "invalid value for \"auto_flush\": {value:?}, expected on or off"
                        ));
                    }
                },
                "auto_flush_rows" => builder.auto_flush_rows(parse_threshold(key, value)?),
                "auto_flush_interval" => builder.auto_flush_interval(
                    parse_threshold::<u64>(key, value)?.map(Duration::from_millis),
                ),
                "auto_flush_bytes" => builder.auto_flush_bytes(parse_threshold(key, value)?),
                "init_buf_size" => builder.init_buf_size(parse_num(key, value)?),
                "max_buf_size" => builder.max_buf_size(parse_num(key, value)?),
                "max_name_len" => builder.max_name_len(parse_num(key, value)?),
                "username" | "user" => {
                    builder.username = Some(value.clone());
                    builder
                }
                "password" | "pass" => {
                    builder.password = Some(value.clone());
                    builder
                }
                "token" => {
                    builder.token = Some(value.clone());
                    builder
                }
                "token_x" => {
                    builder.token_x = Some(value.clone());
                    builder
                }
                "token_y" => {
                    builder.token_y = Some(value.clone());
                    builder
                }
                "retry_timeout" => builder.retry_timeout(parse_millis(key, value)?),
                "request_timeout" => builder.request_timeout(parse_millis(key, value)?),
                "request_min_throughput" => builder.request_min_throughput(parse_num(key, value)?),
                "bind_interface" => builder.bind_interface(parse_num::<Ipv4Addr>(key, value)?),
                "multicast_ttl" => builder.multicast_ttl(parse_num(key, value)?),
                "max_datagram_size" => builder.max_datagram_size(parse_num(key, value)?),
                other => {
                    return Err(fmt_error!(ConfigError, "unknown configuration key {other:?}"));
                }
            };
        }
        debug!(
            "parsed {} configuration with {} parameters",
            conf.schema,
            conf.params.len()
        );
        Ok(builder)
    }

    /// Reads the configuration string from `QDB_CLIENT_CONF`.
    pub fn from_env() -> Result<Self> {
        let conf = std::env::var(CONF_ENV)
            .map_err(|err| fmt_error!(ConfigError, "could not read {CONF_ENV}: {err}"))?;
        Self::from_conf(&conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(conf: &str) -> Vec<(String, String)> {
        conf.parse::<Conf>().unwrap().params
    }

    fn pair(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn parses_schema_and_params() {
        let conf: Conf = "http::addr=localhost:9000;auto_flush_rows=100;".parse().unwrap();
        assert_eq!(conf.schema, "http");
        assert_eq!(
            conf.params,
            vec![pair("addr", "localhost:9000"), pair("auto_flush_rows", "100")]
        );
        assert_eq!(conf.get("auto_flush_rows"), Some("100"));
        assert_eq!(conf.get("missing"), None);
    }

    #[test]
    fn trailing_semicolon_is_optional() {
        assert_eq!(params("tcp::addr=h:1"), vec![pair("addr", "h:1")]);
        assert_eq!(params("tcp::addr=h:1;"), vec![pair("addr", "h:1")]);
        assert!(params("tcp::").is_empty());
    }

    #[test]
    fn double_semicolon_escapes() {
        assert_eq!(
            params("http::addr=h:1;password=a;;b;;;user=x;"),
            vec![pair("addr", "h:1"), pair("password", "a;b;"), pair("user", "x")]
        );
    }

    #[test]
    fn keys_are_trimmed_and_values_kept() {
        assert_eq!(params("http:: addr =h:1; token= t ;"), vec![
            pair("addr", "h:1"),
            pair("token", " t ")
        ]);
        assert_eq!(params("http::token=;"), vec![pair("token", "")]);
    }

    #[test]
    fn malformed_strings_are_rejected() {
        for conf in [
            "addr=localhost:9000",
            "::addr=h:1;",
            "http::addr;",
            "http::addr",
            "http::=x;",
            "http::addr=h:1;addr=h:2;",
        ] {
            let err = conf.parse::<Conf>().unwrap_err();
            assert_eq!(err.code(), ErrorCode::ConfigError, "{conf}");
        }
    }

    #[test]
    fn builder_from_http_conf() {
        let builder = SenderBuilder::from_conf(
            "http::addr=db.local:9100;protocol_version=3;auto_flush_rows=off;\
             auto_flush_interval=250;username=admin;password=quest;retry_timeout=0;\
             request_timeout=5000;request_min_throughput=2048;max_name_len=64;",
        )
        .unwrap();
        assert_eq!(builder.transport(), Transport::Http);
        assert_eq!(builder.host, "db.local");
        assert_eq!(builder.port, 9100);
        assert!(!builder.secure);
        assert_eq!(builder.protocol_version, Some(ProtocolVersion::V3));
        assert_eq!(builder.auto_flush_rows, Some(None));
        assert_eq!(builder.auto_flush_interval, Some(Some(Duration::from_millis(250))));
        assert_eq!(builder.username.as_deref(), Some("admin"));
        assert_eq!(builder.password.as_deref(), Some("quest"));
        assert_eq!(builder.retry_timeout, Some(Duration::ZERO));
        assert_eq!(builder.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(builder.request_min_throughput, Some(2048));
        assert_eq!(builder.max_name_len, 64);
    }

    #[test]
    fn default_ports_and_secure_schemas() {
        let builder = SenderBuilder::from_conf("https::addr=localhost;").unwrap();
        assert_eq!(builder.port, 9000);
        assert!(builder.secure);

        let builder = SenderBuilder::from_conf("tcps::addr=localhost;").unwrap();
        assert_eq!(builder.transport(), Transport::Tcp);
        assert_eq!(builder.port, 9009);
        assert!(builder.secure);

        let builder = SenderBuilder::from_conf("udp::addr=239.1.1.1:9009;multicast_ttl=4;").unwrap();
        assert_eq!(builder.transport(), Transport::Udp);
        assert_eq!(builder.multicast_ttl, Some(4));
    }

    #[test]
    fn ipv6_addresses() {
        assert_eq!(parse_addr("[::1]:9000", 1).unwrap(), ("::1".to_string(), 9000));
        assert_eq!(parse_addr("::1", 9009).unwrap(), ("::1".to_string(), 9009));
        assert_eq!(parse_addr("host", 9009).unwrap(), ("host".to_string(), 9009));
    }

    #[test]
    fn tcp_auth_keys() {
        let builder = SenderBuilder::from_conf(
            "tcp::addr=localhost:9009;user=testUser1;token=UvuVb1USHGRRT08gEnwN2zGZrvM4MsLQ5brgF6SVkAw=;",
        )
        .unwrap();
        assert_eq!(builder.username.as_deref(), Some("testUser1"));
        assert_eq!(
            builder.token.as_deref(),
            Some("UvuVb1USHGRRT08gEnwN2zGZrvM4MsLQ5brgF6SVkAw=")
        );
    }

    #[test]
    fn rejects_bad_settings() {
        for conf in [
            "ftp::addr=h:1;",
            "http::auto_flush=on;",
            "http::addr=h:1;bogus=1;",
            "http::addr=h:1;auto_flush=maybe;",
            "http::addr=h:1;protocol_version=9;",
            "http::addr=h:1;init_buf_size=lots;",
            "http::addr=h:port;",
            "udp::addr=h:1;bind_interface=not-an-ip;",
        ] {
            let err = SenderBuilder::from_conf(conf).err().unwrap();
            assert_eq!(err.code(), ErrorCode::ConfigError, "{conf}");
        }
    }

    #[test]
    fn tls_schema_without_implementation_fails_at_build() {
        let err = SenderBuilder::from_conf("https::addr=localhost:9000;")
            .unwrap()
            .build()
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::TlsError);
    }
}
