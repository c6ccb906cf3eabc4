//! The user-facing row sender.
//!
//! A [`Sender`] owns one [`Buffer`] and one [`LineChannel`]. Rows are built
//! with chained calls and delivered on [`Sender::flush`], or automatically
//! once one of the auto-flush thresholds is crossed after a completed row.
//!
//! ```no_run
//! use ilp_client::{Sender, protocol::TimeUnit};
//!
//! # fn main() -> ilp_client::Result<()> {
//! let mut sender = Sender::from_conf("http::addr=localhost:9000;")?;
//! sender
//!     .table("trades")?
//!     .symbol("symbol", "ETH-USD")?
//!     .column_f64("price", 2615.54)?
//!     .at(1_700_000_000_000_000, TimeUnit::Micros)?;
//! sender.flush()?;
//! sender.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Failure handling
//!
//! A failed flush leaves the buffer untouched, so calling `flush` again
//! re-sends exactly the same bytes. A failed row call leaves the buffer with
//! the complete rows plus the entries of the open row accepted so far; call
//! [`Sender::cancel_row`] to drop the open row.
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, ErrorCode, Result, fmt_error};
use crate::net::{SecureUpgrade, SocketOptions};
use crate::protocol::{
    Buffer, ColumnValue, DEFAULT_INIT_BUF_SIZE, DEFAULT_MAX_BUF_SIZE, DEFAULT_MAX_NAME_LEN,
    Decimal, DoubleArray, ProtocolVersion, TimeUnit,
};
use crate::transport::{
    ChallengeSigner, EcdsaSigner, HttpAuth, HttpChannel, HttpSettings, LineChannel, RetryPolicy,
    TcpAuth, TcpChannel, TcpSettings, UdpChannel, UdpSettings,
};

pub const DEFAULT_HTTP_PORT: u16 = 9000;
pub const DEFAULT_LINE_PORT: u16 = 9009;

const HTTP_AUTO_FLUSH_ROWS: usize = 75_000;
const HTTP_AUTO_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const LINE_AUTO_FLUSH_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Http,
}

impl Transport {
    pub fn default_port(self) -> u16 {
        match self {
            Transport::Http => DEFAULT_HTTP_PORT,
            Transport::Tcp | Transport::Udp => DEFAULT_LINE_PORT,
        }
    }

    pub fn default_version(self) -> ProtocolVersion {
        match self {
            Transport::Http => ProtocolVersion::V2,
            Transport::Tcp | Transport::Udp => ProtocolVersion::V1,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Http => "http",
        })
    }
}

/// Thresholds checked after every completed row. `None` disables a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoFlush {
    pub rows: Option<usize>,
    pub interval: Option<Duration>,
    pub bytes: Option<usize>,
}

impl AutoFlush {
    pub const OFF: AutoFlush = AutoFlush {
        rows: None,
        interval: None,
        bytes: None,
    };

    fn defaults(transport: Transport) -> Self {
        match transport {
            Transport::Http => AutoFlush {
                rows: Some(HTTP_AUTO_FLUSH_ROWS),
                interval: Some(HTTP_AUTO_FLUSH_INTERVAL),
                bytes: None,
            },
            Transport::Tcp | Transport::Udp => AutoFlush {
                rows: None,
                interval: None,
                bytes: Some(LINE_AUTO_FLUSH_BYTES),
            },
        }
    }

    fn is_due(&self, buffer: &Buffer, last_flush: Instant) -> bool {
        self.rows.is_some_and(|rows| buffer.row_count() >= rows)
            || self.bytes.is_some_and(|bytes| buffer.len() >= bytes)
            || self.interval.is_some_and(|interval| last_flush.elapsed() >= interval)
    }
}

/// Collects sender settings and opens the channel.
#[derive(Clone)]
pub struct SenderBuilder {
    pub(crate) transport: Transport,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) secure: bool,
    pub(crate) tls: Option<Arc<dyn SecureUpgrade>>,
    pub(crate) protocol_version: Option<ProtocolVersion>,
    pub(crate) auto_flush: bool,
    pub(crate) auto_flush_rows: Option<Option<usize>>,
    pub(crate) auto_flush_interval: Option<Option<Duration>>,
    pub(crate) auto_flush_bytes: Option<Option<usize>>,
    pub(crate) init_buf_size: usize,
    pub(crate) max_buf_size: usize,
    pub(crate) max_name_len: usize,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) token_x: Option<String>,
    pub(crate) token_y: Option<String>,
    pub(crate) signer: Option<Arc<dyn ChallengeSigner>>,
    pub(crate) retry_timeout: Option<Duration>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) request_min_throughput: Option<u64>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) bind_interface: Option<Ipv4Addr>,
    pub(crate) multicast_ttl: Option<u32>,
    pub(crate) max_datagram_size: Option<usize>,
    pub(crate) socket: SocketOptions,
    pub(crate) readiness: bool,
}

impl SenderBuilder {
    pub fn new(transport: Transport, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport,
            host: host.into(),
            port,
            secure: false,
            tls: None,
            protocol_version: None,
            auto_flush: true,
            auto_flush_rows: None,
            auto_flush_interval: None,
            auto_flush_bytes: None,
            init_buf_size: DEFAULT_INIT_BUF_SIZE,
            max_buf_size: DEFAULT_MAX_BUF_SIZE,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            username: None,
            password: None,
            token: None,
            token_x: None,
            token_y: None,
            signer: None,
            retry_timeout: None,
            request_timeout: None,
            request_min_throughput: None,
            retry_policy: RetryPolicy::default(),
            bind_interface: None,
            multicast_ttl: None,
            max_datagram_size: None,
            socket: SocketOptions::default(),
            readiness: false,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Requests `tcps` or `https`. Building fails unless a
    /// [`SecureUpgrade`] is supplied with [`tls`](Self::tls).
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Supplies the TLS implementation and turns on `secure`.
    pub fn tls(mut self, upgrade: Arc<dyn SecureUpgrade>) -> Self {
        self.tls = Some(upgrade);
        self.secure = true;
        self
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Turns every auto-flush threshold on or off.
    pub fn auto_flush(mut self, enabled: bool) -> Self {
        self.auto_flush = enabled;
        self
    }

    pub fn auto_flush_rows(mut self, rows: Option<usize>) -> Self {
        self.auto_flush_rows = Some(rows);
        self
    }

    pub fn auto_flush_interval(mut self, interval: Option<Duration>) -> Self {
        self.auto_flush_interval = Some(interval);
        self
    }

    pub fn auto_flush_bytes(mut self, bytes: Option<usize>) -> Self {
        self.auto_flush_bytes = Some(bytes);
        self
    }

    pub fn init_buf_size(mut self, size: usize) -> Self {
        self.init_buf_size = size;
        self
    }

    pub fn max_buf_size(mut self, size: usize) -> Self {
        self.max_buf_size = size;
        self
    }

    pub fn max_name_len(mut self, len: usize) -> Self {
        self.max_name_len = len;
        self
    }

    /// HTTP basic auth credentials.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// HTTP bearer token.
    pub fn token_auth(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// TCP challenge-response auth with an ECDSA P-256 key in base64url.
    pub fn ecdsa_auth(
        mut self,
        key_id: impl Into<String>,
        private_key: impl Into<String>,
        public_x: impl Into<String>,
        public_y: impl Into<String>,
    ) -> Self {
        self.username = Some(key_id.into());
        self.token = Some(private_key.into());
        self.token_x = Some(public_x.into());
        self.token_y = Some(public_y.into());
        self
    }

    /// TCP challenge-response auth with a custom signer.
    pub fn signer_auth(mut self, key_id: impl Into<String>, signer: Arc<dyn ChallengeSigner>) -> Self {
        self.username = Some(key_id.into());
        self.signer = Some(signer);
        self
    }

    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = Some(timeout);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn request_min_throughput(mut self, bytes_per_sec: u64) -> Self {
        self.request_min_throughput = Some(bytes_per_sec);
        self
    }

    pub fn bind_interface(mut self, interface: Ipv4Addr) -> Self {
        self.bind_interface = Some(interface);
        self
    }

    pub fn multicast_ttl(mut self, ttl: u32) -> Self {
        self.multicast_ttl = Some(ttl);
        self
    }

    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = Some(size);
        self
    }

    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket = options;
        self
    }

    /// Drives TCP writes through the readiness poller instead of blocking.
    pub fn readiness_writes(mut self, enabled: bool) -> Self {
        self.readiness = enabled;
        self
    }

    fn describe(&self) -> String {
        let scheme = match (self.transport, self.secure) {
            (Transport::Tcp, true) => "tcps".to_string(),
            (Transport::Http, true) => "https".to_string(),
            (transport, _) => transport.to_string(),
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    fn resolved_auto_flush(&self) -> AutoFlush {
        if !self.auto_flush {
            return AutoFlush::OFF;
        }
        let defaults = AutoFlush::defaults(self.transport);
        AutoFlush {
            rows: self.auto_flush_rows.unwrap_or(defaults.rows),
            interval: self.auto_flush_interval.unwrap_or(defaults.interval),
            bytes: self.auto_flush_bytes.unwrap_or(defaults.bytes),
        }
    }

    fn tls_upgrade(&self) -> Result<Option<Arc<dyn SecureUpgrade>>> {
        if !self.secure {
            return Ok(None);
        }
        if self.transport == Transport::Udp {
            return Err(Error::new(ErrorCode::ConfigError, "TLS is not supported over UDP"));
        }
        match &self.tls {
            Some(upgrade) => Ok(Some(upgrade.clone())),
            None => Err(Error::new(
                ErrorCode::TlsError,
                "TLS was requested but no TLS implementation was supplied",
            )),
        }
    }

    fn tcp_auth(&self) -> Result<Option<TcpAuth>> {
        let Some(key_id) = &self.username else {
            if self.token.is_some() {
                return Err(Error::new(
                    ErrorCode::ConfigError,
                    "TCP token authentication requires a key id in \"username\"",
                ));
            }
            return Ok(None);
        };
        if self.password.is_some() {
            return Err(Error::new(
                ErrorCode::ConfigError,
                "password is not supported over TCP, use token authentication",
            ));
        }
        let signer: Arc<dyn ChallengeSigner> = match (&self.signer, &self.token) {
            (Some(signer), _) => signer.clone(),
            (None, Some(token)) => {
                let (Some(x), Some(y)) = (&self.token_x, &self.token_y) else {
                    return Err(Error::new(
                        ErrorCode::ConfigError,
                        "TCP authentication requires \"token_x\" and \"token_y\"",
                    ));
                };
                Arc::new(EcdsaSigner::from_tokens(token, x, y)?)
            }
            (None, None) => {
                return Err(Error::new(
                    ErrorCode::ConfigError,
                    "TCP authentication requires \"token\"",
                ));
            }
        };
        Ok(Some(TcpAuth {
            key_id: key_id.clone(),
            signer,
        }))
    }

    fn http_auth(&self) -> Result<Option<HttpAuth>> {
        if self.token_x.is_some() || self.token_y.is_some() {
            return Err(Error::new(
                ErrorCode::ConfigError,
                "\"token_x\" and \"token_y\" are only supported over TCP",
            ));
        }
        match (&self.username, &self.password, &self.token) {
            (None, None, None) => Ok(None),
            (Some(username), Some(password), None) => Ok(Some(HttpAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            })),
            (None, None, Some(token)) => Ok(Some(HttpAuth::Bearer(token.clone()))),
            (Some(_), None, None) => Err(Error::new(
                ErrorCode::ConfigError,
                "HTTP basic authentication requires \"password\"",
            )),
            (None, Some(_), None) => Err(Error::new(
                ErrorCode::ConfigError,
                "HTTP basic authentication requires \"username\"",
            )),
            _ => Err(Error::new(
                ErrorCode::ConfigError,
                "choose either basic authentication or a token, not both",
            )),
        }
    }

    fn check_line_only_options(&self) -> Result<()> {
        let http_only = [
            ("retry_timeout", self.retry_timeout.is_some()),
            ("request_timeout", self.request_timeout.is_some()),
            ("request_min_throughput", self.request_min_throughput.is_some()),
        ];
        if let Some((key, _)) = http_only.iter().find(|(_, set)| *set) {
            return Err(fmt_error!(ConfigError, "\"{key}\" is only supported over HTTP"));
        }
        Ok(())
    }

    fn open_channel(&self) -> Result<Box<dyn LineChannel>> {
        let tls = self.tls_upgrade()?;
        if self.transport != Transport::Udp
            && (self.multicast_ttl.is_some() || self.max_datagram_size.is_some())
        {
            return Err(Error::new(
                ErrorCode::ConfigError,
                "\"multicast_ttl\" and \"max_datagram_size\" are only supported over UDP",
            ));
        }
        let mut socket = self.socket.clone();
        if let Some(interface) = self.bind_interface {
            socket.bind = Some((interface, 0).into());
        }

        match self.transport {
            Transport::Tcp => {
                self.check_line_only_options()?;
                let settings = TcpSettings {
                    socket,
                    secure: tls,
                    auth: self.tcp_auth()?,
                    readiness: self.readiness,
                    ..TcpSettings::default()
                };
                Ok(Box::new(TcpChannel::connect(&self.host, self.port, settings)?))
            }
            Transport::Udp => {
                self.check_line_only_options()?;
                if self.username.is_some() || self.token.is_some() || self.signer.is_some() {
                    return Err(Error::new(
                        ErrorCode::ConfigError,
                        "authentication is not supported over UDP",
                    ));
                }
                let defaults = UdpSettings::default();
                let settings = UdpSettings {
                    interface: self.bind_interface,
                    multicast_ttl: self.multicast_ttl.unwrap_or(defaults.multicast_ttl),
                    max_datagram_size: self.max_datagram_size.unwrap_or(defaults.max_datagram_size),
                };
                Ok(Box::new(UdpChannel::connect(&self.host, self.port, settings)?))
            }
            Transport::Http => {
                if self.signer.is_some() {
                    return Err(Error::new(
                        ErrorCode::ConfigError,
                        "challenge signing is only supported over TCP",
                    ));
                }
                let defaults = HttpSettings::default();
                let settings = HttpSettings {
                    auth: self.http_auth()?,
                    retry_timeout: self.retry_timeout.unwrap_or(defaults.retry_timeout),
                    request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
                    min_throughput: self.request_min_throughput.unwrap_or(defaults.min_throughput),
                    retry_policy: self.retry_policy.clone(),
                    secure: tls,
                    socket,
                    ..defaults
                };
                Ok(Box::new(HttpChannel::new(&self.host, self.port, settings)?))
            }
        }
    }

    /// Opens the configured transport and returns a ready sender.
    pub fn build(self) -> Result<Sender> {
        self.check_buffer_limits()?;
        let channel = self.open_channel()?;
        self.build_with_channel(channel)
    }

    /// Builds a sender over a caller-supplied channel.
    pub fn build_with_channel(self, channel: Box<dyn LineChannel>) -> Result<Sender> {
        self.check_buffer_limits()?;
        let version = self
            .protocol_version
            .unwrap_or_else(|| self.transport.default_version());
        let buffer = Buffer::with_limits(
            version,
            self.init_buf_size,
            self.max_name_len,
            self.max_buf_size,
        );
        let auto_flush = self.resolved_auto_flush();
        let descr = format!("{} [{}]", self.describe(), channel.describe());
        info!("sender ready: {descr}, protocol {version}, auto-flush {auto_flush:?}");
        Ok(Sender {
            buffer,
            channel: Some(channel),
            auto_flush,
            last_flush: Instant::now(),
            descr,
        })
    }

    fn check_buffer_limits(&self) -> Result<()> {
        if self.init_buf_size > self.max_buf_size {
            return Err(fmt_error!(
                ConfigError,
                "init_buf_size ({}) is greater than max_buf_size ({})",
                self.init_buf_size,
                self.max_buf_size
            ));
        }
        if self.max_name_len < 16 {
            return Err(fmt_error!(
                ConfigError,
                "max_name_len must be at least 16 bytes [max_name_len={}]",
                self.max_name_len
            ));
        }
        Ok(())
    }
}

/// Buffers rows and delivers them over a [`LineChannel`].
pub struct Sender {
    buffer: Buffer,
    channel: Option<Box<dyn LineChannel>>,
    auto_flush: AutoFlush,
    last_flush: Instant,
    descr: String,
}

impl Sender {
    pub fn builder(transport: Transport, host: impl Into<String>, port: u16) -> SenderBuilder {
        SenderBuilder::new(transport, host, port)
    }

    /// Builds a sender from a `schema::key=value;...` configuration string.
    pub fn from_conf(conf: &str) -> Result<Self> {
        SenderBuilder::from_conf(conf)?.build()
    }

    /// Builds a sender from the configuration string in `QDB_CLIENT_CONF`.
    pub fn from_env() -> Result<Self> {
        SenderBuilder::from_env()?.build()
    }

    fn check_open(&self) -> Result<()> {
        if self.channel.is_none() {
            return Err(Error::new(ErrorCode::InvalidApiCall, "sender is closed"));
        }
        Ok(())
    }

    pub fn table(&mut self, name: &str) -> Result<&mut Self> {
        self.check_open()?;
        self.buffer.table(name)?;
        Ok(self)
    }

    pub fn symbol(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        self.check_open()?;
        self.buffer.symbol(name, value)?;
        Ok(self)
    }

    pub fn column(&mut self, name: &str, value: ColumnValue<'_>) -> Result<&mut Self> {
        self.check_open()?;
        self.buffer.column(name, value)?;
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

    /// Completes the row with a designated timestamp. May trigger an
    /// auto-flush; if that fails the row stays buffered.
    pub fn at(&mut self, timestamp: i64, unit: TimeUnit) -> Result<()> {
        self.check_open()?;
        self.buffer.at(timestamp, unit)?;
        self.maybe_auto_flush()
    }

    /// Completes the row with a server-assigned timestamp.
    pub fn at_now(&mut self) -> Result<()> {
        self.check_open()?;
        self.buffer.at_now()?;
        self.maybe_auto_flush()
    }

    fn maybe_auto_flush(&mut self) -> Result<()> {
        if self.auto_flush.is_due(&self.buffer, self.last_flush) {
            debug!(
                "auto-flush of {} rows ({} bytes)",
                self.buffer.row_count(),
                self.buffer.len()
            );
            self.flush()?;
        }
        Ok(())
    }

    /// Sends every buffered row and clears the buffer on success.
    pub fn flush(&mut self) -> Result<()> {
        self.send(true)
    }

    /// Sends every buffered row but keeps them, so the same rows can be
    /// sent elsewhere.
    pub fn flush_and_keep(&mut self) -> Result<()> {
        self.send(false)
    }

    fn send(&mut self, clear: bool) -> Result<()> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| Error::new(ErrorCode::InvalidApiCall, "sender is closed"))?;
        self.buffer.check_can_flush()?;
        if self.buffer.is_empty() {
            return Ok(());
        }
        channel.send(&self.buffer)?;
        debug!(
            "flushed {} rows ({} bytes) to {}",
            self.buffer.row_count(),
            self.buffer.len(),
            self.descr
        );
        self.last_flush = Instant::now();
        if clear {
            self.buffer.clear();
        }
        Ok(())
    }

    /// Discards every buffered row and the open row.
    pub fn reset(&mut self) -> Result<()> {
        self.check_open()?;
        self.buffer.clear();
        Ok(())
    }

    /// Discards the open row, keeping every complete one.
    pub fn cancel_row(&mut self) -> Result<()> {
        self.check_open()?;
        self.buffer.cancel_row();
        Ok(())
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.buffer.version()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_none()
    }

    pub fn describe(&self) -> &str {
        &self.descr
    }

    /// Flushes the complete rows, drops an unfinished one and releases the
    /// channel. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut channel) = self.channel.take() else {
            return Ok(());
        };
        if self.buffer.has_open_row() {
            warn!("discarding unfinished row on close of {}", self.descr);
            self.buffer.cancel_row();
        }
        let result = if self.buffer.is_empty() {
            Ok(())
        } else {
            channel.send(&self.buffer)
        };
        if result.is_ok() {
            self.buffer.clear();
        }
        channel.close();
        info!("closed sender {}", self.descr);
        result
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(
                "{} buffered bytes lost while closing {}: {err}",
                self.buffer.len(),
                self.descr
            );
        }
    }
}
