use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64ct::{Base64, Encoding};
use log::{debug, info, warn};
use serde::Deserialize;

use super::retry::{Backoff, RetryPolicy};
use super::{LineChannel, resolve};
use crate::error::{Error, ErrorCode, Result, fmt_error, socket_error};
use crate::http::{HeaderParser, decode_chunks};
use crate::net::{Poller, SecureUpgrade, Socket, SocketOptions, create_poller};
use crate::protocol::Buffer;

const USER_AGENT: &str = concat!("ilp-client/", env!("CARGO_PKG_VERSION"));
const DEFAULT_RESPONSE_HEADER_CAPACITY: usize = 16 * 1024;
const RECV_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    Basic { username: String, password: String },
    Bearer(String),
}

impl HttpAuth {
    fn header_value(&self) -> String {
        match self {
            HttpAuth::Basic { username, password } => {
                format!("Basic {}", Base64::encode_string(format!("{username}:{password}").as_bytes()))
            }
            HttpAuth::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

#[derive(Clone)]
pub struct HttpSettings {
    pub path: String,
    pub auth: Option<HttpAuth>,
    /// Total time spent retrying a flush; zero disables retries.
    pub retry_timeout: Duration,
    /// Base time allowed for one request/response exchange.
    pub request_timeout: Duration,
    /// Bytes per second the timeout budget grows by for large bodies.
    pub min_throughput: u64,
    pub retry_policy: RetryPolicy,
    pub secure: Option<Arc<dyn SecureUpgrade>>,
    pub socket: SocketOptions,
    pub response_header_capacity: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            path: "/write".to_string(),
            auth: None,
            retry_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            min_throughput: 100 * 1024,
            retry_policy: RetryPolicy::default(),
            secure: None,
            socket: SocketOptions::default(),
            response_header_capacity: DEFAULT_RESPONSE_HEADER_CAPACITY,
        }
    }
}

/// Error document the server returns for rejected writes.
#[derive(Debug, Deserialize)]
struct ServerError {
    message: String,
    #[serde(default)]
    line: Option<i64>,
    #[serde(rename = "errorId", default)]
    error_id: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

struct Response {
    status: u16,
    body: Vec<u8>,
    keep_alive: bool,
}

/// Sends each flush as one `POST` request over a kept-alive connection.
pub struct HttpChannel {
    addr: SocketAddr,
    host: String,
    port: u16,
    settings: HttpSettings,
    socket: Option<Socket>,
    poller: Box<dyn Poller>,
    parser: HeaderParser,
    recv_buf: Vec<u8>,
    conn_id: u64,
}

impl HttpChannel {
    /// Resolves the server address. The connection is opened lazily on the
    /// first flush.
    pub fn new(host: &str, port: u16, settings: HttpSettings) -> Result<Self> {
        let addr = resolve(host, port)?;
        let poller = create_poller(1)?;
        let parser = HeaderParser::new(settings.response_header_capacity);
        Ok(Self {
            addr,
            host: host.to_string(),
            port,
            settings,
            socket: None,
            poller,
            parser,
            recv_buf: vec![0; RECV_CHUNK],
            conn_id: 0,
        })
    }

    fn request_timeout(&self, body_len: usize) -> Duration {
        let mut timeout = self.settings.request_timeout;
        if self.settings.min_throughput > 0 {
            timeout += Duration::from_secs_f64(body_len as f64 / self.settings.min_throughput as f64);
        }
        timeout
    }

    fn request_head(&self, body_len: usize) -> String {
        let mut head = String::with_capacity(256);
        let _ = write!(
            head,
            "POST {} HTTP/1.1\r\n\
             Host: {}:{}\r\n\
             User-Agent: {USER_AGENT}\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Length: {body_len}\r\n",
            self.settings.path, self.host, self.port
        );
        if let Some(auth) = &self.settings.auth {
            let _ = write!(head, "Authorization: {}\r\n", auth.header_value());
        }
        head.push_str("\r\n");
        head
    }

    fn connect(&mut self, deadline: Instant) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        self.conn_id += 1;
        let mut socket = Socket::connect_nonblocking(
            self.addr,
            &self.settings.socket,
            self.poller.as_mut(),
            self.conn_id,
            deadline,
        )
        .map_err(|err| socket_error(&format!("Could not connect to {}", self.addr), err))?;
        if let Some(upgrade) = &self.settings.secure {
            socket
                .start_secure(upgrade.as_ref(), &self.host)
                .map_err(|err| fmt_error!(TlsError, "Failed to establish TLS session: {err}"))?;
        }
        info!("connected to http://{} [id={}]", self.addr, self.conn_id);
        self.socket = Some(socket);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }

    fn exchange(&mut self, body: &[u8], deadline: Instant) -> Result<Response> {
        self.connect(deadline)?;
        let head = self.request_head(body.len());

        let Self {
            socket,
            poller,
            parser,
            recv_buf,
            conn_id,
            ..
        } = self;
        let Some(socket) = socket.as_mut() else {
            return Err(Error::new(ErrorCode::SocketError, "not connected"));
        };
        let id = *conn_id;

        socket
            .send_all_ready(head.as_bytes(), poller.as_mut(), id, deadline)
            .and_then(|()| socket.send_all_ready(body, poller.as_mut(), id, deadline))
            .map_err(|err| socket_error("Could not flush buffer", err))?;

        read_response(socket, poller.as_mut(), id, deadline, parser, recv_buf)
    }

    fn send_once(&mut self, body: &[u8]) -> Result<()> {
        let deadline = Instant::now() + self.request_timeout(body.len());
        let response = match self.exchange(body, deadline) {
            Ok(response) => response,
            Err(err) => {
                self.disconnect();
                return Err(err);
            }
        };
        if !response.keep_alive {
            self.disconnect();
        }
        if (200..300).contains(&response.status) {
            debug!("flushed {} bytes [status={}]", body.len(), response.status);
            return Ok(());
        }
        self.disconnect();
        Err(self.status_error(response.status, &response.body))
    }

    fn status_error(&self, status: u16, body: &[u8]) -> Error {
        let retryable = self.settings.retry_policy.is_retryable(status);
        let msg = match serde_json::from_slice::<ServerError>(body) {
            Ok(server) => {
                let mut msg = format!("Could not flush buffer: {} [http-status={status}", server.message);
                if let Some(id) = &server.error_id {
                    let _ = write!(msg, ", id: {id}");
                }
                if let Some(code) = &server.code {
                    let _ = write!(msg, ", code: {code}");
                }
                if let Some(line) = server.line {
                    let _ = write!(msg, ", line: {line}");
                }
                msg.push(']');
                msg
            }
            Err(_) => format!(
                "Could not flush buffer: {} [http-status={status}]",
                String::from_utf8_lossy(body).trim()
            ),
        };
        Error::new(ErrorCode::ServerFlushError, msg).with_retryable(retryable)
    }
}

fn read_response(
    socket: &mut Socket,
    poller: &mut dyn Poller,
    id: u64,
    deadline: Instant,
    parser: &mut HeaderParser,
    recv_buf: &mut [u8],
) -> Result<Response> {
    let io_err = |err| socket_error("Could not read response", err);
    let eof = || {
        Error::new(ErrorCode::SocketError, "Could not read response: connection closed by peer")
            .with_retryable(true)
    };

    parser.clear();
    let mut pending = Vec::new();
    while parser.is_incomplete() {
        let n = socket.recv_ready(recv_buf, poller, id, deadline).map_err(io_err)?;
        if n == 0 {
            return Err(eof());
        }
        let used = parser.parse(&recv_buf[..n], false, true)?;
        if !parser.is_incomplete() {
            pending.extend_from_slice(&recv_buf[used..n]);
        }
    }

    let status = parser
        .status_code()
        .ok_or_else(|| fmt_error!(ServerFlushError, "response has no status code"))?;
    let close_requested = parser
        .header("Connection")
        .is_some_and(|value| value.eq_ignore_ascii_case("close"));
    let chunked = parser
        .header("Transfer-Encoding")
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));
    let content_length = parser.content_length();

    if status == 204 || status == 304 || (100..200).contains(&status) {
        return Ok(Response {
            status,
            body: Vec::new(),
            keep_alive: !close_requested,
        });
    }

    let mut body = Vec::new();
    if chunked {
        loop {
            let (consumed, done) = decode_chunks(&pending, &mut body)?;
            pending.drain(..consumed);
            if done {
                break;
            }
            let n = socket.recv_ready(recv_buf, poller, id, deadline).map_err(io_err)?;
            if n == 0 {
                return Err(eof());
            }
            pending.extend_from_slice(&recv_buf[..n]);
        }
        return Ok(Response {
            status,
            body,
            keep_alive: !close_requested,
        });
    }

    if content_length >= 0 {
        let expected = content_length as usize;
        while pending.len() < expected {
            let n = socket.recv_ready(recv_buf, poller, id, deadline).map_err(io_err)?;
            if n == 0 {
                return Err(eof());
            }
            pending.extend_from_slice(&recv_buf[..n]);
        }
        pending.truncate(expected);
        return Ok(Response {
            status,
            body: pending,
            keep_alive: !close_requested,
        });
    }

    // no framing: the body runs until the server closes
    loop {
        let n = socket.recv_ready(recv_buf, poller, id, deadline).map_err(io_err)?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&recv_buf[..n]);
    }
    Ok(Response {
        status,
        body: pending,
        keep_alive: false,
    })
}

impl LineChannel for HttpChannel {
    fn send(&mut self, buffer: &Buffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let body = buffer.as_bytes();
        let mut backoff = Backoff::new(self.settings.retry_timeout);
        loop {
            match self.send_once(body) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!("flush to {} failed, retrying in {delay:?}: {err}", self.addr);
                        thread::sleep(delay);
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }

    fn close(&mut self) {
        self.disconnect();
        self.poller.close();
        self.parser.close();
    }

    fn describe(&self) -> String {
        let scheme = if self.settings.secure.is_some() { "https" } else { "http" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.settings.path)
    }
}
