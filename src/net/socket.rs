use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, TcpKeepalive, Type};

use super::poller::{Interest, Poller, platform, wait_ready};

const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overrides the TCP keep-alive idle time in seconds; `0` disables it.
pub const KEEPALIVE_ENV: &str = "ILP_TCP_KEEPALIVE_SECS";

/// An encrypted stream produced by a [`SecureUpgrade`].
pub trait SecureStream: Read + Write + Send {
    /// Descriptor of the underlying TCP socket, for readiness polling.
    fn raw_fd(&self) -> RawFd;
}

/// Turns a connected TCP socket into a [`SecureStream`].
///
/// The crate ships no TLS implementation; callers that need `tcps` or
/// `https` plug one in through this trait.
pub trait SecureUpgrade: Send + Sync {
    fn upgrade(
        &self,
        server_name: &str,
        socket: socket2::Socket,
    ) -> io::Result<Box<dyn SecureStream>>;
}

/// Keep-alive idle time applied to new TCP sockets.
pub fn default_keepalive() -> Option<Duration> {
    static KEEPALIVE: OnceLock<Option<Duration>> = OnceLock::new();
    *KEEPALIVE.get_or_init(|| match std::env::var(KEEPALIVE_ENV) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(0) => None,
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                warn!("ignoring {KEEPALIVE_ENV}={value:?}, expected a number of seconds");
                Some(DEFAULT_KEEPALIVE)
            }
        },
        Err(_) => Some(DEFAULT_KEEPALIVE),
    })
}

#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub nodelay: bool,
    pub keepalive: Option<Duration>,
    pub bind: Option<SocketAddr>,
    pub connect_timeout: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: default_keepalive(),
            bind: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

enum Stream {
    Plain(socket2::Socket),
    Secure(Box<dyn SecureStream>),
}

/// A connected TCP socket, optionally upgraded to a secure stream.
pub struct Socket {
    stream: Option<Stream>,
    peer: SocketAddr,
}

impl Socket {
    fn open(addr: SocketAddr, opts: &SocketOptions) -> io::Result<socket2::Socket> {
        let socket = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        if opts.nodelay {
            socket.set_nodelay(true)?;
        }
        if let Some(idle) = opts.keepalive {
            socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
        }
        if let Some(bind) = opts.bind {
            socket.bind(&SockAddr::from(bind))?;
        }
        Ok(socket)
    }

    /// Connects in blocking mode, bounded by `opts.connect_timeout`.
    pub fn connect(addr: SocketAddr, opts: &SocketOptions) -> io::Result<Self> {
        let socket = Self::open(addr, opts)?;
        socket.connect_timeout(&SockAddr::from(addr), opts.connect_timeout)?;
        debug!("connected to {addr}");
        Ok(Self {
            stream: Some(Stream::Plain(socket)),
            peer: addr,
        })
    }

    /// Connects a non-blocking socket, waiting for completion on `poller`.
    pub fn connect_nonblocking(
        addr: SocketAddr,
        opts: &SocketOptions,
        poller: &mut dyn Poller,
        id: u64,
        deadline: Instant,
    ) -> io::Result<Self> {
        let socket = Self::open(addr, opts)?;
        socket.set_nonblocking(true)?;
        match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => {}
            Err(err)
                if err.raw_os_error() == Some(platform().in_progress)
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                wait_ready(poller, socket.as_raw_fd(), id, Interest::Write, deadline)?;
                if let Some(err) = socket.take_error()? {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
        debug!("connected to {addr} [id={id}]");
        Ok(Self {
            stream: Some(Stream::Plain(socket)),
            peer: addr,
        })
    }

    /// Hands the plain socket to `upgrade`. On failure the socket is closed.
    pub fn start_secure(&mut self, upgrade: &dyn SecureUpgrade, server_name: &str) -> io::Result<()> {
        match self.stream.take() {
            Some(Stream::Plain(socket)) => {
                let secure = upgrade.upgrade(server_name, socket)?;
                self.stream = Some(Stream::Secure(secure));
                debug!("secure session established with {}", self.peer);
                Ok(())
            }
            other => {
                self.stream = other;
                Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "socket is closed or already secure",
                ))
            }
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn fd(&self) -> Option<RawFd> {
        match self.stream.as_ref()? {
            Stream::Plain(socket) => Some(socket.as_raw_fd()),
            Stream::Secure(stream) => Some(stream.raw_fd()),
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.stream, Some(Stream::Secure(_)))
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &self.stream {
            Some(Stream::Plain(socket)) => socket.set_read_timeout(timeout),
            Some(Stream::Secure(_)) => Ok(()),
            None => Err(not_connected()),
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match &self.stream {
            Some(Stream::Plain(socket)) => socket.set_nonblocking(nonblocking),
            Some(Stream::Secure(_)) => Ok(()),
            None => Err(not_connected()),
        }
    }

    pub fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(Stream::Plain(socket)) => socket.write(buf),
            Some(Stream::Secure(stream)) => stream.write(buf),
            None => Err(not_connected()),
        }
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(Stream::Plain(socket)) => socket.read(buf),
            Some(Stream::Secure(stream)) => stream.read(buf),
            None => Err(not_connected()),
        }
    }

    /// Writes all of `buf`, waiting on `poller` whenever the socket would block.
    pub fn send_all_ready(
        &mut self,
        mut buf: &[u8],
        poller: &mut dyn Poller,
        id: u64,
        deadline: Instant,
    ) -> io::Result<()> {
        while !buf.is_empty() {
            match self.send(buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(err) if would_block(&err) => {
                    let fd = self.fd().ok_or_else(not_connected)?;
                    wait_ready(poller, fd, id, Interest::Write, deadline)?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Reads at least one byte, waiting on `poller` whenever the socket
    /// would block. Returns 0 when the peer closed the connection.
    pub fn recv_ready(
        &mut self,
        buf: &mut [u8],
        poller: &mut dyn Poller,
        id: u64,
        deadline: Instant,
    ) -> io::Result<usize> {
        loop {
            match self.recv(buf) {
                Ok(n) => return Ok(n),
                Err(err) if would_block(&err) => {
                    let fd = self.fd().ok_or_else(not_connected)?;
                    wait_ready(poller, fd, id, Interest::Read, deadline)?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Stream::Plain(socket) = &stream {
                let _ = socket.shutdown(Shutdown::Both);
            }
            debug!("closed connection to {}", self.peer);
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(Stream::Secure(stream)) => stream.flush(),
            _ => Ok(()),
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(platform().would_block)
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is closed")
}
