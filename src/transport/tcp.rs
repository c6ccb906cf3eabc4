use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::auth::{ChallengeSigner, authenticate};
use super::{LineChannel, resolve};
use crate::error::{Result, fmt_error, socket_error};
use crate::net::{Poller, SecureUpgrade, Socket, SocketOptions, create_poller};
use crate::protocol::Buffer;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CHALLENGE_LEN: usize = 64 * 1024;

/// Key id and signer for the TCP challenge-response handshake.
#[derive(Clone)]
pub struct TcpAuth {
    pub key_id: String,
    pub signer: Arc<dyn ChallengeSigner>,
}

#[derive(Clone)]
pub struct TcpSettings {
    pub socket: SocketOptions,
    /// Set for `tcps`; the upgrade runs before authentication.
    pub secure: Option<Arc<dyn SecureUpgrade>>,
    pub auth: Option<TcpAuth>,
    /// Drive writes through a poller on a non-blocking socket.
    pub readiness: bool,
    pub write_timeout: Duration,
    pub max_challenge_len: usize,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            socket: SocketOptions::default(),
            secure: None,
            auth: None,
            readiness: false,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_challenge_len: DEFAULT_MAX_CHALLENGE_LEN,
        }
    }
}

/// Streams rows over a single TCP connection.
///
/// A failed write drops the connection. The next `send` reconnects and
/// re-authenticates, then writes the whole buffer again.
pub struct TcpChannel {
    addr: SocketAddr,
    host: String,
    settings: TcpSettings,
    socket: Option<Socket>,
    poller: Option<Box<dyn Poller>>,
    conn_id: u64,
}

impl TcpChannel {
    /// Resolves `host:port` and connects eagerly so configuration errors
    /// surface at build time.
    pub fn connect(host: &str, port: u16, settings: TcpSettings) -> Result<Self> {
        let addr = resolve(host, port)?;
        let poller = if settings.readiness {
            Some(create_poller(1)?)
        } else {
            None
        };
        let mut channel = Self {
            addr,
            host: host.to_string(),
            settings,
            socket: None,
            poller,
            conn_id: 0,
        };
        channel.socket = Some(channel.open()?);
        Ok(channel)
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn open(&mut self) -> Result<Socket> {
        self.conn_id += 1;
        let mut socket = Socket::connect(self.addr, &self.settings.socket)
            .map_err(|err| socket_error(&format!("Could not connect to {}", self.addr), err))?;

        if let Some(upgrade) = &self.settings.secure {
            socket
                .start_secure(upgrade.as_ref(), &self.host)
                .map_err(|err| fmt_error!(TlsError, "Failed to establish TLS session: {err}"))?;
        }
        if let Some(auth) = &self.settings.auth {
            authenticate(
                &mut socket,
                &auth.key_id,
                auth.signer.as_ref(),
                self.settings.max_challenge_len,
            )?;
        }
        if self.poller.is_some() {
            socket
                .set_nonblocking(true)
                .map_err(|err| socket_error("Could not switch socket to non-blocking", err))?;
        }
        info!(
            "connected to {} [id={}, secure={}, auth={}]",
            self.addr,
            self.conn_id,
            socket.is_secure(),
            self.settings.auth.is_some()
        );
        Ok(socket)
    }

    fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }
}

impl LineChannel for TcpChannel {
    fn send(&mut self, buffer: &Buffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        if self.socket.is_none() {
            debug!("reconnecting to {}", self.addr);
            self.socket = Some(self.open()?);
        }

        let id = self.conn_id;
        let result = match (self.socket.as_mut(), self.poller.as_mut()) {
            (Some(socket), Some(poller)) => {
                let deadline = Instant::now() + self.settings.write_timeout;
                socket.send_all_ready(buffer.as_bytes(), poller.as_mut(), id, deadline)
            }
            (Some(socket), None) => socket
                .write_all(buffer.as_bytes())
                .and_then(|()| socket.flush()),
            (None, _) => Ok(()),
        };

        result.map_err(|err| {
            warn!("write to {} failed, dropping connection: {err}", self.addr);
            self.disconnect();
            socket_error("Could not flush buffered messages", err)
        })
    }

    fn close(&mut self) {
        self.disconnect();
        if let Some(poller) = self.poller.as_mut() {
            poller.close();
        }
    }

    fn describe(&self) -> String {
        let scheme = if self.settings.secure.is_some() { "tcps" } else { "tcp" };
        format!("{scheme}://{}", self.addr)
    }
}
