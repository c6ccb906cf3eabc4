//! Delivery of encoded rows to the server.
//!
//! Every transport implements [`LineChannel`]. A channel receives the whole
//! [`Buffer`] on flush and either delivers all of it or fails without
//! touching it, so the sender can retry with identical bytes.
//!
//! # Key Components
//!
//! - [`TcpChannel`]: streams rows over TCP, optionally authenticated with a
//!   [`ChallengeSigner`] and secured through a
//!   [`SecureUpgrade`](crate::net::SecureUpgrade).
//! - [`UdpChannel`]: fire-and-forget datagrams split on row boundaries.
//! - [`HttpChannel`]: one `POST /write` per flush with status classification
//!   through a [`RetryPolicy`] and bounded retries.
mod auth;
mod http;
mod retry;
mod tcp;
mod udp;

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Result, fmt_error};
use crate::protocol::Buffer;

pub use auth::{ChallengeSigner, EcdsaSigner};
pub use http::{HttpAuth, HttpChannel, HttpSettings};
pub use retry::{Backoff, RetryPolicy};
pub use tcp::{TcpAuth, TcpChannel, TcpSettings};
pub use udp::{UdpChannel, UdpSettings};

/// A destination for encoded rows.
pub trait LineChannel: Send {
    /// Delivers every complete row in `buffer`.
    ///
    /// On error the buffer is left for the caller to retry or discard.
    fn send(&mut self, buffer: &Buffer) -> Result<()>;

    /// Releases the connection. Safe to call more than once.
    fn close(&mut self);

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Resolves `host:port` to its first address.
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|err| {
            fmt_error!(CouldNotResolveAddr, "could not resolve {host}:{port}: {err}")
                .with_errno(err.raw_os_error())
        })?
        .next()
        .ok_or_else(|| fmt_error!(CouldNotResolveAddr, "no address found for {host}:{port}"))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::Error;

    #[derive(Default)]
    pub(crate) struct Recorded {
        pub sent: Vec<Vec<u8>>,
        pub failures: VecDeque<Error>,
        pub closed: usize,
    }

    /// Records every flush; queued failures are returned first.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingChannel {
        pub state: Arc<Mutex<Recorded>>,
    }

    impl RecordingChannel {
        pub fn fail_next(&self, err: Error) {
            self.state.lock().unwrap().failures.push_back(err);
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().sent.clone()
        }

        pub fn closed(&self) -> usize {
            self.state.lock().unwrap().closed
        }
    }

    impl LineChannel for RecordingChannel {
        fn send(&mut self, buffer: &Buffer) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.failures.pop_front() {
                return Err(err);
            }
            state.sent.push(buffer.as_bytes().to_vec());
            Ok(())
        }

        fn close(&mut self) {
            self.state.lock().unwrap().closed += 1;
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }
}
