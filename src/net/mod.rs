//! Sockets and readiness notification.
//!
//! # Overview
//!
//! Transports that must not block indefinitely put their socket into
//! non-blocking mode and wait for readiness through a [`Poller`]. Two
//! backends implement it, [`Epoll`] on Linux and [`Kqueue`] on the BSDs and
//! macOS; [`platform`] picks one once per process. Every registration is
//! edge-triggered and one-shot, so a caller re-registers after each wake-up.
//! Registrations are identified by an opaque `u64` correlation id rather than
//! by file descriptor, which keeps stale events harmless when a descriptor
//! number is reused by a new connection.
//!
//! # Key Components
//!
//! - [`Poller`]: readiness multiplexer interface.
//! - [`Socket`]: TCP stream with keep-alive, no-delay and an optional
//!   [`SecureUpgrade`] capability.
//! - [`NetworkError`]: failure to create or use an OS resource.
mod poller;
mod socket;

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;

use std::io;

use thiserror::Error;

use crate::error::{Error, ErrorCode};

#[cfg(target_os = "linux")]
pub use epoll::Epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::Kqueue;
pub use poller::{Backend, Interest, Platform, Poller, create_poller, platform, wait_ready};
pub use socket::{SecureStream, SecureUpgrade, Socket, SocketOptions, default_keepalive};

#[cfg(test)]
pub(crate) use socket::tests::PassthroughUpgrade;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("could not create {resource}: {source}")]
    Create {
        resource: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("change index {index} is outside the change list of {capacity} entries")]
    Capacity { index: usize, capacity: usize },
    #[error("readiness notification is not supported on this platform")]
    Unsupported,
}

impl NetworkError {
    pub(crate) fn create(resource: &'static str) -> Self {
        NetworkError::Create {
            resource,
            source: io::Error::last_os_error(),
        }
    }

    pub(crate) fn io(op: &'static str) -> Self {
        NetworkError::Io {
            op,
            source: io::Error::last_os_error(),
        }
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            NetworkError::Create { source, .. } | NetworkError::Io { source, .. } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

impl From<NetworkError> for Error {
    fn from(err: NetworkError) -> Self {
        let errno = err.errno();
        Error::new(ErrorCode::SocketError, err.to_string()).with_errno(errno)
    }
}

impl From<NetworkError> for io::Error {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Create { source, .. } | NetworkError::Io { source, .. } => source,
            other => io::Error::other(other.to_string()),
        }
    }
}
