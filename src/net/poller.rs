use std::io;
use std::os::fd::RawFd;
use std::sync::OnceLock;
use std::time::Instant;

use log::debug;

use super::NetworkError;

/// The readiness a registration waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// Edge-triggered, one-shot readiness multiplexer.
///
/// A registration fires at most once; callers re-register after every
/// wake-up. Ready events are read back by index after [`Poller::poll`].
pub trait Poller: Send {
    /// Arms a single notification for `fd`, tagged with `id`.
    fn register(&mut self, fd: RawFd, id: u64, interest: Interest) -> Result<(), NetworkError>;

    /// Waits up to `timeout_ms` (negative waits forever) and returns the
    /// number of ready events.
    fn poll(&mut self, timeout_ms: i32) -> Result<usize, NetworkError>;

    /// Correlation id of the `index`-th ready event, `None` past the event
    /// array or after `close`. Only indices below the last `poll` count are
    /// meaningful.
    fn event_id(&self, index: usize) -> Option<u64>;

    /// Maximum number of events a single `poll` can report.
    fn capacity(&self) -> usize;

    /// Releases the OS resource. Safe to call more than once.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Epoll,
    Kqueue,
    Unsupported,
}

/// Facts about the running OS the transports depend on.
#[derive(Debug)]
pub struct Platform {
    pub backend: Backend,
    pub in_progress: i32,
    pub would_block: i32,
}

static PLATFORM: OnceLock<Platform> = OnceLock::new();

pub fn platform() -> &'static Platform {
    PLATFORM.get_or_init(|| {
        let backend = if cfg!(target_os = "linux") {
            Backend::Epoll
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        )) {
            Backend::Kqueue
        } else {
            Backend::Unsupported
        };
        debug!("readiness backend: {backend:?}");
        Platform {
            backend,
            in_progress: libc::EINPROGRESS,
            would_block: libc::EWOULDBLOCK,
        }
    })
}

/// Creates the poller for the current platform.
pub fn create_poller(capacity: usize) -> Result<Box<dyn Poller>, NetworkError> {
    match platform().backend {
        #[cfg(target_os = "linux")]
        Backend::Epoll => Ok(Box::new(super::Epoll::new(capacity)?)),
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        Backend::Kqueue => Ok(Box::new(super::Kqueue::new(capacity)?)),
        _ => Err(NetworkError::Unsupported),
    }
}

/// Blocks until `fd` is ready for `interest` or `deadline` passes.
///
/// Wake-ups for other ids are tolerated; the caller retries its operation
/// and comes back here on `WouldBlock`.
pub fn wait_ready(
    poller: &mut dyn Poller,
    fd: RawFd,
    id: u64,
    interest: Interest,
    deadline: Instant,
) -> io::Result<()> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
    }
    poller.register(fd, id, interest)?;
    let timeout_ms = remaining.as_millis().clamp(1, i32::MAX as u128) as i32;
    if poller.poll(timeout_ms)? == 0 {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
    }
    Ok(())
}

/// Remaining milliseconds of `timeout_ms` after `started`, for EINTR retries.
pub(crate) fn remaining_timeout(timeout_ms: i32, started: Instant) -> i32 {
    if timeout_ms < 0 {
        return timeout_ms;
    }
    let elapsed = started.elapsed().as_millis().min(i32::MAX as u128) as i32;
    (timeout_ms - elapsed).max(0)
}
