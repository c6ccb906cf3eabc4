use std::io;
use std::os::fd::RawFd;
use std::time::Instant;

use log::trace;

use super::NetworkError;
use super::poller::{Interest, Poller, remaining_timeout};

/// epoll(7) backend.
pub struct Epoll {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
}

impl Epoll {
    pub fn new(capacity: usize) -> Result<Self, NetworkError> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(NetworkError::create("epoll"));
        }
        Ok(Self {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
        })
    }

    fn control(&self, op: libc::c_int, fd: RawFd, event: &mut libc::epoll_event) -> io::Result<()> {
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Poller for Epoll {
    fn register(&mut self, fd: RawFd, id: u64, interest: Interest) -> Result<(), NetworkError> {
        let readiness = match interest {
            Interest::Read => libc::EPOLLIN,
            Interest::Write => libc::EPOLLOUT,
        };
        let mut event = libc::epoll_event {
            events: (readiness | libc::EPOLLET | libc::EPOLLONESHOT) as u32,
            u64: id,
        };
        // a consumed one-shot registration stays in the set, disabled
        match self.control(libc::EPOLL_CTL_ADD, fd, &mut event) {
            Ok(()) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::EEXIST) => self
                .control(libc::EPOLL_CTL_MOD, fd, &mut event)
                .map_err(|source| NetworkError::Io {
                    op: "epoll_ctl",
                    source,
                }),
            Err(source) => Err(NetworkError::Io {
                op: "epoll_ctl",
                source,
            }),
        }
    }

    fn poll(&mut self, timeout_ms: i32) -> Result<usize, NetworkError> {
        let started = Instant::now();
        let mut timeout = timeout_ms;
        loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    self.events.as_mut_ptr(),
                    self.events.len() as libc::c_int,
                    timeout,
                )
            };
            if n >= 0 {
                trace!("epoll_wait returned {n} events");
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(NetworkError::Io {
                    op: "epoll_wait",
                    source: err,
                });
            }
            timeout = remaining_timeout(timeout_ms, started);
        }
    }

    fn event_id(&self, index: usize) -> Option<u64> {
        self.events.get(index).copied().map(|event| event.u64)
    }

    fn capacity(&self) -> usize {
        self.events.len()
    }

    fn close(&mut self) {
        if self.epfd >= 0 {
            unsafe {
                libc::close(self.epfd);
            }
            self.epfd = -1;
            self.events = Vec::new();
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        self.close();
    }
}
