use std::io;
use std::os::fd::RawFd;
use std::ptr;
use std::time::Instant;

use log::trace;

use super::NetworkError;
use super::poller::{Interest, Poller, remaining_timeout};

/// kqueue(2) backend.
///
/// Changes are staged in a change list at caller-chosen offsets and handed
/// to the kernel in one `kevent` call by [`Kqueue::submit`].
pub struct Kqueue {
    kq: RawFd,
    changes: Vec<libc::kevent>,
    events: Vec<libc::kevent>,
    write_index: usize,
}

// `udata` only ever carries the correlation id, never a pointer.
unsafe impl Send for Kqueue {}

impl Kqueue {
    pub fn new(capacity: usize) -> Result<Self, NetworkError> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(NetworkError::create("kqueue"));
        }
        let empty: libc::kevent = unsafe { std::mem::zeroed() };
        let capacity = capacity.max(1);
        Ok(Self {
            kq,
            changes: vec![empty; capacity],
            events: vec![empty; capacity],
            write_index: 0,
        })
    }

    /// Selects the change list entry the next `read_fd`/`write_fd` fills.
    pub fn set_write_offset(&mut self, index: usize) -> Result<(), NetworkError> {
        if index >= self.changes.len() {
            return Err(NetworkError::Capacity {
                index,
                capacity: self.changes.len(),
            });
        }
        self.write_index = index;
        Ok(())
    }

    pub fn read_fd(&mut self, fd: RawFd, id: u64) -> Result<(), NetworkError> {
        self.stage(fd, id, libc::EVFILT_READ)
    }

    pub fn write_fd(&mut self, fd: RawFd, id: u64) -> Result<(), NetworkError> {
        self.stage(fd, id, libc::EVFILT_WRITE)
    }

    /// Applies the first `count` staged changes.
    pub fn submit(&mut self, count: usize) -> Result<(), NetworkError> {
        if count > self.changes.len() {
            return Err(NetworkError::Capacity {
                index: count,
                capacity: self.changes.len(),
            });
        }
        let zero = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe {
            libc::kevent(
                self.kq,
                self.changes.as_ptr(),
                count as libc::c_int,
                ptr::null_mut(),
                0,
                &zero,
            )
        };
        if rc < 0 {
            return Err(NetworkError::io("kevent"));
        }
        Ok(())
    }

    fn stage(&mut self, fd: RawFd, id: u64, filter: i16) -> Result<(), NetworkError> {
        let capacity = self.changes.len();
        let index = self.write_index;
        let change = self
            .changes
            .get_mut(index)
            .ok_or(NetworkError::Capacity { index, capacity })?;
        change.ident = fd as libc::uintptr_t;
        change.filter = filter as _;
        change.flags = (libc::EV_ADD | libc::EV_ONESHOT) as _;
        change.fflags = 0;
        change.data = 0;
        change.udata = id as usize as *mut libc::c_void as _;
        self.write_index += 1;
        Ok(())
    }
}

impl Poller for Kqueue {
    fn register(&mut self, fd: RawFd, id: u64, interest: Interest) -> Result<(), NetworkError> {
        self.set_write_offset(0)?;
        match interest {
            Interest::Read => self.read_fd(fd, id)?,
            Interest::Write => self.write_fd(fd, id)?,
        }
        self.submit(1)
    }

    fn poll(&mut self, timeout_ms: i32) -> Result<usize, NetworkError> {
        let started = Instant::now();
        let mut timeout = timeout_ms;
        loop {
            let spec = libc::timespec {
                tv_sec: (timeout / 1_000) as libc::time_t,
                tv_nsec: ((timeout % 1_000) * 1_000_000) as libc::c_long,
            };
            let spec_ptr = if timeout < 0 { ptr::null() } else { &spec as *const _ };
            let n = unsafe {
                libc::kevent(
                    self.kq,
                    ptr::null(),
                    0,
                    self.events.as_mut_ptr(),
                    self.events.len() as libc::c_int,
                    spec_ptr,
                )
            };
            if n >= 0 {
                trace!("kevent returned {n} events");
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(NetworkError::Io {
                    op: "kevent",
                    source: err,
                });
            }
            timeout = remaining_timeout(timeout_ms, started);
        }
    }

    fn event_id(&self, index: usize) -> Option<u64> {
        self.events.get(index).map(|event| event.udata as usize as u64)
    }

    fn capacity(&self) -> usize {
        self.events.len()
    }

    fn close(&mut self) {
        if self.kq >= 0 {
            unsafe {
                libc::close(self.kq);
            }
            self.kq = -1;
            self.changes = Vec::new();
            self.events = Vec::new();
        }
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        self.close();
    }
}
