//! macOS backend: `kqueue(2)`, watching child pids directly via `EVFILT_PROC`
//! (no pidfd equivalent is needed here since the BSDs can filter on pid).

use {
    crate::{ProcessCallback, ProcessHandle, ReadCallback, Reactor},
    std::{
        collections::HashMap,
        io,
        os::unix::io::{AsRawFd, OwnedFd, RawFd},
    },
};

enum Slot {
    Read(ReadCallback),
    Process(ProcessCallback),
}

/// A [`Reactor`] built on a single `kqueue` instance.
pub struct KqueueReactor {
    kq: OwnedFd,
    slots: HashMap<i64, Slot>,
    read_handles: HashMap<RawFd, crate::RawReadHandle>,
    stopped: bool,
}

impl KqueueReactor {
    /// Create a fresh, empty reactor.
    pub fn new() -> io::Result<Self> {
        // SAFETY: kqueue() has no preconditions.
        let fd = unsafe { libc::kqueue() };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just created and is owned by nobody else.
        let kq = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { kq, slots: HashMap::new(), read_handles: HashMap::new(), stopped: false })
    }

    fn register(&self, ident: i64, filter: i16, fflags: u32) -> io::Result<()> {
        let kev = libc::kevent {
            ident: ident as usize,
            filter,
            flags: libc::EV_ADD,
            fflags,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        // SAFETY: kq is a valid kqueue instance; a one-element changelist
        // with no output list is a standard registration call.
        let ret = unsafe {
            libc::kevent(self.kq.as_raw_fd(), &kev, 1, std::ptr::null_mut(), 0, std::ptr::null())
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn drain_read(&mut self, fd: RawFd) -> bool {
        let mut buffer = [0u8; 4096];
        loop {
            // SAFETY: buffer is a valid, writable region of the given length.
            let n = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                if let Some(Slot::Read(callback)) = self.slots.get_mut(&(fd as i64)) {
                    callback(&[]);
                }
                return true;
            }
            let n = n as usize;
            if n == 0 {
                if let Some(Slot::Read(callback)) = self.slots.get_mut(&(fd as i64)) {
                    callback(&[]);
                }
                return true;
            }
            if let Some(Slot::Read(callback)) = self.slots.get_mut(&(fd as i64)) {
                callback(&buffer[..n]);
            }
            if n < buffer.len() {
                return false;
            }
        }
    }
}

impl Reactor for KqueueReactor {
    fn register_read(&mut self, handle: crate::RawReadHandle, callback: ReadCallback) -> io::Result<()> {
        let fd = handle.as_raw_fd();
        self.register(fd as i64, libc::EVFILT_READ, 0u32)?;
        self.slots.insert(fd as i64, Slot::Read(callback));
        self.read_handles.insert(fd, handle);
        Ok(())
    }

    fn register_process(&mut self, process: ProcessHandle, callback: ProcessCallback) -> io::Result<()> {
        self.register(process.pid as i64, libc::EVFILT_PROC, libc::NOTE_EXIT)?;
        self.slots.insert(process.pid as i64, Slot::Process(callback));
        Ok(())
    }

    fn run(&mut self) {
        while !self.stopped && !self.slots.is_empty() {
            let mut kev: libc::kevent = unsafe { std::mem::zeroed() };
            // SAFETY: kq is valid; kev is a single writable event slot with
            // no timeout (block indefinitely).
            let ret = unsafe {
                libc::kevent(self.kq.as_raw_fd(), std::ptr::null(), 0, &mut kev, 1, std::ptr::null())
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(%err, "kevent failed");
                break;
            }
            if ret == 0 {
                continue;
            }

            let ident = kev.ident as i64;
            if kev.filter == libc::EVFILT_PROC {
                if let Some(Slot::Process(callback)) = self.slots.remove(&ident) {
                    callback(false);
                }
                continue;
            }

            if self.drain_read(ident as RawFd) {
                self.slots.remove(&ident);
                self.read_handles.remove(&(ident as RawFd));
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
