//! Linux backend: `epoll(7)` plus `pidfd_open(2)` for process completion.

use {
    super::pidfd_open,
    crate::{ProcessCallback, ProcessHandle, ReadCallback, Reactor},
    std::{
        collections::HashMap,
        io,
        os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    },
};

enum Slot {
    Read(ReadCallback),
    Process { callback: ProcessCallback, _pidfd: OwnedFd },
}

/// A [`Reactor`] built on a single `epoll` instance.
pub struct EpollReactor {
    epoll_fd: OwnedFd,
    slots: HashMap<RawFd, Slot>,
    // Kept alive for as long as the registered read is outstanding.
    read_handles: HashMap<RawFd, crate::RawReadHandle>,
    stopped: bool,
}

impl EpollReactor {
    /// Create a fresh, empty reactor.
    pub fn new() -> io::Result<Self> {
        // SAFETY: epoll_create1 has no preconditions beyond a valid flags
        // argument; EPOLL_CLOEXEC is a plain bit flag.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just created and is owned by nobody else.
        let epoll_fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { epoll_fd, slots: HashMap::new(), read_handles: HashMap::new(), stopped: false })
    }

    fn add(&self, fd: RawFd, events: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: fd as u64 };
        // SAFETY: epoll_fd is a valid epoll instance; ev is a valid,
        // fully-initialized epoll_event whose lifetime is this call.
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut ev)
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn remove(&self, fd: RawFd) {
        // SAFETY: a no-op-on-failure best-effort removal; epoll_ctl with
        // DEL and a null event pointer is valid on every kernel we target.
        unsafe {
            libc::epoll_ctl(self.epoll_fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    /// Read all data currently available on `fd`. Returns `true` once the
    /// stream has ended (clean EOF or a non-retryable read error), in
    /// which case the caller must deregister the fd.
    fn drain_read(&mut self, fd: RawFd) -> bool {
        let mut buffer = [0u8; 4096];
        loop {
            // SAFETY: buffer is a valid, writable region of the given length.
            let n = unsafe {
                libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len())
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                // Per spec, I/O errors are treated as premature EOF.
                if let Some(Slot::Read(callback)) = self.slots.get_mut(&fd) {
                    callback(&[]);
                }
                return true;
            }
            let n = n as usize;
            if n == 0 {
                if let Some(Slot::Read(callback)) = self.slots.get_mut(&fd) {
                    callback(&[]);
                }
                return true;
            }
            if let Some(Slot::Read(callback)) = self.slots.get_mut(&fd) {
                callback(&buffer[..n]);
            }
            if n < buffer.len() {
                // A short read means the pipe is drained for now; a future
                // wakeup will resume draining.
                return false;
            }
        }
    }
}

impl Reactor for EpollReactor {
    fn register_read(&mut self, handle: crate::RawReadHandle, callback: ReadCallback) -> io::Result<()> {
        let fd = handle.as_raw_fd();
        self.add(fd, libc::EPOLLIN as u32)?;
        self.slots.insert(fd, Slot::Read(callback));
        self.read_handles.insert(fd, handle);
        Ok(())
    }

    fn register_process(&mut self, process: ProcessHandle, callback: ProcessCallback) -> io::Result<()> {
        let pidfd = pidfd_open(process.pid)?;
        let fd = pidfd.as_raw_fd();
        self.add(fd, (libc::EPOLLIN | libc::EPOLLONESHOT) as u32)?;
        self.slots.insert(fd, Slot::Process { callback, _pidfd: pidfd });
        Ok(())
    }

    fn run(&mut self) {
        while !self.stopped && !self.slots.is_empty() {
            let mut ev = libc::epoll_event { events: 0, u64: 0 };
            // SAFETY: epoll_fd is valid; ev is a single writable event slot.
            let ret = unsafe { libc::epoll_wait(self.epoll_fd.as_raw_fd(), &mut ev, 1, -1) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(%err, "epoll_wait failed");
                break;
            }
            if ret == 0 {
                continue;
            }
            let fd = ev.u64 as RawFd;

            let is_process = matches!(self.slots.get(&fd), Some(Slot::Process { .. }));
            if is_process {
                if let Some(Slot::Process { callback, .. }) = self.slots.remove(&fd) {
                    self.remove(fd);
                    // The timed-out flag is not observable through pidfd
                    // readiness alone; callers that need it inspect the
                    // child's exit status themselves.
                    callback(false);
                }
                continue;
            }

            if self.drain_read(fd) {
                self.remove(fd);
                self.slots.remove(&fd);
                self.read_handles.remove(&fd);
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{io::Write, os::unix::net::UnixStream},
    };

    #[test]
    fn drains_a_pipe_and_reports_eof() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let reader_fd: crate::RawReadHandle = reader.into();

        let mut reactor = EpollReactor::new().unwrap();
        let chunks = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let chunks_clone = chunks.clone();
        reactor
            .register_read(reader_fd, Box::new(move |data| {
                chunks_clone.borrow_mut().push(data.to_vec());
            }))
            .unwrap();

        writer.write_all(b"hello").unwrap();
        drop(writer);

        reactor.run();

        let got: Vec<u8> = chunks.borrow().iter().flatten().copied().collect();
        assert_eq!(got, b"hello");
        // The final callback invocation is the empty, end-of-stream marker.
        assert_eq!(chunks.borrow().last().unwrap(), &Vec::<u8>::new());
    }
}
