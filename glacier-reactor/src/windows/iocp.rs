//! Windows backend: one I/O completion port shared between overlapped pipe
//! reads and a job object's process-exit notifications.
//!
//! The job object's completion messages arrive on the same port as pipe
//! completions, distinguished by completion key: the job is registered
//! with a reserved key, and a completion with that key carries the job
//! message type in the "bytes transferred" field and the process id packed
//! into the `OVERLAPPED` pointer field, exactly as Win32 documents it.

use {
    crate::{ProcessCallback, ProcessHandle, ReadCallback, Reactor},
    std::{
        collections::HashMap,
        io, mem, ptr,
        os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle},
    },
    winapi::{
        shared::{basetsd::ULONG_PTR, minwindef::{DWORD, FALSE, TRUE}},
        um::{
            fileapi::ReadFile,
            handleapi::INVALID_HANDLE_VALUE,
            ioapiset::{CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus},
            jobapi2::SetInformationJobObject,
            minwinbase::OVERLAPPED,
            winbase::JobObjectAssociateCompletionPortInformation,
            winnt::{
                HANDLE, JOBOBJECT_ASSOCIATE_COMPLETION_PORT, JOB_OBJECT_MSG_ABNORMAL_EXIT_PROCESS,
                JOB_OBJECT_MSG_END_OF_PROCESS_TIME, JOB_OBJECT_MSG_EXIT_PROCESS,
            },
        },
    },
};

const JOB_KEY: usize = 1;

#[repr(C)]
struct ReadOp {
    overlapped: OVERLAPPED,
    buffer: [u8; 4096],
    key: usize,
}

/// A [`Reactor`] built on a single I/O completion port plus a job object.
pub struct IocpReactor {
    port: OwnedHandle,
    job: sys_ext::windows::JobObject,
    next_key: usize,
    read_handles: HashMap<usize, crate::RawReadHandle>,
    read_callbacks: HashMap<usize, ReadCallback>,
    process_callbacks: HashMap<u32, ProcessCallback>,
    stopped: bool,
}

impl IocpReactor {
    /// Create a fresh reactor with its own job object. Every process handed
    /// to [`register_process`][Reactor::register_process] is assigned into
    /// this job, so the whole tree is killed if the build is aborted.
    pub fn new() -> io::Result<Self> {
        // SAFETY: INVALID_HANDLE_VALUE with a null existing port creates a
        // brand-new completion port; this is the documented idiom.
        let port = unsafe {
            CreateIoCompletionPort(INVALID_HANDLE_VALUE, ptr::null_mut(), 0, 0)
        };
        if port.is_null() {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: port was just created and is owned by nobody else.
        let port = unsafe { OwnedHandle::from_raw_handle(port as _) };

        let job = sys_ext::windows::JobObject::create()?;
        let mut assoc = JOBOBJECT_ASSOCIATE_COMPLETION_PORT {
            CompletionKey: JOB_KEY as *mut _,
            CompletionPort: port.as_raw_handle() as HANDLE,
        };
        let ok = unsafe {
            SetInformationJobObject(
                job.as_raw(),
                JobObjectAssociateCompletionPortInformation,
                &mut assoc as *mut _ as *mut _,
                mem::size_of_val(&assoc) as DWORD,
            )
        };
        if ok == FALSE {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            port,
            job,
            next_key: JOB_KEY + 1,
            read_handles: HashMap::new(),
            read_callbacks: HashMap::new(),
            process_callbacks: HashMap::new(),
            stopped: false,
        })
    }

    fn issue_read(&mut self, key: usize) -> io::Result<()> {
        let handle = self.read_handles[&key].as_raw_handle();
        let op = Box::new(ReadOp { overlapped: unsafe { mem::zeroed() }, buffer: [0; 4096], key });
        let op = Box::into_raw(op);
        let mut bytes_read: DWORD = 0;
        // SAFETY: op is a heap allocation kept alive until its completion
        // is dequeued below, at which point it is reclaimed exactly once.
        let ok = unsafe {
            ReadFile(
                handle as HANDLE,
                (*op).buffer.as_mut_ptr() as *mut _,
                (*op).buffer.len() as DWORD,
                &mut bytes_read,
                op as *mut OVERLAPPED,
            )
        };
        if ok == FALSE {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(winapi::shared::winerror::ERROR_IO_PENDING as i32) {
                // SAFETY: op was allocated above and not yet queued anywhere else.
                drop(unsafe { Box::from_raw(op) });
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Reactor for IocpReactor {
    fn register_read(&mut self, handle: crate::RawReadHandle, callback: ReadCallback) -> io::Result<()> {
        let key = self.next_key;
        self.next_key += 1;

        // SAFETY: handle is a valid, open handle not yet associated with
        // any completion port.
        let ret = unsafe {
            CreateIoCompletionPort(handle.as_raw_handle() as HANDLE, self.port.as_raw_handle() as HANDLE, key, 0)
        };
        if ret.is_null() {
            return Err(io::Error::last_os_error());
        }

        self.read_handles.insert(key, handle);
        self.read_callbacks.insert(key, callback);
        self.issue_read(key)
    }

    fn register_process(&mut self, process: ProcessHandle, callback: ProcessCallback) -> io::Result<()> {
        self.job.assign(&process.handle)?;
        self.process_callbacks.insert(process.pid, callback);
        Ok(())
    }

    fn run(&mut self) {
        while !self.stopped && !(self.read_callbacks.is_empty() && self.process_callbacks.is_empty()) {
            let mut bytes: DWORD = 0;
            let mut key: ULONG_PTR = 0;
            let mut overlapped: *mut OVERLAPPED = ptr::null_mut();
            // SAFETY: port is valid; the three out-params are valid
            // writable locations; INFINITE-ish wait via a generous timeout
            // so a posted stop is observed promptly.
            let ok = unsafe {
                GetQueuedCompletionStatus(self.port.as_raw_handle() as HANDLE, &mut bytes, &mut key, &mut overlapped, 1000)
            };

            if key == JOB_KEY {
                let pid = overlapped as usize as u32;
                match bytes as i32 {
                    JOB_OBJECT_MSG_EXIT_PROCESS | JOB_OBJECT_MSG_ABNORMAL_EXIT_PROCESS => {
                        if let Some(callback) = self.process_callbacks.remove(&pid) {
                            callback(false);
                        }
                    }
                    JOB_OBJECT_MSG_END_OF_PROCESS_TIME => {
                        if let Some(callback) = self.process_callbacks.remove(&pid) {
                            callback(true);
                        }
                    }
                    _ => {}
                }
                continue;
            }

            if overlapped.is_null() {
                if ok == FALSE {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(winapi::shared::winerror::WAIT_TIMEOUT as i32) {
                        continue;
                    }
                }
                // A stop notification posted with a null overlapped.
                continue;
            }

            // SAFETY: overlapped was produced by issue_read's Box::into_raw
            // and is reclaimed exactly once, here.
            let op = unsafe { Box::from_raw(overlapped as *mut ReadOp) };
            let op_key = op.key;

            if ok == FALSE || bytes == 0 {
                if let Some(mut callback) = self.read_callbacks.remove(&op_key) {
                    callback(&[]);
                }
                self.read_handles.remove(&op_key);
                continue;
            }

            if let Some(callback) = self.read_callbacks.get_mut(&op_key) {
                callback(&op.buffer[..bytes as usize]);
            }
            let _ = self.issue_read(op_key);
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        // SAFETY: posting with a null overlapped just wakes the wait loop.
        unsafe {
            PostQueuedCompletionStatus(self.port.as_raw_handle() as HANDLE, 0, 0, ptr::null_mut());
        }
    }
}
