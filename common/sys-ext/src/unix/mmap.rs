//! Growable memory-mapped files.

use {
    crate::retry_on_eintr,
    std::{
        fs::File,
        io,
        os::unix::io::AsRawFd,
        ptr::{self, NonNull},
        slice,
    },
};

/// A file mapped read-write into this process's address space.
///
/// Growing the mapping (see [`grow`][`Self::grow`]) unmaps and remaps the
/// file, which invalidates any slice previously obtained from
/// [`as_slice`][`Self::as_slice`]/[`as_mut_slice`][`Self::as_mut_slice`] —
/// callers must re-fetch the slice after every `grow`.
pub struct MappedFile {
    file: File,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is exclusively owned by this MappedFile and accessed
// only through &/&mut self, same as a Vec<u8> backed by anonymous memory.
unsafe impl Send for MappedFile {}

impl MappedFile {
    /// Map the whole of `file`, whose current size must be `len` bytes and
    /// at least one byte.
    pub fn new(file: File, len: usize) -> io::Result<Self> {
        assert!(len > 0, "cannot map an empty file");
        // SAFETY: fd is valid and open for read+write, len matches the
        // file's actual size as required by the caller.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: mmap succeeded, so ptr is non-null.
        let ptr = unsafe { NonNull::new_unchecked(ptr.cast()) };
        Ok(Self { file, ptr, len })
    }

    /// Extend the backing file to `new_len` bytes and remap it.
    ///
    /// `new_len` must be greater than the current length.
    pub fn grow(&mut self, new_len: usize) -> io::Result<()> {
        assert!(new_len > self.len, "grow must increase the mapping size");

        retry_on_eintr(|| {
            // SAFETY: file descriptor is valid.
            if unsafe { libc::ftruncate(self.file.as_raw_fd(), new_len as libc::off_t) } == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        })?;

        // SAFETY: ptr/len describe the current, valid mapping being torn down.
        let result = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd is valid and the file was just grown to new_len.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                new_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: mmap succeeded, so ptr is non-null.
        self.ptr = unsafe { NonNull::new_unchecked(ptr.cast()) };
        self.len = new_len;
        Ok(())
    }

    /// Current mapping length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Borrow the mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe the current, valid mapping.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mutably borrow the mapped bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len describe the current, valid mapping, and &mut
        // self proves exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the current, valid mapping being torn
        // down for the last time.
        unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len); }
    }
}
