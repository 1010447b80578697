//! Growable memory-mapped files.

use std::{
    fs::File,
    io,
    os::windows::io::AsRawHandle,
    ptr::{self, NonNull},
    slice,
};

use winapi::{
    shared::minwindef::{DWORD, FALSE},
    um::{
        fileapi::SetFilePointerEx,
        handleapi::{CloseHandle, INVALID_HANDLE_VALUE},
        memoryapi::{CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_WRITE},
        winbase::FILE_BEGIN,
        winnt::{HANDLE, PAGE_READWRITE},
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
    mapping: HANDLE,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is exclusively owned by this MappedFile and accessed
// only through &/&mut self.
unsafe impl Send for MappedFile {}

impl MappedFile {
    /// Map the whole of `file`, whose current size must be `len` bytes and
    /// at least one byte.
    pub fn new(file: File, len: usize) -> io::Result<Self> {
        assert!(len > 0, "cannot map an empty file");
        let (mapping, ptr) = map(&file, len)?;
        Ok(Self { file, mapping, ptr, len })
    }

    /// Extend the backing file to `new_len` bytes and remap it.
    ///
    /// `new_len` must be greater than the current length.
    pub fn grow(&mut self, new_len: usize) -> io::Result<()> {
        assert!(new_len > self.len, "grow must increase the mapping size");

        // SAFETY: ptr describes the current, valid mapping being torn down.
        if unsafe { UnmapViewOfFile(self.ptr.as_ptr().cast()) } == FALSE {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: mapping is a valid handle being torn down.
        if unsafe { CloseHandle(self.mapping) } == FALSE {
            return Err(io::Error::last_os_error());
        }

        let mut offset = winapi::um::winnt::LARGE_INTEGER::default();
        *unsafe { offset.QuadPart_mut() } = new_len as i64;
        // SAFETY: file handle is valid, offset is a valid LARGE_INTEGER.
        if unsafe {
            SetFilePointerEx(
                self.file.as_raw_handle() as HANDLE,
                offset,
                ptr::null_mut(),
                FILE_BEGIN,
            )
        } == FALSE {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: file handle is valid and positioned at new_len.
        if unsafe { winapi::um::fileapi::SetEndOfFile(self.file.as_raw_handle() as HANDLE) } == FALSE {
            return Err(io::Error::last_os_error());
        }

        let (mapping, ptr) = map(&self.file, new_len)?;
        self.mapping = mapping;
        self.ptr = ptr;
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

fn map(file: &File, len: usize) -> io::Result<(HANDLE, NonNull<u8>)> {
    // SAFETY: file handle is valid; a null name creates an unnamed mapping.
    let mapping = unsafe {
        CreateFileMappingW(
            file.as_raw_handle() as HANDLE,
            ptr::null_mut(),
            PAGE_READWRITE,
            0,
            len as DWORD,
            ptr::null(),
        )
    };
    if mapping.is_null() || mapping == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: mapping was just created successfully above.
    let view = unsafe { MapViewOfFile(mapping, FILE_MAP_WRITE, 0, 0, len) };
    let Some(ptr) = NonNull::new(view.cast::<u8>()) else {
        let err = io::Error::last_os_error();
        // SAFETY: mapping is a valid handle no longer needed on this path.
        unsafe { CloseHandle(mapping); }
        return Err(err);
    };

    Ok((mapping, ptr))
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // SAFETY: ptr/mapping describe the current, valid mapping being
        // torn down for the last time.
        unsafe {
            UnmapViewOfFile(self.ptr.as_ptr().cast());
            CloseHandle(self.mapping);
        }
    }
}
