use std::{fs::File, io, os::fd::AsRawFd as _, path::Path, ptr};

/// A read-only, private mapping of a whole file.
///
/// The file handle is kept open for as long as the mapping lives.
pub struct Mapping {
    _file: File,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapping is read-only and never remapped, so sharing the pointer is fine.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file too large to map"))?;

        if len == 0 {
            // mmap rejects zero-length mappings.
            return Ok(Self {
                _file: file,
                ptr: ptr::null_mut(),
                len: 0,
            });
        }

        let ptr = unsafe {
            // MAP_PRIVATE: the file is only read, a private mapping keeps us undisturbed by
            // writers that truncate or rewrite the file through `write(2)`.
            let addr = libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            );
            if addr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            addr as *mut u8
        };

        Ok(Self {
            _file: file,
            ptr,
            len,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `ptr` is a live mapping of `len` readable bytes until `drop`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if self.len != 0 {
            unsafe {
                let _ = libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }
}
