// Derived from fs2's allocate() (https://github.com/danburkert/fs2-rs), but
// only ever touches the allocated extent, never the file's reported length:
// safe to call before an append whose final size isn't known yet.

use std::fs::File;
use std::io::{Error, Result};
use std::os::unix::io::AsRawFd;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn allocate_soft(file: &File, len: u64) -> Result<()> {
    let ret = unsafe {
        libc::fallocate(file.as_raw_fd(), libc::FALLOC_FL_KEEP_SIZE, 0, len as libc::off_t)
    };

    if ret == 0 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn allocate_soft(file: &File, len: u64) -> Result<()> {
    let mut fstore = libc::fstore_t {
        fst_flags: libc::F_ALLOCATECONTIG,
        fst_posmode: libc::F_PEOFPOSMODE,
        fst_offset: 0,
        fst_length: len as libc::off_t,
        fst_bytesalloc: 0,
    };

    let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_PREALLOCATE, &fstore) };
    if ret == -1 {
        // Contiguous allocation failed; fall back to non-contiguous.
        fstore.fst_flags = libc::F_ALLOCATEALL;
        let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_PREALLOCATE, &fstore) };
        if ret == -1 {
            return Err(Error::last_os_error());
        }
    }

    Ok(())
}
