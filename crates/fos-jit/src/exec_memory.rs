//! Executable Memory Reservation
//!
//! Reserves the virtual range the JIT will later carve code from. The
//! range starts as `PROT_NONE` (no physical pages); the allocator commits
//! pieces of it on demand. Only its bounds matter to the configuration.

use fos_config::{checked_round_up_to_multiple_of, host_page_size};
use std::ptr;
use thiserror::Error;
use tracing::debug;

/// Errors raised while reserving executable memory.
#[derive(Debug, Error)]
pub enum ReserveError {
    #[error("Executable memory reservation size is zero")]
    Empty,

    #[error("Executable memory reservation of {size} bytes does not fit in the address space")]
    TooLarge { size: usize },

    #[error("Failed to reserve {size} bytes of executable memory: {source}")]
    Map {
        size: usize,
        #[source]
        source: std::io::Error,
    },
}

/// A reserved, inaccessible virtual range. Unmapped on drop.
pub struct ExecutableReservation {
    base: *mut u8,
    len: usize,
}

impl ExecutableReservation {
    /// Reserve at least `size` bytes, rounded up to whole host pages.
    pub fn reserve(size: usize) -> Result<Self, ReserveError> {
        if size == 0 {
            return Err(ReserveError::Empty);
        }

        let len = checked_round_up_to_multiple_of(size, host_page_size())
            .ok_or(ReserveError::TooLarge { size })?;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ReserveError::Map {
                size: len,
                source: std::io::Error::last_os_error(),
            });
        }

        debug!(
            start = format_args!("{:#x}", base as usize),
            len,
            "Reserved executable memory"
        );
        Ok(Self { base: base as *mut u8, len })
    }

    pub fn start(&self) -> usize {
        self.base as usize
    }

    /// One past the last reserved byte.
    pub fn end(&self) -> usize {
        self.start() + self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; `reserve` rejects empty ranges.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ExecutableReservation {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}
