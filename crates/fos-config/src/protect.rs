//! Page Protection
//!
//! Flips the pages backing the configuration record to read-only. The
//! record only ever goes read-write to read-only, once, so there is no
//! way back.

use crate::page::host_page_size;
use std::io;
use thiserror::Error;
use tracing::debug;

/// Errors raised while changing page protection.
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("Region at {start:#x} ({len} bytes) is not aligned to the {page} byte host page")]
    Misaligned { start: usize, len: usize, page: usize },

    #[error("Region is empty")]
    Empty,

    #[error("Host refused to protect {len} bytes at {start:#x}: {source}")]
    Host {
        start: usize,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("Page protection is not supported on this host")]
    Unsupported,
}

/// A page-aligned span of memory to protect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectedRegion {
    start: usize,
    len: usize,
}

impl ProtectedRegion {
    /// Describe `len` bytes at `start`. Both must be multiples of the host page size.
    pub fn new(start: usize, len: usize) -> Result<Self, ProtectionError> {
        if len == 0 {
            return Err(ProtectionError::Empty);
        }

        let page = host_page_size();
        if start % page != 0 || len % page != 0 {
            return Err(ProtectionError::Misaligned { start, len, page });
        }

        Ok(Self { start, len })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; `new` rejects empty regions.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last protected byte.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end()
    }
}

/// Changes the protection of memory regions on the host.
///
/// Implementations must not return until the new protection is in effect.
pub trait ProtectionGuard {
    /// Make `region` readable but neither writable nor executable.
    fn make_read_only(&self, region: ProtectedRegion) -> Result<(), ProtectionError>;
}

/// `mprotect(2)` based guard.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MprotectGuard;

#[cfg(unix)]
impl ProtectionGuard for MprotectGuard {
    fn make_read_only(&self, region: ProtectedRegion) -> Result<(), ProtectionError> {
        let ret = unsafe {
            libc::mprotect(
                region.start() as *mut libc::c_void,
                region.len(),
                libc::PROT_READ,
            )
        };
        if ret != 0 {
            return Err(ProtectionError::Host {
                start: region.start(),
                len: region.len(),
                source: io::Error::last_os_error(),
            });
        }

        debug!(
            start = format_args!("{:#x}", region.start()),
            len = region.len(),
            "Region is now read-only"
        );
        Ok(())
    }
}

/// Guard for hosts without a supported protection call. Always fails.
#[cfg(not(unix))]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedGuard;

#[cfg(not(unix))]
impl ProtectionGuard for UnsupportedGuard {
    fn make_read_only(&self, _region: ProtectedRegion) -> Result<(), ProtectionError> {
        Err(ProtectionError::Unsupported)
    }
}

/// Guard used for the process-wide record on this host.
#[cfg(unix)]
pub type HostGuard = MprotectGuard;

/// Guard used for the process-wide record on this host.
#[cfg(not(unix))]
pub type HostGuard = UnsupportedGuard;
