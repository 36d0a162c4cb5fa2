//! Page Geometry
//!
//! The configuration record is protected as a whole number of pages, so
//! its size and alignment are derived from the page size of the target.
//!
//! | Target | Page size |
//! |--------|-----------|
//! | aarch64, watchOS | 16 KB |
//! | everything else | 4 KB |

/// Page size the configuration record is laid out for.
#[cfg(any(target_arch = "aarch64", target_os = "watchos"))]
pub const PAGE_SIZE: usize = 16 * 1024;

/// Page size the configuration record is laid out for.
#[cfg(not(any(target_arch = "aarch64", target_os = "watchos")))]
pub const PAGE_SIZE: usize = 4 * 1024;

/// Exact number of bytes made read-only when the record is frozen.
pub const CONFIG_SIZE_TO_PROTECT: usize = PAGE_SIZE;

const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(round_up_to_multiple_of(CONFIG_SIZE_TO_PROTECT, PAGE_SIZE) == CONFIG_SIZE_TO_PROTECT);

/// Page size of the target, in bytes.
pub const fn page_size() -> usize {
    PAGE_SIZE
}

/// Size of the protected configuration region, in bytes.
pub const fn config_protected_size() -> usize {
    CONFIG_SIZE_TO_PROTECT
}

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// Overflows for values within `align` of `usize::MAX`; use
/// [`checked_round_up_to_multiple_of`] for untrusted sizes.
pub const fn round_up_to_multiple_of(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// `round_up_to_multiple_of`, or `None` if the result does not fit in a `usize`.
pub const fn checked_round_up_to_multiple_of(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(sum) => Some(sum & !(align - 1)),
        None => None,
    }
}

/// Check whether `addr` sits on a `PAGE_SIZE` boundary.
pub const fn is_page_aligned(addr: usize) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}

/// Page size reported by the host OS.
///
/// Can be smaller than `PAGE_SIZE` (4 KB pages on an aarch64 Linux box)
/// but must divide it for page protection to cover the record exactly.
#[cfg(unix)]
pub fn host_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { PAGE_SIZE }
}

/// Page size reported by the host OS.
#[cfg(not(unix))]
pub fn host_page_size() -> usize {
    PAGE_SIZE
}
