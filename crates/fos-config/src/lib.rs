//! fOS JIT Configuration - Freezable Process-Wide Record
//!
//! Holds every piece of process-wide state the JIT depends on for its
//! security properties in a single page-sized, page-aligned record.
//!
//! # Lifecycle
//!
//! 1. **Zeroed**: the record lives in `.bss`; every field reads as unset.
//! 2. **Startup**: bootstrap code fills in fields through [`config`] and
//!    may unlock restricted options.
//! 3. **Frozen**: [`permanently_freeze`] maps the page read-only. Reads
//!    stay lock-free; any write faults.
//!
//! | Target | Record size / alignment |
//! |--------|-------------------------|
//! | aarch64, watchOS | 16 KB |
//! | other | 4 KB |
//!
//! # Features
//!
//! - `testing`: exposes [`disable_freezing_for_testing`] and
//!   [`configure_for_testing`], which let test harnesses keep the record
//!   writable after startup code freezes it.
//! - `separated-wx-heap`: adds the hook used to write executable memory
//!   through a separate, non-executable mapping.

mod freeze;
mod options;
mod page;
mod protect;
mod ptr_tag;
mod record;
mod snapshot;

#[cfg(test)]
mod test_support;

pub use freeze::{enable_restricted_options, permanently_freeze, FreezeState};
#[cfg(any(test, feature = "testing"))]
pub use freeze::{configure_for_testing, disable_freezing_for_testing};
pub use options::{
    split_option_arg, OptionError, OptionId, OptionKind, OptionSpec, OptionValue, OptionsStorage,
    OPTIONS, OPTION_COUNT,
};
pub use page::{
    checked_round_up_to_multiple_of, config_protected_size, host_page_size, is_page_aligned, page_size, round_up_to_multiple_of,
    CONFIG_SIZE_TO_PROTECT, PAGE_SIZE,
};
pub use protect::{HostGuard, ProtectedRegion, ProtectionError, ProtectionGuard};
#[cfg(unix)]
pub use protect::MprotectGuard;
#[cfg(not(unix))]
pub use protect::UnsupportedGuard;
pub use ptr_tag::{
    ptr_tag_name, register_ptr_tag_lookup, tag_for_ptr, PtrTagLookup, PtrTagNameFn, TagForPtrFn,
};
pub use record::{
    config, Config, ExecutableAllocator, FixedVmPoolExecutableAllocator, ShellTimeoutCheckCallback,
    Vm,
};
#[cfg(feature = "separated-wx-heap")]
pub use record::JitWriteSeparateHeapsFunction;
pub use snapshot::ConfigSnapshot;
