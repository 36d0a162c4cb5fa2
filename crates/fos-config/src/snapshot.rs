//! Serializable view of the record, for diagnostics.

use crate::freeze::FreezeState;
use crate::options::OptionValue;
use crate::record::Config;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

/// Point-in-time copy of every scalar in the record.
///
/// Callbacks and allocator handles are reported as set or unset only.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub state: FreezeState,
    pub is_permanently_frozen: bool,
    pub disabled_freezing_for_testing: bool,
    pub restricted_options_enabled: bool,
    pub jit_disabled: bool,
    pub initialize_threading_has_been_called: bool,
    pub executable_allocator_set: bool,
    pub fixed_vm_pool_executable_allocator_set: bool,
    pub start_executable_memory: usize,
    pub end_executable_memory: usize,
    pub start_of_fixed_writable_memory_pool: usize,
    #[cfg(feature = "separated-wx-heap")]
    pub jit_write_separate_heaps_set: bool,
    #[cfg(feature = "separated-wx-heap")]
    pub use_fast_permissions_jit_copy: bool,
    pub shell_timeout_check_callback_set: bool,
    pub ptr_tag_lookup_installed: bool,
    pub ptr_tag_lookups_registered: usize,
    pub options: BTreeMap<&'static str, OptionValue>,
}

impl Config {
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            state: self.state(),
            is_permanently_frozen: self.is_permanently_frozen(),
            disabled_freezing_for_testing: self.disabled_freezing_for_testing(),
            restricted_options_enabled: self.restricted_options_enabled(),
            jit_disabled: !self.jit_enabled(),
            initialize_threading_has_been_called: self.initialize_threading_has_been_called(),
            executable_allocator_set: self.has_executable_allocator(),
            fixed_vm_pool_executable_allocator_set: self.has_fixed_vm_pool_executable_allocator(),
            start_executable_memory: self.start_executable_memory.load(Ordering::Relaxed),
            end_executable_memory: self.end_executable_memory.load(Ordering::Relaxed),
            start_of_fixed_writable_memory_pool: self
                .start_of_fixed_writable_memory_pool
                .load(Ordering::Relaxed),
            #[cfg(feature = "separated-wx-heap")]
            jit_write_separate_heaps_set: self.jit_write_separate_heaps().is_some(),
            #[cfg(feature = "separated-wx-heap")]
            use_fast_permissions_jit_copy: self.use_fast_permissions_jit_copy.load(Ordering::Relaxed),
            shell_timeout_check_callback_set: self.shell_timeout_check_callback().is_some(),
            ptr_tag_lookup_installed: self.ptr_tag_lookup_record.is_installed(),
            ptr_tag_lookups_registered: self.ptr_tag_lookup_count(),
            options: self
                .options
                .iter()
                .map(|(spec, value)| (spec.name, value))
                .collect(),
        }
    }
}
