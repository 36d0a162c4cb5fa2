//! The Configuration Record
//!
//! One page-sized, page-aligned record holding every piece of process-wide
//! state the JIT relies on for its security properties: executable memory
//! bounds, the W^X write hook, runtime options and the pointer-tag lookup.
//!
//! Every field is an atomic (or a record of atomics), which gives three
//! things at once:
//! - the all-zero bit pattern is valid, so the record lives in `.bss`
//!   and reads as "unset" before startup touches it;
//! - startup code can write fields through a shared `&'static Config`;
//! - after the freeze, loads keep working while any store faults.

use crate::options::OptionsStorage;
use crate::page::{CONFIG_SIZE_TO_PROTECT, PAGE_SIZE};
use crate::protect::{ProtectedRegion, ProtectionError};
use crate::ptr_tag::PtrTagLookup;
use std::marker::{PhantomData, PhantomPinned};
use std::mem::{self, MaybeUninit};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

/// Opaque handle to the executable memory allocator.
#[repr(C)]
pub struct ExecutableAllocator {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Opaque handle to the fixed virtual memory pool allocator.
#[repr(C)]
pub struct FixedVmPoolExecutableAllocator {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Opaque handle to a virtual machine.
#[repr(C)]
pub struct Vm {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Called when a shell script may have run past its time limit.
///
/// Runs synchronously on whichever thread noticed the condition.
pub type ShellTimeoutCheckCallback = fn(&Vm);

/// Writes `len` bytes from `src` into executable memory at `offset`,
/// through a mapping that is never executable.
#[cfg(feature = "separated-wx-heap")]
pub type JitWriteSeparateHeapsFunction = unsafe extern "C" fn(offset: i64, src: *const u8, len: usize);

/// Process-wide JIT configuration.
///
/// Exactly one instance exists, reachable through [`config`]. Fields are
/// written directly during startup; lifecycle flags only change through
/// the freeze operations.
#[cfg_attr(any(target_arch = "aarch64", target_os = "watchos"), repr(C, align(16384)))]
#[cfg_attr(not(any(target_arch = "aarch64", target_os = "watchos")), repr(C, align(4096)))]
pub struct Config {
    pub(crate) is_permanently_frozen: AtomicBool,
    pub(crate) disabled_freezing_for_testing: AtomicBool,
    pub(crate) restricted_options_enabled: AtomicBool,
    pub jit_disabled: AtomicBool,

    // Audits the call-once threading setup.
    pub(crate) initialize_threading_has_been_called: AtomicBool,

    pub executable_allocator: AtomicPtr<ExecutableAllocator>,
    pub fixed_vm_pool_executable_allocator: AtomicPtr<FixedVmPoolExecutableAllocator>,
    pub start_executable_memory: AtomicUsize,
    pub end_executable_memory: AtomicUsize,
    pub start_of_fixed_writable_memory_pool: AtomicUsize,

    #[cfg(feature = "separated-wx-heap")]
    pub(crate) jit_write_separate_heaps: AtomicPtr<()>,
    #[cfg(feature = "separated-wx-heap")]
    pub use_fast_permissions_jit_copy: AtomicBool,

    pub options: OptionsStorage,

    pub(crate) shell_timeout_check_callback: AtomicPtr<()>,

    pub ptr_tag_lookup_record: PtrTagLookup,
    // Head of the lookup chain, frozen along with the lookups it reaches.
    pub(crate) ptr_tag_lookup_head: AtomicPtr<PtrTagLookup>,
}

const _: () = assert!(mem::size_of::<Config>() == CONFIG_SIZE_TO_PROTECT);
const _: () = assert!(mem::align_of::<Config>() == PAGE_SIZE);

#[unsafe(export_name = "g_fosConfig")]
static G_CONFIG: Config = Config::zeroed();

/// The process-wide configuration record.
pub fn config() -> &'static Config {
    &G_CONFIG
}

impl Config {
    /// All-zero record, the state the loader hands us.
    pub(crate) const fn zeroed() -> Self {
        // SAFETY: every field is an atomic integer, bool or pointer (directly
        // or inside a `#[repr(C)]` record of them), all valid when zero.
        unsafe { MaybeUninit::<Self>::zeroed().assume_init() }
    }

    /// Address of the first byte of the record.
    pub fn address(&self) -> usize {
        self as *const Config as usize
    }

    /// The pages backing this record.
    pub fn protected_region(&self) -> Result<ProtectedRegion, ProtectionError> {
        ProtectedRegion::new(self.address(), CONFIG_SIZE_TO_PROTECT)
    }

    pub fn is_permanently_frozen(&self) -> bool {
        self.is_permanently_frozen.load(Ordering::Acquire)
    }

    pub fn disabled_freezing_for_testing(&self) -> bool {
        self.disabled_freezing_for_testing.load(Ordering::Acquire)
    }

    pub fn restricted_options_enabled(&self) -> bool {
        self.restricted_options_enabled.load(Ordering::Acquire)
    }

    pub fn initialize_threading_has_been_called(&self) -> bool {
        self.initialize_threading_has_been_called.load(Ordering::Relaxed)
    }

    pub fn jit_enabled(&self) -> bool {
        !self.jit_disabled.load(Ordering::Relaxed)
    }

    /// `[start, end)` of executable memory, once both bounds are set.
    pub fn executable_region(&self) -> Option<(usize, usize)> {
        let start = self.start_executable_memory.load(Ordering::Relaxed);
        let end = self.end_executable_memory.load(Ordering::Relaxed);
        (start != 0 && end > start).then_some((start, end))
    }

    /// Check whether `pc` points into executable memory.
    pub fn is_jit_pc(&self, pc: usize) -> bool {
        self.executable_region()
            .is_some_and(|(start, end)| pc >= start && pc < end)
    }

    pub fn set_shell_timeout_check_callback(&self, callback: ShellTimeoutCheckCallback) {
        self.shell_timeout_check_callback
            .store(callback as *mut (), Ordering::Relaxed);
    }

    pub fn shell_timeout_check_callback(&self) -> Option<ShellTimeoutCheckCallback> {
        let raw = self.shell_timeout_check_callback.load(Ordering::Relaxed);
        // SAFETY: only `set_shell_timeout_check_callback` writes this slot.
        (!raw.is_null()).then(|| unsafe { mem::transmute::<*mut (), ShellTimeoutCheckCallback>(raw) })
    }

    /// Run the timeout callback on the current thread. Returns false if none is set.
    pub fn run_shell_timeout_check(&self, vm: &Vm) -> bool {
        match self.shell_timeout_check_callback() {
            Some(callback) => {
                callback(vm);
                true
            }
            None => false,
        }
    }

    #[cfg(feature = "separated-wx-heap")]
    pub fn set_jit_write_separate_heaps(&self, write: JitWriteSeparateHeapsFunction) {
        self.jit_write_separate_heaps
            .store(write as *mut (), Ordering::Relaxed);
    }

    #[cfg(feature = "separated-wx-heap")]
    pub fn jit_write_separate_heaps(&self) -> Option<JitWriteSeparateHeapsFunction> {
        let raw = self.jit_write_separate_heaps.load(Ordering::Relaxed);
        // SAFETY: only `set_jit_write_separate_heaps` writes this slot.
        (!raw.is_null()).then(|| unsafe { mem::transmute::<*mut (), JitWriteSeparateHeapsFunction>(raw) })
    }

    pub fn has_executable_allocator(&self) -> bool {
        !self.executable_allocator.load(Ordering::Relaxed).is_null()
    }

    pub fn has_fixed_vm_pool_executable_allocator(&self) -> bool {
        !self.fixed_vm_pool_executable_allocator.load(Ordering::Relaxed).is_null()
    }
}
