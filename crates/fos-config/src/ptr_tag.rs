//! Pointer Tag Lookup
//!
//! Control-flow integrity checks ask "which tag signs this pointer?" and
//! "what is tag N called?". Each subsystem that owns tags contributes a
//! `PtrTagLookup`; lookups form a singly linked chain that is walked until
//! one of them answers.
//!
//! The head of the chain and the runtime's own lookup are both embedded in
//! the configuration record, so once the record is frozen nothing can be
//! pushed in front of the lookups registered during startup.

use crate::record::{config, Config};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use tracing::debug;

/// Returns the tag name for a signed pointer, if this lookup knows it.
pub type TagForPtrFn = fn(usize) -> Option<&'static str>;

/// Returns the name of a numeric tag, if this lookup knows it.
pub type PtrTagNameFn = fn(u64) -> Option<&'static str>;

/// One link of the lookup chain. Zeroed means "no callbacks installed".
#[repr(C)]
pub struct PtrTagLookup {
    tag_for_ptr: AtomicPtr<()>,
    ptr_tag_name: AtomicPtr<()>,
    next: AtomicPtr<PtrTagLookup>,
}

impl PtrTagLookup {
    pub const fn new() -> Self {
        Self {
            tag_for_ptr: AtomicPtr::new(ptr::null_mut()),
            ptr_tag_name: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Install both callbacks.
    pub fn install(&self, tag_for_ptr: TagForPtrFn, ptr_tag_name: PtrTagNameFn) {
        self.tag_for_ptr.store(tag_for_ptr as *mut (), Ordering::Relaxed);
        self.ptr_tag_name.store(ptr_tag_name as *mut (), Ordering::Relaxed);
    }

    pub fn is_installed(&self) -> bool {
        !self.tag_for_ptr.load(Ordering::Relaxed).is_null()
    }

    pub fn tag_for_ptr_fn(&self) -> Option<TagForPtrFn> {
        let raw = self.tag_for_ptr.load(Ordering::Relaxed);
        // SAFETY: only `install` writes this slot, and it stores a `TagForPtrFn`.
        (!raw.is_null()).then(|| unsafe { mem::transmute::<*mut (), TagForPtrFn>(raw) })
    }

    pub fn ptr_tag_name_fn(&self) -> Option<PtrTagNameFn> {
        let raw = self.ptr_tag_name.load(Ordering::Relaxed);
        // SAFETY: only `install` writes this slot, and it stores a `PtrTagNameFn`.
        (!raw.is_null()).then(|| unsafe { mem::transmute::<*mut (), PtrTagNameFn>(raw) })
    }

    fn next(&self) -> Option<&'static PtrTagLookup> {
        // SAFETY: links only ever point at `&'static` lookups pushed by `register_ptr_tag_lookup`.
        unsafe { self.next.load(Ordering::Acquire).as_ref() }
    }
}

impl Default for PtrTagLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    fn ptr_tag_lookups(&self) -> impl Iterator<Item = &'static PtrTagLookup> {
        // SAFETY: the head only ever points at a `&'static` lookup.
        let head = unsafe { self.ptr_tag_lookup_head.load(Ordering::Acquire).as_ref() };
        std::iter::successors(head, |lookup| lookup.next())
    }

    /// Push `lookup` onto the front of this record's chain.
    ///
    /// Aborts once the record is protected. Writes the `next` link of
    /// `lookup`, so a lookup embedded in a frozen record cannot be pushed
    /// either. Registering the same lookup twice is a no-op.
    pub fn register_ptr_tag_lookup(&self, lookup: &'static PtrTagLookup) {
        self.ensure_writable("register_ptr_tag_lookup");

        if self.ptr_tag_lookups().any(|existing| ptr::eq(existing, lookup)) {
            debug!("Pointer tag lookup already registered");
            return;
        }

        let new = lookup as *const PtrTagLookup as *mut PtrTagLookup;
        let mut head = self.ptr_tag_lookup_head.load(Ordering::Acquire);
        loop {
            lookup.next.store(head, Ordering::Relaxed);
            match self.ptr_tag_lookup_head.compare_exchange_weak(
                head,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        debug!("Registered pointer tag lookup");
    }

    /// Ask each registered lookup for the tag of `ptr`.
    pub fn tag_for_ptr(&self, ptr: usize) -> Option<&'static str> {
        self.ptr_tag_lookups()
            .filter_map(PtrTagLookup::tag_for_ptr_fn)
            .find_map(|lookup| lookup(ptr))
    }

    /// Ask each registered lookup for the name of `tag`.
    pub fn ptr_tag_name(&self, tag: u64) -> Option<&'static str> {
        self.ptr_tag_lookups()
            .filter_map(PtrTagLookup::ptr_tag_name_fn)
            .find_map(|lookup| lookup(tag))
    }

    pub fn ptr_tag_lookup_count(&self) -> usize {
        self.ptr_tag_lookups().count()
    }
}

/// Register `lookup` on the process-wide record.
pub fn register_ptr_tag_lookup(lookup: &'static PtrTagLookup) {
    config().register_ptr_tag_lookup(lookup);
}

/// Tag of `ptr` according to the process-wide chain.
pub fn tag_for_ptr(ptr: usize) -> Option<&'static str> {
    config().tag_for_ptr(ptr)
}

/// Name of `tag` according to the process-wide chain.
pub fn ptr_tag_name(tag: u64) -> Option<&'static str> {
    config().ptr_tag_name(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{is_child, leaked_config, run_child, RecordingGuard};

    fn leaked_lookup(tag_for_ptr: TagForPtrFn, ptr_tag_name: PtrTagNameFn) -> &'static PtrTagLookup {
        let lookup: &'static PtrTagLookup = Box::leak(Box::new(PtrTagLookup::new()));
        lookup.install(tag_for_ptr, ptr_tag_name);
        lookup
    }

    fn first_tags(ptr: usize) -> Option<&'static str> {
        (0xA000..0xB000).contains(&ptr).then_some("FirstPtrTag")
    }

    fn first_names(tag: u64) -> Option<&'static str> {
        (tag == 0xA1).then_some("FirstPtrTag")
    }

    fn second_tags(ptr: usize) -> Option<&'static str> {
        (0xC000..0xD000).contains(&ptr).then_some("SecondPtrTag")
    }

    fn second_names(tag: u64) -> Option<&'static str> {
        (tag == 0xC1).then_some("SecondPtrTag")
    }

    fn catch_all_tags(_ptr: usize) -> Option<&'static str> {
        Some("CatchAllPtrTag")
    }

    fn catch_all_names(_tag: u64) -> Option<&'static str> {
        Some("CatchAllPtrTag")
    }

    #[test]
    fn test_empty_lookup() {
        let lookup = PtrTagLookup::new();
        assert!(!lookup.is_installed());
        assert!(lookup.tag_for_ptr_fn().is_none());
        assert!(lookup.ptr_tag_name_fn().is_none());
    }

    #[test]
    fn test_empty_chain_answers_nothing() {
        let config = leaked_config();
        assert_eq!(config.ptr_tag_lookup_count(), 0);
        assert_eq!(config.tag_for_ptr(0xA010), None);
        assert_eq!(config.ptr_tag_name(0xA1), None);
    }

    #[test]
    fn test_chain_walks_every_lookup() {
        let config = leaked_config();
        config.register_ptr_tag_lookup(leaked_lookup(first_tags, first_names));
        config.register_ptr_tag_lookup(leaked_lookup(second_tags, second_names));

        assert_eq!(config.tag_for_ptr(0xA010), Some("FirstPtrTag"));
        assert_eq!(config.tag_for_ptr(0xC010), Some("SecondPtrTag"));
        assert_eq!(config.ptr_tag_name(0xA1), Some("FirstPtrTag"));
        assert_eq!(config.ptr_tag_name(0xC1), Some("SecondPtrTag"));
        assert_eq!(config.tag_for_ptr(0xE010), None);
    }

    #[test]
    fn test_latest_registration_answers_first() {
        let config = leaked_config();
        config.register_ptr_tag_lookup(leaked_lookup(first_tags, first_names));
        config.register_ptr_tag_lookup(leaked_lookup(catch_all_tags, catch_all_names));

        assert_eq!(config.tag_for_ptr(0xA010), Some("CatchAllPtrTag"));
        assert_eq!(config.ptr_tag_name(0xA1), Some("CatchAllPtrTag"));
    }

    #[test]
    fn test_chains_are_per_record() {
        let first = leaked_config();
        let second = leaked_config();
        first.register_ptr_tag_lookup(leaked_lookup(catch_all_tags, catch_all_names));

        assert_eq!(first.tag_for_ptr(0x7777), Some("CatchAllPtrTag"));
        assert_eq!(second.tag_for_ptr(0x7777), None);
    }

    #[test]
    fn test_double_registration_keeps_chain_acyclic() {
        let config = leaked_config();
        let lookup = leaked_lookup(first_tags, first_names);
        config.register_ptr_tag_lookup(lookup);
        config.register_ptr_tag_lookup(lookup);

        assert_eq!(config.ptr_tag_lookup_count(), 1);
    }

    #[test]
    fn test_embedded_lookup_answers_after_freeze() {
        let config = leaked_config();
        config.ptr_tag_lookup_record.install(first_tags, first_names);
        config.register_ptr_tag_lookup(&config.ptr_tag_lookup_record);
        config.permanently_freeze_with(&RecordingGuard::default());

        assert_eq!(config.tag_for_ptr(0xA010), Some("FirstPtrTag"));
        assert_eq!(config.ptr_tag_name(0xA1), Some("FirstPtrTag"));
    }

    #[test]
    fn test_bypassed_freeze_still_accepts_lookups() {
        let config = leaked_config();
        config.disable_freezing_for_testing();
        config.permanently_freeze_with(&RecordingGuard::default());

        config.register_ptr_tag_lookup(leaked_lookup(second_tags, second_names));
        assert_eq!(config.tag_for_ptr(0xC010), Some("SecondPtrTag"));
    }

    #[cfg(unix)]
    #[test]
    fn test_registration_after_freeze_aborts() {
        use crate::test_support::assert_aborted;

        const NAME: &str = "ptr_tag::tests::test_registration_after_freeze_aborts";
        if is_child(NAME) {
            let config = leaked_config();
            config.register_ptr_tag_lookup(leaked_lookup(first_tags, first_names));
            config.permanently_freeze_with(&RecordingGuard::default());
            config.register_ptr_tag_lookup(leaked_lookup(catch_all_tags, catch_all_names));
            return;
        }
        assert_aborted(run_child(NAME));
    }

    #[cfg(unix)]
    #[test]
    fn test_registration_into_protected_record_faults() {
        use crate::protect::HostGuard;
        use crate::test_support::assert_faulted;

        const NAME: &str = "ptr_tag::tests::test_registration_into_protected_record_faults";
        if is_child(NAME) {
            let config = leaked_config();
            config.permanently_freeze_with(&HostGuard::default());
            let lookup = leaked_lookup(catch_all_tags, catch_all_names);
            // Skip the frozen check; the head itself sits on the read-only page.
            config.ptr_tag_lookup_head.store(
                lookup as *const PtrTagLookup as *mut PtrTagLookup,
                Ordering::Release,
            );
            return;
        }
        assert_faulted(run_child(NAME));
    }
}
