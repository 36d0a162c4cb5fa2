//! Pointer tags owned by the runtime itself.

use fos_config::config;

/// Runtime pointer tags, numbered by position.
const PTR_TAG_NAMES: [&str; 5] = [
    "NoPtrTag",
    "CFunctionPtrTag",
    "JITCodePtrTag",
    "JSEntryPtrTag",
    "OperationPtrTag",
];

const JIT_CODE_PTR_TAG: usize = 2;

/// Pointers into executable memory are signed as JIT code.
fn tag_for_ptr(ptr: usize) -> Option<&'static str> {
    config()
        .is_jit_pc(ptr)
        .then_some(PTR_TAG_NAMES[JIT_CODE_PTR_TAG])
}

fn ptr_tag_name(tag: u64) -> Option<&'static str> {
    usize::try_from(tag)
        .ok()
        .and_then(|index| PTR_TAG_NAMES.get(index).copied())
}

/// Fill in the record's embedded lookup and put it on the chain.
///
/// Must run before the record is frozen.
pub fn install() {
    let config = config();
    config.ptr_tag_lookup_record.install(tag_for_ptr, ptr_tag_name);
    config.register_ptr_tag_lookup(&config.ptr_tag_lookup_record);
}
