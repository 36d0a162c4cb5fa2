//! Runtime Option Storage
//!
//! Options live inside the protected record so they freeze together with
//! the rest of the configuration. Storage starts zeroed; defaults are
//! written during startup by `Config::initialize_option_defaults`.
//!
//! Option names follow the JavaScriptCore flag spelling, so an argument
//! such as `--useJIT=false` applies directly.

use crate::record::Config;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Value kind of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Unsigned,
}

/// Typed option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Unsigned(u64),
}

impl OptionValue {
    fn from_raw(kind: OptionKind, raw: u64) -> Self {
        match kind {
            OptionKind::Bool => OptionValue::Bool(raw != 0),
            OptionKind::Unsigned => OptionValue::Unsigned(raw),
        }
    }

    fn parse(kind: OptionKind, text: &str) -> Option<u64> {
        match kind {
            OptionKind::Bool => match text {
                "true" | "1" => Some(1),
                "false" | "0" => Some(0),
                _ => None,
            },
            OptionKind::Unsigned => text.parse().ok(),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{}", v),
            OptionValue::Unsigned(v) => write!(f, "{}", v),
        }
    }
}

/// Identifies one runtime option. The discriminant is its storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum OptionId {
    UseLlint,
    UseJit,
    UseBaselineJit,
    UseDfgJit,
    UseFtlJit,
    UseConcurrentJit,
    JitMemoryReservationSize,
    MaxPerThreadStackUsage,
    UseGcActivityCallback,
    GcMaxHeapSize,
    UseDollarVm,
    ValidateBytecode,
    DumpDisassembly,
    CrashIfCantAllocateJitMemory,
}

/// Number of option slots.
pub const OPTION_COUNT: usize = 14;

/// Static description of an option.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub id: OptionId,
    pub name: &'static str,
    pub kind: OptionKind,
    pub default: u64,
    /// Only settable once restricted options are enabled.
    pub restricted: bool,
    pub description: &'static str,
}

const MB: u64 = 1024 * 1024;

const fn spec(
    id: OptionId,
    name: &'static str,
    kind: OptionKind,
    default: u64,
    restricted: bool,
    description: &'static str,
) -> OptionSpec {
    OptionSpec { id, name, kind, default, restricted, description }
}

impl OptionSpec {
    pub fn default_value(&self) -> OptionValue {
        OptionValue::from_raw(self.kind, self.default)
    }
}

/// One help line: `--name=<default>  description`, marked when restricted.
impl fmt::Display for OptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let option = format!("--{}={}", self.name, self.default_value());
        write!(f, "{:<40} {}", option, self.description)?;
        if self.restricted {
            write!(f, " (restricted)")?;
        }
        Ok(())
    }
}

use OptionKind::{Bool, Unsigned};

/// Option table, indexed by `OptionId`.
pub const OPTIONS: [OptionSpec; OPTION_COUNT] = [
    spec(OptionId::UseLlint, "useLLInt", Bool, 1, false, "Run the low level interpreter"),
    spec(OptionId::UseJit, "useJIT", Bool, 1, false, "Allow any JIT tier"),
    spec(OptionId::UseBaselineJit, "useBaselineJIT", Bool, 1, false, "Allow the baseline JIT"),
    spec(OptionId::UseDfgJit, "useDFGJIT", Bool, 1, false, "Allow the DFG optimizing JIT"),
    spec(OptionId::UseFtlJit, "useFTLJIT", Bool, 1, false, "Allow the FTL optimizing JIT"),
    spec(OptionId::UseConcurrentJit, "useConcurrentJIT", Bool, 1, false, "Compile on background threads"),
    spec(OptionId::JitMemoryReservationSize, "jitMemoryReservationSize", Unsigned, 16 * MB, false, "Bytes reserved for executable memory"),
    spec(OptionId::MaxPerThreadStackUsage, "maxPerThreadStackUsage", Unsigned, 4 * MB, false, "Stack budget per thread in bytes"),
    spec(OptionId::UseGcActivityCallback, "useGCActivityCallback", Bool, 1, false, "Let the GC schedule itself on a timer"),
    spec(OptionId::GcMaxHeapSize, "gcMaxHeapSize", Unsigned, 0, false, "Heap ceiling in bytes, 0 for none"),
    spec(OptionId::UseDollarVm, "useDollarVM", Bool, 0, true, "Expose the $vm debugging object"),
    spec(OptionId::ValidateBytecode, "validateBytecode", Bool, 0, true, "Validate generated bytecode"),
    spec(OptionId::DumpDisassembly, "dumpDisassembly", Bool, 0, true, "Dump disassembly of JIT code"),
    spec(OptionId::CrashIfCantAllocateJitMemory, "crashIfCantAllocateJITMemory", Bool, 0, true, "Crash when executable memory runs out"),
];

impl OptionId {
    pub fn spec(self) -> &'static OptionSpec {
        &OPTIONS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    /// Look an option up by its flag name.
    pub fn from_name(name: &str) -> Option<Self> {
        OPTIONS.iter().find(|spec| spec.name == name).map(|spec| spec.id)
    }
}

/// Errors raised by the option surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    #[error("Unknown option: {0}")]
    Unknown(String),

    #[error("Option {0} is restricted")]
    Restricted(&'static str),

    #[error("Invalid value {value:?} for option {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Malformed option argument: {0}")]
    Malformed(String),
}

/// Option slots embedded in the configuration record.
///
/// All-zero storage is valid and reads as every option off.
#[repr(C)]
pub struct OptionsStorage {
    slots: [AtomicU64; OPTION_COUNT],
}

impl OptionsStorage {
    /// Current value of `id`.
    pub fn get(&self, id: OptionId) -> OptionValue {
        OptionValue::from_raw(id.spec().kind, self.raw(id))
    }

    pub fn get_bool(&self, id: OptionId) -> bool {
        debug_assert_eq!(id.spec().kind, OptionKind::Bool);
        self.raw(id) != 0
    }

    pub fn get_unsigned(&self, id: OptionId) -> u64 {
        debug_assert_eq!(id.spec().kind, OptionKind::Unsigned);
        self.raw(id)
    }

    /// Iterate over every option with its current value.
    pub fn iter(&self) -> impl Iterator<Item = (&'static OptionSpec, OptionValue)> + '_ {
        OPTIONS.iter().map(|spec| (spec, self.get(spec.id)))
    }

    fn raw(&self, id: OptionId) -> u64 {
        self.slots[id as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn store(&self, id: OptionId, raw: u64) {
        self.slots[id as usize].store(raw, Ordering::Relaxed);
    }

    pub(crate) fn reset_to_defaults(&self) {
        for spec in &OPTIONS {
            self.store(spec.id, spec.default);
        }
    }

    /// Parse `text` for `id` and store it. Restriction checks are the caller's.
    pub(crate) fn parse_and_store(&self, id: OptionId, text: &str) -> Result<(), OptionError> {
        let spec = id.spec();
        let raw = OptionValue::parse(spec.kind, text).ok_or_else(|| OptionError::InvalidValue {
            name: spec.name,
            value: text.to_string(),
        })?;
        self.store(id, raw);
        Ok(())
    }
}

/// Split a `--name=value` argument into its name and value.
pub fn split_option_arg(arg: &str) -> Result<(&str, &str), OptionError> {
    let body = arg
        .strip_prefix("--")
        .ok_or_else(|| OptionError::Malformed(arg.to_string()))?;
    match body.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name, value)),
        _ => Err(OptionError::Malformed(arg.to_string())),
    }
}

impl Config {
    /// Write every option's default. Runs once during startup.
    pub fn initialize_option_defaults(&self) {
        self.options.reset_to_defaults();
        debug!(count = OPTION_COUNT, "Runtime options set to defaults");
    }

    /// Set option `id` from its textual value.
    ///
    /// Restricted options need `enable_restricted_options` first. Aborts
    /// once the record is protected.
    pub fn set_option(&self, id: OptionId, value: &str) -> Result<(), OptionError> {
        self.ensure_writable("set_option");

        let spec = id.spec();
        if spec.restricted && !self.restricted_options_enabled() {
            warn!(option = spec.name, "Rejected restricted option");
            return Err(OptionError::Restricted(spec.name));
        }

        self.options.parse_and_store(id, value)?;
        debug!(option = spec.name, value, "Option set");
        Ok(())
    }

    pub fn set_option_by_name(&self, name: &str, value: &str) -> Result<(), OptionError> {
        let id = OptionId::from_name(name).ok_or_else(|| OptionError::Unknown(name.to_string()))?;
        self.set_option(id, value)
    }

    /// Apply a `--name=value` argument.
    pub fn apply_option_arg(&self, arg: &str) -> Result<(), OptionError> {
        let (name, value) = split_option_arg(arg)?;
        self.set_option_by_name(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{is_child, leaked_config, run_child, RecordingGuard};
    use std::mem::MaybeUninit;

    fn zeroed_storage() -> OptionsStorage {
        unsafe { MaybeUninit::zeroed().assume_init() }
    }

    #[test]
    fn test_table_is_indexed_by_id() {
        for (slot, spec) in OPTIONS.iter().enumerate() {
            assert_eq!(spec.id as usize, slot, "{} is out of place", spec.name);
        }
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(OptionId::from_name("useJIT"), Some(OptionId::UseJit));
        assert_eq!(OptionId::from_name("useDollarVM"), Some(OptionId::UseDollarVm));
        assert_eq!(OptionId::from_name("useWarpSpeed"), None);
    }

    #[test]
    fn test_zeroed_storage_reads_off() {
        let storage = zeroed_storage();
        for (_, value) in storage.iter() {
            assert!(matches!(value, OptionValue::Bool(false) | OptionValue::Unsigned(0)));
        }
    }

    #[test]
    fn test_defaults() {
        let storage = zeroed_storage();
        storage.reset_to_defaults();

        assert!(storage.get_bool(OptionId::UseJit));
        assert!(!storage.get_bool(OptionId::UseDollarVm));
        assert_eq!(storage.get_unsigned(OptionId::JitMemoryReservationSize), 16 * MB);
    }

    #[test]
    fn test_help_lines() {
        let line = OptionId::JitMemoryReservationSize.spec().to_string();
        assert!(line.starts_with("--jitMemoryReservationSize=16777216 "));
        assert!(line.ends_with("Bytes reserved for executable memory"));

        let line = OptionId::UseDollarVm.spec().to_string();
        assert!(line.starts_with("--useDollarVM=false "));
        assert!(line.ends_with("Expose the $vm debugging object (restricted)"));
    }

    #[test]
    fn test_parse_values() {
        let storage = zeroed_storage();

        storage.parse_and_store(OptionId::UseJit, "true").unwrap();
        assert_eq!(storage.get(OptionId::UseJit), OptionValue::Bool(true));

        storage.parse_and_store(OptionId::GcMaxHeapSize, "16777216").unwrap();
        assert_eq!(storage.get_unsigned(OptionId::GcMaxHeapSize), 16 * MB);

        let err = storage.parse_and_store(OptionId::UseJit, "maybe").unwrap_err();
        assert!(matches!(err, OptionError::InvalidValue { name: "useJIT", .. }));
    }

    #[test]
    fn test_split_option_arg() {
        assert_eq!(split_option_arg("--useJIT=false").unwrap(), ("useJIT", "false"));
        assert!(split_option_arg("useJIT=false").is_err());
        assert!(split_option_arg("--useJIT").is_err());
        assert!(split_option_arg("--=1").is_err());
    }

    #[test]
    fn test_apply_option_args() {
        let config = leaked_config();
        config.initialize_option_defaults();

        config.apply_option_arg("--useJIT=false").unwrap();
        config.apply_option_arg("--jitMemoryReservationSize=1048576").unwrap();

        assert!(!config.options.get_bool(OptionId::UseJit));
        assert_eq!(config.options.get_unsigned(OptionId::JitMemoryReservationSize), MB);
        assert_eq!(
            config.apply_option_arg("--useTurbo=true"),
            Err(OptionError::Unknown("useTurbo".to_string()))
        );
    }

    #[test]
    fn test_restricted_options_need_unlock() {
        let config = leaked_config();

        assert_eq!(
            config.set_option(OptionId::UseDollarVm, "true"),
            Err(OptionError::Restricted("useDollarVM"))
        );
        assert!(!config.options.get_bool(OptionId::UseDollarVm));

        config.enable_restricted_options();
        config.set_option(OptionId::UseDollarVm, "true").unwrap();
        assert!(config.options.get_bool(OptionId::UseDollarVm));
    }

    #[test]
    fn test_options_settable_after_bypassed_freeze() {
        let config = leaked_config();
        config.disable_freezing_for_testing();
        config.permanently_freeze_with(&RecordingGuard::default());

        config.set_option(OptionId::UseJit, "false").unwrap();
        assert!(!config.options.get_bool(OptionId::UseJit));
    }

    #[cfg(unix)]
    #[test]
    fn test_set_option_after_freeze_aborts() {
        use crate::test_support::assert_aborted;

        const NAME: &str = "options::tests::test_set_option_after_freeze_aborts";
        if is_child(NAME) {
            let config = leaked_config();
            config.initialize_option_defaults();
            config.permanently_freeze_with(&RecordingGuard::default());
            let _ = config.set_option(OptionId::UseJit, "false");
            return;
        }
        assert_aborted(run_child(NAME));
    }
}
