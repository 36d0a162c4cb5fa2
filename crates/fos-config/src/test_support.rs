//! Shared helpers for unit tests.

use crate::protect::{ProtectedRegion, ProtectionError, ProtectionGuard};
use crate::record::Config;
use std::env;
use std::io;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;

/// Marks a child process spawned by `run_child`; holds the test it runs.
const CHILD_ENV: &str = "FOS_CONFIG_CHILD_TEST";

/// A fresh zeroed record that lives for the rest of the process.
///
/// Leaked so that freezing it never hands read-only pages back to the allocator.
pub(crate) fn leaked_config() -> &'static Config {
    Box::leak(Box::new(Config::zeroed()))
}

/// Guard that records requests without touching page tables.
#[derive(Default)]
pub(crate) struct RecordingGuard {
    regions: Mutex<Vec<ProtectedRegion>>,
}

impl RecordingGuard {
    pub(crate) fn regions(&self) -> Vec<ProtectedRegion> {
        self.regions.lock().unwrap().clone()
    }
}

impl ProtectionGuard for RecordingGuard {
    fn make_read_only(&self, region: ProtectedRegion) -> Result<(), ProtectionError> {
        self.regions.lock().unwrap().push(region);
        Ok(())
    }
}

/// Guard whose host always says no.
pub(crate) struct FailingGuard;

impl ProtectionGuard for FailingGuard {
    fn make_read_only(&self, region: ProtectedRegion) -> Result<(), ProtectionError> {
        Err(ProtectionError::Host {
            start: region.start(),
            len: region.len(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        })
    }
}

/// Whether this process is the child spawned for `test`.
pub(crate) fn is_child(test: &str) -> bool {
    env::var(CHILD_ENV).as_deref() == Ok(test)
}

/// Re-run this test binary with only `test` selected, in child mode.
pub(crate) fn run_child(test: &str) -> ExitStatus {
    let exe = env::current_exe().expect("test binary path");
    Command::new(exe)
        .args(["--exact", test, "--test-threads=1", "--nocapture"])
        .env(CHILD_ENV, test)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("spawn child test")
}

/// Signal that killed the child, if any.
#[cfg(unix)]
pub(crate) fn terminating_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

/// The child was killed by a memory fault.
#[cfg(unix)]
pub(crate) fn assert_faulted(status: ExitStatus) {
    let signal = terminating_signal(status);
    assert!(
        matches!(signal, Some(libc::SIGSEGV | libc::SIGBUS)),
        "expected a memory fault, got {status:?}"
    );
}

/// The child aborted.
#[cfg(unix)]
pub(crate) fn assert_aborted(status: ExitStatus) {
    assert_eq!(terminating_signal(status), Some(libc::SIGABRT), "got {status:?}");
}
