//! Freeze Lifecycle
//!
//! The record moves one way only: `Unfrozen -> Frozen`. Freezing maps its
//! page read-only, after which every store faults in hardware. Misuse of
//! the lifecycle (freezing twice, bypassing after a real freeze, failing to
//! protect) aborts the process; there is no recovery path.
//!
//! All operations here are meant for single-threaded startup, before any
//! JIT or worker thread exists.

use crate::page::{host_page_size, CONFIG_SIZE_TO_PROTECT};
use crate::protect::{HostGuard, ProtectionGuard};
use crate::record::{config, Config};
use serde::Serialize;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info};

/// Lifecycle state of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FreezeState {
    /// All fields writable.
    Unfrozen,
    /// Terminal. Fields are read-only unless freezing was disabled for testing.
    Frozen,
}

/// Log `reason` and abort the process.
pub(crate) fn crash(reason: &str) -> ! {
    error!(reason, "Fatal misuse of the JIT configuration");
    std::process::abort()
}

impl Config {
    pub fn state(&self) -> FreezeState {
        if self.is_permanently_frozen() {
            FreezeState::Frozen
        } else {
            FreezeState::Unfrozen
        }
    }

    /// Frozen with page protection actually applied.
    pub fn is_protected(&self) -> bool {
        self.is_permanently_frozen() && !self.disabled_freezing_for_testing()
    }

    /// Abort if the record is protected. Guards every mutating operation.
    pub(crate) fn ensure_writable(&self, operation: &str) {
        if self.is_protected() {
            error!(operation, "Configuration is permanently frozen");
            crash("write to a permanently frozen configuration");
        }
    }

    /// Keep later `permanently_freeze` calls from applying page protection.
    ///
    /// The frozen flag still flips so shared startup code behaves as usual.
    #[cfg(any(test, feature = "testing"))]
    pub fn disable_freezing_for_testing(&self) {
        self.ensure_writable("disable_freezing_for_testing");
        self.disabled_freezing_for_testing.store(true, Ordering::Release);
        tracing::warn!("Configuration freezing disabled for testing");
    }

    /// Unlock options hidden from production configuration surfaces.
    pub fn enable_restricted_options(&self) {
        self.ensure_writable("enable_restricted_options");
        self.restricted_options_enabled.store(true, Ordering::Release);
        info!("Restricted options enabled");
    }

    /// `disable_freezing_for_testing` followed by `enable_restricted_options`.
    #[cfg(any(test, feature = "testing"))]
    pub fn configure_for_testing(&self) {
        self.disable_freezing_for_testing();
        self.enable_restricted_options();
    }

    /// Freeze the record, making its page read-only through `guard`.
    ///
    /// Aborts if the record is already frozen and protected, if the host
    /// page size does not divide the record, or if `guard` fails.
    pub fn permanently_freeze_with<G: ProtectionGuard + ?Sized>(&self, guard: &G) {
        if self.disabled_freezing_for_testing() {
            self.is_permanently_frozen.store(true, Ordering::Release);
            debug!("Freeze requested with freezing disabled, leaving record writable");
            return;
        }

        if self.is_permanently_frozen() {
            crash("permanently_freeze called on a frozen configuration");
        }

        let host_page = host_page_size();
        if CONFIG_SIZE_TO_PROTECT % host_page != 0 {
            error!(host_page, size = CONFIG_SIZE_TO_PROTECT, "Host page does not divide the record");
            crash("configuration record is not a whole number of host pages");
        }

        let region = match self.protected_region() {
            Ok(region) => region,
            Err(err) => {
                error!(%err, "Cannot describe the configuration pages");
                crash("configuration record is not page aligned");
            }
        };

        self.is_permanently_frozen.store(true, Ordering::Release);

        if let Err(err) = guard.make_read_only(region) {
            error!(%err, "Failed to protect the configuration");
            crash("configuration could not be made read-only");
        }

        info!(
            address = format_args!("{:#x}", region.start()),
            size = region.len(),
            "Configuration permanently frozen"
        );
    }

    /// Record that threading initialisation ran. A second call aborts.
    pub fn mark_threading_initialized(&self) {
        self.ensure_writable("mark_threading_initialized");
        if self
            .initialize_threading_has_been_called
            .swap(true, Ordering::Relaxed)
        {
            crash("threading initialised twice");
        }
    }
}

/// Freeze the process-wide record.
pub fn permanently_freeze() {
    config().permanently_freeze_with(&HostGuard::default());
}

/// Unlock restricted options on the process-wide record.
pub fn enable_restricted_options() {
    config().enable_restricted_options();
}

/// Disable page protection of the process-wide record for tests.
#[cfg(any(test, feature = "testing"))]
pub fn disable_freezing_for_testing() {
    config().disable_freezing_for_testing();
}

/// Put the process-wide record into its test configuration.
#[cfg(any(test, feature = "testing"))]
pub fn configure_for_testing() {
    config().configure_for_testing();
}
