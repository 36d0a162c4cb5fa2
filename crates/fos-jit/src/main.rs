//! fos-jit: JIT Configuration Bootstrap
//!
//! Brings up the process-wide JIT configuration the way an embedding
//! runtime does at startup, freezes it, and prints the frozen record.
//!
//! ```text
//! fos-jit [--list-options] [--restricted-options] [--configure-for-testing] [--<option>=<value>...]
//! ```

mod args;
mod exec_memory;
mod tags;

use anyhow::{Context, Result};
use args::StartupArgs;
use exec_memory::ExecutableReservation;
use fos_config::{config, Config, OptionId, Vm, OPTIONS};
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = StartupArgs::parse(std::env::args().skip(1))?;

    if args.list_options {
        for spec in &OPTIONS {
            println!("{spec}");
        }
        return Ok(());
    }

    info!("fos-jit starting...");

    let config = config();
    config.mark_threading_initialized();

    if args.configure_for_testing {
        #[cfg(feature = "testing")]
        fos_config::configure_for_testing();
    }
    if args.restricted_options {
        fos_config::enable_restricted_options();
    }

    config.initialize_option_defaults();
    for option in &args.options {
        config
            .apply_option_arg(option)
            .with_context(|| format!("Failed to apply {option}"))?;
    }
    config
        .jit_disabled
        .store(!config.options.get_bool(OptionId::UseJit), Ordering::Relaxed);

    // Held until exit; the frozen bounds point into it.
    let _reservation = reserve_executable_memory(config)?;

    config.set_shell_timeout_check_callback(shell_timeout_check);
    tags::install();

    fos_config::permanently_freeze();

    let snapshot = serde_json::to_string_pretty(&config.snapshot())?;
    println!("{snapshot}");

    info!("fos-jit shutting down");
    Ok(())
}

/// Reserve executable memory and publish its bounds.
///
/// A failed reservation disables the JIT unless
/// `crashIfCantAllocateJITMemory` asks for a hard failure.
fn reserve_executable_memory(config: &Config) -> Result<Option<ExecutableReservation>> {
    if !config.jit_enabled() {
        info!("JIT disabled, no executable memory reserved");
        return Ok(None);
    }

    let size = config.options.get_unsigned(OptionId::JitMemoryReservationSize);
    let reservation = usize::try_from(size)
        .context("jitMemoryReservationSize does not fit in the address space")
        .and_then(|size| ExecutableReservation::reserve(size).map_err(Into::into));

    match reservation {
        Ok(reservation) => {
            config
                .start_executable_memory
                .store(reservation.start(), Ordering::Relaxed);
            config
                .end_executable_memory
                .store(reservation.end(), Ordering::Relaxed);
            info!(
                start = format_args!("{:#x}", reservation.start()),
                size = reservation.len(),
                "Executable memory reserved"
            );
            Ok(Some(reservation))
        }
        Err(err) if config.options.get_bool(OptionId::CrashIfCantAllocateJitMemory) => Err(err),
        Err(err) => {
            warn!(error = %err, "No executable memory, falling back to the interpreter");
            config.jit_disabled.store(true, Ordering::Relaxed);
            Ok(None)
        }
    }
}

fn shell_timeout_check(_vm: &Vm) {
    warn!("Shell timeout check fired");
}
