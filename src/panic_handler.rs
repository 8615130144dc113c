//! Panic hook for worker threads.
//!
//! A panic inside a filter, processor, source or sink ends only the worker
//! thread it happened on. The hook makes sure that ending is logged with the
//! worker's thread name (`<prefix>-<source>`) before the engine observes it
//! on join.

use std::any::Any;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, warn};

static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

/// Install the logging panic hook. Call once, early in `main`; later calls
/// are ignored. The hook that was installed before still runs after logging.
///
/// # Example
/// ```no_run
/// use rustream::panic_handler;
///
/// fn main() {
///     panic_handler::install_panic_hook();
///     // ... build and start the engine
/// }
/// ```
pub fn install_panic_hook() {
    if PANIC_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        warn!("Panic hook already installed, skipping");
        return;
    }

    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        PANIC_COUNT.fetch_add(1, Ordering::Relaxed);

        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        let thread = std::thread::current();

        error!(
            "Panic in thread '{}' at {}: {}",
            thread.name().unwrap_or("unnamed"),
            location,
            panic_message(info.payload())
        );
        if std::env::var("RUST_BACKTRACE").is_err() {
            warn!("Set RUST_BACKTRACE=1 for a backtrace");
        }
        previous(info);
    }));

    tracing::info!("Panic hook installed");
}

pub fn is_panic_hook_installed() -> bool {
    PANIC_HOOK_INSTALLED.load(Ordering::SeqCst)
}

/// Panics observed by the hook since it was installed.
pub fn panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::Relaxed)
}

/// Text of a panic payload, as carried by `panic!` with a literal or a
/// formatted message.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
