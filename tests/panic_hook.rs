//! The logging hook owns process-wide state, so it gets its own test binary.

use rustream::panic_handler::{install_panic_hook, panic_count, panic_message};
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};

static EARLIER_HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

#[test]
fn test_hook_chains_to_previous_hook() {
    panic::set_hook(Box::new(|_| {
        EARLIER_HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
    }));
    install_panic_hook();

    let result = std::thread::Builder::new()
        .name("it-chained".to_string())
        .spawn(|| panic!("chained"))
        .unwrap()
        .join();

    assert_eq!(panic_message(result.unwrap_err().as_ref()), "chained");
    assert_eq!(EARLIER_HOOK_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(panic_count(), 1);

    drop(panic::take_hook());
}
