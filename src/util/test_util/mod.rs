use std::panic;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

#[cfg(feature = "mock_test")]
pub mod fixtures;
#[cfg(feature = "mock_test")]
pub mod mock_method;
#[cfg(feature = "mock_test")]
pub mod mock_vm;

/// Run `f` on another thread and fail if it does not return within `millis`. Catches tests that
/// would otherwise hang on a lock.
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let val = f();
        let _ = done_tx.send(());
        val
    });
    match done_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(_) => handle.join().unwrap_or_else(|e| panic::resume_unwind(e)),
        Err(mpsc::RecvTimeoutError::Disconnected) => match handle.join() {
            Ok(val) => val,
            Err(e) => panic::resume_unwind(e),
        },
        Err(e) => panic!("Did not finish in {}ms: {}", millis, e),
    }
}

lazy_static! {
    // The mock VM is a process-wide singleton, so tests that install one take turns.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // A failed test poisons the lock; the next one still runs.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

/// Runs `cleanup` even if `test` panics, then re-raises the panic.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}
