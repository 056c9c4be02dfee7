//! Cooperative cancellation via a process-wide atomic flag

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Exit status after a second interrupt (128 + SIGINT)
pub const FORCED_EXIT_CODE: i32 = 130;

/// Global shutdown flag.
///
/// Checked by the dispatcher before claiming another subject, by the
/// sequencer between stages and by [`ProcessRunner`](crate::ProcessRunner)
/// while waiting on a child.
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

pub fn request_shutdown() {
    shutdown_flag().store(true, Ordering::Relaxed);
}

/// Route SIGINT and SIGTERM to the shutdown flag.
///
/// The first signal only sets the flag, so running tools are killed and no
/// new subject starts. A second signal exits immediately with
/// [`FORCED_EXIT_CODE`].
pub fn install_signal_handlers() -> io::Result<()> {
    for signal in [SIGTERM, SIGINT] {
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        unsafe {
            signal_hook::low_level::register(signal, || {
                if shutdown_flag().swap(true, Ordering::Relaxed) {
                    std::process::exit(FORCED_EXIT_CODE);
                }
            })?;
        }
    }
    Ok(())
}
