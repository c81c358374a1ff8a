//! Module that prints the status lines of a process to stderr.

use color_print::{ceprintln, cformat};

/// Environment variable that enables `debug` lines.
pub const DEBUG_ENV: &str = "MARKER_RING_DEBUG";

/// Function that prints an information line.
pub fn info(msg: &str) {
    ceprintln!("<green, bold>[INFO]</green, bold> {}", msg);
}

/// Function that prints a warning line.
pub fn warn(msg: &str) {
    ceprintln!("<yellow, bold>[WARN]</yellow, bold> {}", msg);
}

/// Function that prints an error line.
pub fn error(msg: &str) {
    ceprintln!("<red, bold>[ERROR]</red, bold> {}", msg);
}

/// Function that prints a debug line when `MARKER_RING_DEBUG` is set.
pub fn debug(msg: &str) {
    if std::env::var_os(DEBUG_ENV).is_some() {
        ceprintln!("<blue, bold>[DEBUG]</blue, bold> {}", msg);
    }
}

/// Function that prints the `proc_id: .., state: ..` status line of a token reception.
pub fn state(proc_id: u32, state: u64) {
    info(&cformat!(
        "proc_id: <bold>{proc_id}</bold>, state: <bold>{state}</bold>"
    ));
}
