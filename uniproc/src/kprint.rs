//! Kernel print utilities.
//!
//! All output goes to the standard error stream so that it interleaves
//! correctly with test harness output.

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    std::eprint!("{fmt}");
}

/// Prints out the message to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
///
/// Suppressed while the machine runs in quiet mode.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) {
            $crate::print!("[INFO] {}\n", format_args!($($arg)*))
        }
    };
}

/// Display a warning message.
///
/// Suppressed while the machine runs in quiet mode.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => {
        if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) {
            $crate::print!("[WARN] {}\n", format_args!($($arg)*))
        }
    };
}

/// Display a debug message.
///
/// Suppressed while the machine runs in quiet mode.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) {
            $crate::print!("[DEBUG] {}\n", format_args!($($arg)*))
        }
    };
}
