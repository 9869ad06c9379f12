//! Logging macros for native and wasm32 builds
//!
//! Native builds forward to `tracing` and leave subscriber setup to the
//! host. Browser builds have no subscriber, so messages are written to the
//! console instead. Every macro takes `format!` arguments.

#[doc(hidden)]
#[macro_export]
macro_rules! __tandem_log {
    ($level:ident, $console:ident, $($arg:tt)*) => {{
        #[cfg(target_arch = "wasm32")]
        web_sys::console::$console(&format!($($arg)*).into());

        #[cfg(not(target_arch = "wasm32"))]
        tracing::$level!($($arg)*);
    }};
}

/// Info level: peers joining and leaving, snapshots loaded
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__tandem_log!(info, info_1, $($arg)*) };
}

/// Warning level: lost sync, growing pending queues
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::__tandem_log!(warn, warn_1, $($arg)*) };
}

/// Error level: transactions that no longer apply, encoding failures
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::__tandem_log!(error, error_1, $($arg)*) };
}

/// Debug level: reconciliation steps, acks and denials
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::__tandem_log!(debug, debug_1, $($arg)*) };
}

/// Trace level: per-opcode execution
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::__tandem_log!(trace, log_1, $($arg)*) };
}
