//! Per-node logging.
//!
//! Messages go through `tracing` with the node's full name attached as the
//! `node` field, after passing the node's own [`LogLevel`] gate. The gate
//! lets an operator turn a single device subtree verbose (or silent) through
//! the `setLogLevel*` commands, independently of the subscriber's filter.
//!
//! ```rust,ignore
//! node_info!(machine.base(), "switching from {} to {}", from, to);
//! ```
//!
//! [`LogLevel`]: crate::types::LogLevel

/// Logs at debug severity through a [`Base`](crate::base::Base).
#[macro_export]
macro_rules! node_debug {
    ($base:expr, $($arg:tt)+) => {
        $base.log($crate::types::LogLevel::Debug, format_args!($($arg)+))
    };
}

/// Logs at info severity through a [`Base`](crate::base::Base).
#[macro_export]
macro_rules! node_info {
    ($base:expr, $($arg:tt)+) => {
        $base.log($crate::types::LogLevel::Info, format_args!($($arg)+))
    };
}

/// Logs at warning severity through a [`Base`](crate::base::Base).
#[macro_export]
macro_rules! node_warn {
    ($base:expr, $($arg:tt)+) => {
        $base.log($crate::types::LogLevel::Warning, format_args!($($arg)+))
    };
}

/// Logs at error severity through a [`Base`](crate::base::Base).
#[macro_export]
macro_rules! node_error {
    ($base:expr, $($arg:tt)+) => {
        $base.log($crate::types::LogLevel::Error, format_args!($($arg)+))
    };
}
