//! Error reporting and logging sinks.

use core::cell::Cell;
use core::fmt;

use critical_section::Mutex;

/// Sink receiving a formatted message.
pub type Handler = fn(fmt::Arguments<'_>);

/// Errors reported by resource allocation and peripheral setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The resource is held by another owner.
    AlreadyInUse,
    /// The key does not name a resource known to the registry.
    InvalidResource,
    /// The pin cannot serve the requested peripheral function.
    InvalidPin,
    /// The requested configuration is not supported by the hardware.
    UnsupportedConfig,
    /// The addressed device did not acknowledge.
    Nack,
    /// A single transfer phase exceeds the hardware byte counter.
    TransferTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Error::AlreadyInUse => "resource already in use",
            Error::InvalidResource => "invalid resource",
            Error::InvalidPin => "invalid pin",
            Error::UnsupportedConfig => "unsupported configuration",
            Error::Nack => "NACK received",
            Error::TransferTooLong => "transfer too long",
        };
        f.write_str(text)
    }
}

/// Settable error and log handlers shared by every registry and peripheral.
///
/// Create one instance (usually a `static`) before any allocation happens and
/// pass it by reference. Events raised while no handler is installed are
/// dropped, apart from the RTT mirror enabled by the `rtt` feature.
pub struct Diagnostics {
    error: Mutex<Cell<Option<Handler>>>,
    log: Mutex<Cell<Option<Handler>>>,
}

impl Diagnostics {
    pub const fn new() -> Self {
        Self {
            error: Mutex::new(Cell::new(None)),
            log: Mutex::new(Cell::new(None)),
        }
    }

    /// Install (or remove) the error sink.
    pub fn set_error_handler(&self, handler: Option<Handler>) {
        critical_section::with(|cs| self.error.borrow(cs).set(handler));
    }

    /// Install (or remove) the informational log sink.
    pub fn set_log_handler(&self, handler: Option<Handler>) {
        critical_section::with(|cs| self.log.borrow(cs).set(handler));
    }

    /// Report a contract violation or configuration error.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        #[cfg(feature = "rtt")]
        rtt_target::rprintln!("error: {}", args);

        let handler = critical_section::with(|cs| self.error.borrow(cs).get());
        if let Some(handler) = handler {
            handler(args);
        }
    }

    pub fn log(&self, args: fmt::Arguments<'_>) {
        #[cfg(feature = "rtt")]
        rtt_target::rprintln!("{}", args);

        let handler = critical_section::with(|cs| self.log.borrow(cs).get());
        if let Some(handler) = handler {
            handler(args);
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Debug trace, compiled in only with the `rtt` feature.
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "rtt")]
        rtt_target::debug_rprintln!($($arg)*);
    };
}

pub(crate) use trace;

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    use std::cell::RefCell;
    use std::string::{String, ToString};
    use std::vec::Vec;

    std::thread_local! {
        static ERRORS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
        static LOGS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    fn record_error(args: fmt::Arguments<'_>) {
        ERRORS.with(|e| e.borrow_mut().push(args.to_string()));
    }

    fn record_log(args: fmt::Arguments<'_>) {
        LOGS.with(|l| l.borrow_mut().push(args.to_string()));
    }

    /// Diagnostics with thread-local capturing handlers.
    pub(crate) fn capturing() -> &'static Diagnostics {
        ERRORS.with(|e| e.borrow_mut().clear());
        LOGS.with(|l| l.borrow_mut().clear());
        let diag = std::boxed::Box::leak(std::boxed::Box::new(Diagnostics::new()));
        diag.set_error_handler(Some(record_error));
        diag.set_log_handler(Some(record_log));
        diag
    }

    /// Errors captured on the current thread since the last `capturing()`.
    pub(crate) fn errors() -> Vec<String> {
        ERRORS.with(|e| e.borrow().clone())
    }

    #[test]
    fn test_handlers() {
        let diag = capturing();

        diag.error(format_args!("bad {}", 1));
        diag.log(format_args!("hello"));
        assert_eq!(errors(), ["bad 1"]);
        assert_eq!(LOGS.with(|l| l.borrow().clone()), ["hello"]);
    }

    #[test]
    fn test_no_handler_swallows() {
        let diag = capturing();
        diag.set_error_handler(None);

        diag.error(format_args!("lost"));
        assert!(errors().is_empty());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::Nack.to_string(), "NACK received");
    }
}
