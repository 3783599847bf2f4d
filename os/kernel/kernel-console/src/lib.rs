//! # Kernel Console Output
//!
//! `printk!` and a [`log`] backend for the kernel, writing into whatever
//! console driver registered itself as the sink.
//!
//! ## Overview
//!
//! The memory subsystem reports through the `log` facade (`warn!` for
//! suspicious mappings, `error!` when a process is killed for lack of
//! memory). This crate turns those records into console lines without
//! allocating, which matters because the out-of-memory path must still be
//! able to talk.
//!
//! ```text
//! log::error!(..) ──► ConsoleLogger ──┐
//!                                     ├──► ConsoleSink (fmt::Write) ──► registered sink fn
//! printk!(..) ────────────────────────┘
//! ```
//!
//! ## Feature System
//!
//! ### `enabled` Feature (default)
//! When disabled, `printk!` and the logger compile to no-ops.
//!
//! ## Usage
//! ```rust
//! use kernel_console::{ConsoleLogger, printk, set_sink};
//! use log::LevelFilter;
//!
//! fn tty_write(s: &str) {
//!     // hand the bytes to the console driver
//! #   let _ = s;
//! }
//!
//! set_sink(tty_write);
//! ConsoleLogger::init(LevelFilter::Info).expect("logger initialization");
//! printk!("Free mem: {} bytes\n", 12 * 4096);
//! log::info!("memory manager up");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::ConsoleLogger;

use core::sync::atomic::{AtomicPtr, Ordering};

/// Console driver entry point: writes one chunk of UTF-8 text.
pub type SinkFn = fn(&str);

static SINK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Route all console output to `sink`. May be called again to switch drivers.
pub fn set_sink(sink: SinkFn) {
    SINK.store(sink as *mut (), Ordering::Release);
}

#[cfg_attr(not(feature = "enabled"), allow(dead_code))]
fn sink() -> Option<SinkFn> {
    let ptr = SINK.load(Ordering::Acquire);
    if ptr.is_null() {
        return None;
    }
    // SAFETY: the only non-null values ever stored are `SinkFn` pointers.
    Some(unsafe { core::mem::transmute::<*mut (), SinkFn>(ptr) })
}

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod console_fmt {
    use core::fmt::{self, Write};

    pub struct ConsoleSink(pub(crate) super::SinkFn);

    impl Write for ConsoleSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            (self.0)(s);
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn console_write(args: fmt::Arguments) {
        if let Some(sink) = super::sink() {
            // Best effort; there is nowhere to report a failing console.
            let _ = fmt::write(&mut ConsoleSink(sink), args);
        }
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod console_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn console_write(_: fmt::Arguments) {}
}

/// Formatted console output, like `print!`, without allocation.
#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => {{
        $crate::console_fmt::console_write(core::format_args!($($arg)*));
    }};
}
