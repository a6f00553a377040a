//! Diagnostic output macros.
//!
//! The original card hardware carries a debug UART that is not part of the
//! ISO interface; in this crate that channel is whatever logger the
//! integrating firmware installs. With the `defmt-0-3` feature the messages
//! go through `defmt`, with the `log` feature through `log`, and with
//! neither the macros compile to nothing.
//!
//! Format strings stick to plain `{}` placeholders so the same literal is
//! valid for both backends.

macro_rules! diag_warn {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        #[cfg(feature = "defmt-0-3")]
        defmt::warn!($fmt $(, $arg)*);
        #[cfg(all(feature = "log", not(feature = "defmt-0-3")))]
        log::warn!($fmt $(, $arg)*);
        #[cfg(not(any(feature = "defmt-0-3", feature = "log")))]
        {
            $( let _ = &$arg; )*
        }
    }};
}

macro_rules! diag_debug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        #[cfg(feature = "defmt-0-3")]
        defmt::debug!($fmt $(, $arg)*);
        #[cfg(all(feature = "log", not(feature = "defmt-0-3")))]
        log::debug!($fmt $(, $arg)*);
        #[cfg(not(any(feature = "defmt-0-3", feature = "log")))]
        {
            $( let _ = &$arg; )*
        }
    }};
}

pub(crate) use {diag_debug, diag_warn};
