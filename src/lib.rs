//! # t0card
//!
//! A portable, no_std firmware core for contact smart cards speaking the
//! ISO 7816-3 T=0 character protocol, with a side-channel hardened
//! (masked and shuffled) inverse AES-128 as the card application.
//!
//! The transport is bit-banged over a single bidirectional I/O contact
//! using:
//! - `embedded-hal` traits for digital I/O
//! - two compare-match timers (bit clock and sample clock) behind small
//!   traits the target HAL implements
//! - a pin-change interrupt for start-bit detection
//! - interrupt-safe driver access with `critical-section`
//!
//! ## Crate features
//! | Feature               | Description |
//! |-----------------------|-------------|
//! | `std`                 | Disables `#![no_std]`, for host-side testing |
//! | `timer-isr` (default) | Global driver glue and ISR macros via `critical_section` |
//! | `delay-loop`          | Blocking scheduler over `embedded_hal::delay::DelayNs` |
//! | `defmt-0-3`           | Diagnostics through `defmt` |
//! | `log`                 | Diagnostics through `log` |
//!
//! ## What the card does
//!
//! After reset it emits the ATR `3B 90 11 00` (T=0, F=372, D=1), then
//! loops one fixed dialogue: a five-byte command, sixteen key bytes each
//! preceded by an `EF` handshake, status `61 10`, a second command,
//! procedure byte `C0`, the inverse-AES-128 of the uploaded block under
//! the provisioned key, and status `90 00`. Parity errors on receive are
//! logged and counted but never NACKed.
//!
//! The decryption masks every intermediate byte with per-invocation
//! random masks and visits the sixteen S-box substitutions of each round
//! in a fresh random order, which is the point of the exercise: a card
//! you can put under a DPA bench without handing over the key on the
//! first averaged trace. See [`aes`] for the pipeline.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use t0card::timer::CardConfig;
//! use t0card::{answer_to_reset_card, etu_tick_card, init_card_driver, io_edge_card,
//!              poll_card, sample_tick_card, setup_card_driver};
//!
//! init_card_driver!(IoPin, TriggerPin, BitTimer, SampleTimer, PinChange, Trng);
//!
//! #[interrupt]
//! fn TIMER0_COMPA() { etu_tick_card!(); }
//! #[interrupt]
//! fn TIMER2_COMPA() { sample_tick_card!(); }
//! #[interrupt]
//! fn PCINT1() { io_edge_card!(); }
//!
//! fn main() -> ! {
//!     // ... bring up pins, timers and the TRNG ...
//!     setup_card_driver!(io, Some(trigger), bclk, sclk, edge, trng, &KEY,
//!                        CardConfig::default());
//!     wait_cycles(t0card::consts::ATR_WAIT_CYCLES);
//!     answer_to_reset_card!();
//!     loop {
//!         poll_card!();
//!     }
//! }
//! ```
//!
//! Targets without spare interrupts can use the `delay-loop` backend
//! instead; see [`timer::run_card_step`].
//!
//! ## Integration notes
//!
//! - The I/O pin must be open-drain with the pull-up on the terminal
//!   side; releasing the line is driving it high.
//! - All timing is in card-clock cycles. One bit is one ETU (372 cycles
//!   by default); the compare helpers in [`timer`] turn that into timer
//!   compare values for your prescaler.
//! - Only one driver instance should exist in interrupt-driven mode.
//! - The RNG parameter decides the strength of the masking. A seeded
//!   PRNG is fine on the bench and inadequate in production; inject a
//!   hardware TRNG there.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "timer-isr")]
pub use critical_section;

pub use heapless;
pub use rand_core;

pub(crate) mod fmt;

pub mod aes;
pub mod apdu;
pub mod codec;
pub mod consts;
pub mod driver;
pub mod line;
pub mod session;
pub mod timer;
