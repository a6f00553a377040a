//! Timing configuration and scheduling backends.
//!
//! All card timing is expressed in cycles of the externally supplied card
//! clock. One bit lasts one elementary time unit (ETU) of `F / D` cycles,
//! 372 by default. The two hardware timers behind [`CompareTimer`] count
//! prescaled clock ticks up to a compare value and fire an interrupt on
//! match:
//!
//! - the *bit clock* free-runs at exactly one ETU during transmission and
//!   is the only transmit timing authority, so jitter cannot accumulate
//!   across the ten bits of a character;
//! - the *sample clock* is armed per received character, first for the
//!   middle of data bit 0 (1.5 ETU after the start edge, less a documented
//!   slack), then reprogrammed to one ETU for the remaining bits.
//!
//! Two scheduling backends drive the driver, mirroring the two ways the
//! hardware can deliver ticks:
//! - `timer-isr` (default): a `critical_section`-guarded global driver
//!   plus macros, for firmware with real timer and pin-change interrupts.
//! - `delay-loop`: a blocking scheduler over `embedded_hal::delay::DelayNs`
//!   for targets without spare interrupt sources.
//!
//! Compare helpers come in runtime (`libm`-rounded) and `const` flavours.
//! With the default prescaler of 4 one ETU is exactly 93 ticks, so the
//! compare match lands on the 372-cycle bit boundary with no error.

use libm::round;

#[cfg(feature = "delay-loop")]
mod delay;
#[cfg(feature = "delay-loop")]
pub use delay::*;

#[cfg(feature = "timer-isr")]
mod isr;
#[cfg(feature = "timer-isr")]
pub use isr::*;

#[cfg(feature = "timer-isr")]
mod macros;

/// Default clock-rate conversion factor (F index 1 of ISO 7816-3).
pub const DEFAULT_F: u16 = 372;

/// Default bit-rate adjustment factor (D index 1).
pub const DEFAULT_D: u8 = 1;

/// Default timer prescaler. 372 is divisible by 4, so the ETU compare is
/// exact.
pub const DEFAULT_PRESCALER: u16 = 4;

/// Adjustment, in clock cycles, applied to the nominal 1.5-ETU first
/// sample point of a received character. Negative means the sample fires
/// early. The value compensates the latency between the compare match and
/// the actual pin read inside the sample ISR and was tuned against real
/// readers, which tend to hold the start bit low slightly longer than one
/// ETU.
pub const START_BIT_SLACK_CYCLES: i32 = -48;

/// The ETU ratio advertised in the ATR and used for all timing.
///
/// Fixed once the ATR has gone out; this card never negotiates PPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtuConfig {
    /// Clock-rate conversion factor.
    pub f: u16,
    /// Bit-rate adjustment factor.
    pub d: u8,
}

impl EtuConfig {
    /// Clock cycles per ETU.
    pub const fn etu_cycles(&self) -> u16 {
        self.f / self.d as u16
    }
}

impl Default for EtuConfig {
    fn default() -> Self {
        Self {
            f: DEFAULT_F,
            d: DEFAULT_D,
        }
    }
}

/// Everything the driver needs to program its two timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardConfig {
    /// The ETU ratio.
    pub etu: EtuConfig,
    /// Prescaler shared by both timers.
    pub prescaler: u16,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            etu: EtuConfig::default(),
            prescaler: DEFAULT_PRESCALER,
        }
    }
}

/// A hardware compare-match timer: counts prescaled clock ticks, fires an
/// interrupt at the compare value, reloads and keeps going.
///
/// The driver owns two of these. Implementations wrap the target's timer
/// peripheral registers; [`NoTimer`] exists for delay-loop integrations
/// and tests where ticks are delivered by other means.
pub trait CompareTimer {
    /// Resets the counter, sets the compare value and arms the interrupt.
    fn start(&mut self, compare: u16);
    /// Disarms the timer.
    fn stop(&mut self);
}

/// The pin-change interrupt source watching the I/O contact for the
/// falling start-bit edge.
///
/// The handler must disable itself after the edge (the driver calls
/// [`disable`](EdgeDetector::disable)) so a mid-character transition does
/// not re-enter.
pub trait EdgeDetector {
    /// Arms the falling-edge interrupt.
    fn enable(&mut self);
    /// Disarms it.
    fn disable(&mut self);
}

/// A do-nothing [`CompareTimer`] for integrations that schedule ticks
/// without timer hardware (the `delay-loop` backend).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTimer;

impl CompareTimer for NoTimer {
    fn start(&mut self, _compare: u16) {}
    fn stop(&mut self) {}
}

/// A do-nothing [`EdgeDetector`] counterpart to [`NoTimer`]; the line is
/// polled instead (see `CardDriver::poll_start_edge`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEdge;

impl EdgeDetector for NoEdge {
    fn enable(&mut self) {}
    fn disable(&mut self) {}
}

/// Compare value for the bit clock: one ETU in prescaled ticks, rounded
/// to nearest.
pub fn compute_etu_compare(config: &CardConfig) -> u16 {
    round(config.etu.etu_cycles() as f64 / config.prescaler as f64) as u16
}

/// Compile-time version of [`compute_etu_compare`].
pub const fn const_etu_compare(etu_cycles: u16, prescaler: u16) -> u16 {
    (etu_cycles + prescaler / 2) / prescaler
}

/// Compare value for the sample clock's first shot: 1.5 ETU past the
/// start edge plus [`START_BIT_SLACK_CYCLES`], in prescaled ticks.
pub fn compute_first_sample_compare(config: &CardConfig) -> u16 {
    let cycles = config.etu.etu_cycles() as i32 * 3 / 2 + START_BIT_SLACK_CYCLES;
    round(cycles as f64 / config.prescaler as f64) as u16
}

/// Compile-time version of [`compute_first_sample_compare`].
pub const fn const_first_sample_compare(etu_cycles: u16, prescaler: u16) -> u16 {
    let cycles = etu_cycles as i32 * 3 / 2 + START_BIT_SLACK_CYCLES;
    ((cycles + prescaler as i32 / 2) / prescaler as i32) as u16
}
