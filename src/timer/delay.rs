//! Blocking scheduler over `DelayNs`, for targets without spare timer
//! interrupts.
//!
//! Instead of compare-match ISRs, this backend busy-waits between ticks
//! with an `embedded_hal::delay::DelayNs` provider and polls the line for
//! the start-bit edge. Timing granularity is whatever the delay provider
//! gives; on most HALs that is good enough for the 372-cycle ETU at card
//! clock rates, but the interrupt backend is the reference integration.
//!
//! ```rust,ignore
//! let timing = DelayTiming::from_clock(&config, CLK_HZ);
//! delay.delay_us(timing.atr_wait_us);
//! driver.answer_to_reset();
//! loop {
//!     run_card_step(&mut driver, &mut delay, &timing);
//! }
//! ```

use crate::driver::{CardDriver, CardMode};
use crate::timer::{CardConfig, CompareTimer, EdgeDetector, START_BIT_SLACK_CYCLES};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use libm::round;
use rand_core::RngCore;

/// Wall-clock intervals for one card at one clock rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayTiming {
    /// One ETU.
    pub etu_us: u32,
    /// Start-bit edge to the middle of data bit 0.
    pub first_sample_us: u32,
    /// Reset release to the ATR.
    pub atr_wait_us: u32,
}

impl DelayTiming {
    /// Converts the cycle-domain configuration into microseconds at the
    /// given card clock frequency.
    pub fn from_clock(config: &CardConfig, clk_hz: u32) -> Self {
        let us_per_cycle = 1_000_000.0 / clk_hz as f64;
        let etu_cycles = config.etu.etu_cycles() as f64;
        let first_cycles = etu_cycles * 1.5 + START_BIT_SLACK_CYCLES as f64;
        Self {
            etu_us: round(etu_cycles * us_per_cycle) as u32,
            first_sample_us: round(first_cycles * us_per_cycle) as u32,
            atr_wait_us: round(crate::consts::ATR_WAIT_CYCLES as f64 * us_per_cycle) as u32,
        }
    }
}

/// One scheduling step: services whatever the driver is doing, waits the
/// appropriate interval, then polls the session. Call from an endless
/// loop.
pub fn run_card_step<D, IO, TRG, BCLK, SCLK, EDGE, RNG>(
    driver: &mut CardDriver<IO, TRG, BCLK, SCLK, EDGE, RNG>,
    delay: &mut D,
    timing: &DelayTiming,
) where
    D: DelayNs,
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    match driver.mode() {
        CardMode::Tx => {
            driver.etu_tick();
            delay.delay_us(timing.etu_us);
        }
        CardMode::RxAwaitStart => {
            if driver.poll_start_edge() {
                delay.delay_us(timing.first_sample_us);
                driver.sample_tick();
            }
        }
        CardMode::RxSampling => {
            delay.delay_us(timing.etu_us);
            driver.sample_tick();
        }
        CardMode::Idle => {}
    }
    driver.poll();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{NoEdge, NoTimer};
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use rand_core::SeedableRng;

    #[test]
    fn timing_at_the_reference_clock() {
        // The original hardware ran the card clock at 3.27 MHz.
        let timing = DelayTiming::from_clock(&CardConfig::default(), 3_270_000);
        assert_eq!(timing.etu_us, 114); // 372 cycles
        assert_eq!(timing.first_sample_us, 156); // 510 cycles
        assert_eq!(timing.atr_wait_us, 306); // 1000 cycles
    }

    #[test]
    fn step_emits_the_atr_start_bit() {
        let io = PinMock::new(&[
            PinTransaction::set(PinState::High), // release in new()
            PinTransaction::set(PinState::High), // reclaim for ATR
            PinTransaction::set(PinState::High), // lead ETU
            PinTransaction::set(PinState::Low),  // start bit
        ]);
        let mut driver: CardDriver<PinMock, PinMock, NoTimer, NoTimer, NoEdge, _> =
            CardDriver::new(
                io,
                None,
                NoTimer,
                NoTimer,
                NoEdge,
                rand_chacha::ChaCha8Rng::seed_from_u64(2),
                &[0u8; 16],
                CardConfig::default(),
            );
        let mut delay = NoopDelay::new();
        let timing = DelayTiming::from_clock(&CardConfig::default(), 3_270_000);

        driver.answer_to_reset();
        run_card_step(&mut driver, &mut delay, &timing); // lead
        run_card_step(&mut driver, &mut delay, &timing); // start bit
        assert_eq!(driver.mode(), CardMode::Tx);

        let (mut io, _) = driver.release_for_test();
        io.done();
    }
}
