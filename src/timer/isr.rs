//! `critical_section` glue for interrupt-driven integrations.
//!
//! The firmware's three ISRs (bit-clock compare, sample-clock compare and
//! pin change on the I/O contact) and its main loop all need the one
//! [`CardDriver`]. The driver therefore lives in a
//! `critical_section::Mutex<RefCell<Option<..>>>` static, and the helpers
//! here wrap each access in `critical_section::with`, so an ISR entry
//! point can never observe the driver mid-update by the main task.
//!
//! The matching macros in the crate root
//! ([`init_card_driver!`](crate::init_card_driver),
//! [`setup_card_driver!`](crate::setup_card_driver) and friends) expand to
//! these helpers for firmware that prefers the macro spelling.

use crate::driver::CardDriver;
use crate::timer::{CompareTimer, EdgeDetector};
use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal::digital::{InputPin, OutputPin};
use rand_core::RngCore;

/// The shared-driver cell every helper here operates on.
pub type GlobalCard<IO, TRG, BCLK, SCLK, EDGE, RNG> =
    Mutex<RefCell<Option<CardDriver<IO, TRG, BCLK, SCLK, EDGE, RNG>>>>;

/// Initializer for the global static driver cell.
///
/// ```rust,ignore
/// static CARD: GlobalCard<Io, Trg, Bclk, Sclk, Edge, Rng> =
///     global_card_init::<Io, Trg, Bclk, Sclk, Edge, Rng>();
/// ```
pub const fn global_card_init<IO, TRG, BCLK, SCLK, EDGE, RNG>()
-> GlobalCard<IO, TRG, BCLK, SCLK, EDGE, RNG>
where
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    Mutex::new(RefCell::new(None))
}

/// Constructs the driver and stores it in the global cell. Call once from
/// `main` before enabling interrupts.
#[allow(clippy::too_many_arguments)]
pub fn global_card_setup<IO, TRG, BCLK, SCLK, EDGE, RNG>(
    global: &'static GlobalCard<IO, TRG, BCLK, SCLK, EDGE, RNG>,
    io: IO,
    trigger: Option<TRG>,
    bit_clock: BCLK,
    sample_clock: SCLK,
    edge: EDGE,
    rng: RNG,
    key: &[u8; 16],
    config: crate::timer::CardConfig,
) where
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    critical_section::with(|cs| {
        let _ = global.borrow(cs).replace(Some(CardDriver::new(
            io,
            trigger,
            bit_clock,
            sample_clock,
            edge,
            rng,
            key,
            config,
        )));
    });
}

/// Body for the bit-clock compare ISR: latches the next transmit level
/// onto the I/O line. Safe to call when no driver is installed or nothing
/// is being transmitted; it does nothing then.
pub fn global_card_etu_tick<IO, TRG, BCLK, SCLK, EDGE, RNG>(
    global: &'static GlobalCard<IO, TRG, BCLK, SCLK, EDGE, RNG>,
) where
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    critical_section::with(|cs| {
        if let Some(driver) = global.borrow(cs).borrow_mut().as_mut() {
            driver.etu_tick();
        }
    });
}

/// Body for the sample-clock compare ISR: reads one bit of the incoming
/// character.
pub fn global_card_sample_tick<IO, TRG, BCLK, SCLK, EDGE, RNG>(
    global: &'static GlobalCard<IO, TRG, BCLK, SCLK, EDGE, RNG>,
) where
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    critical_section::with(|cs| {
        if let Some(driver) = global.borrow(cs).borrow_mut().as_mut() {
            driver.sample_tick();
        }
    });
}

/// Body for the pin-change ISR on the I/O contact: catches the falling
/// start-bit edge and arms the sample clock.
pub fn global_card_io_edge<IO, TRG, BCLK, SCLK, EDGE, RNG>(
    global: &'static GlobalCard<IO, TRG, BCLK, SCLK, EDGE, RNG>,
) where
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    critical_section::with(|cs| {
        if let Some(driver) = global.borrow(cs).borrow_mut().as_mut() {
            driver.io_edge();
        }
    });
}

/// Main-loop step: consumes ISR completion flags and advances the session
/// script. Call from the firmware's endless loop.
pub fn global_card_poll<IO, TRG, BCLK, SCLK, EDGE, RNG>(
    global: &'static GlobalCard<IO, TRG, BCLK, SCLK, EDGE, RNG>,
) where
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    critical_section::with(|cs| {
        if let Some(driver) = global.borrow(cs).borrow_mut().as_mut() {
            driver.poll();
        }
    });
}

/// Starts the session with the ATR. Call once the post-reset wait window
/// (400 to 40000 card-clock cycles) has elapsed.
pub fn global_card_answer_to_reset<IO, TRG, BCLK, SCLK, EDGE, RNG>(
    global: &'static GlobalCard<IO, TRG, BCLK, SCLK, EDGE, RNG>,
) where
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    critical_section::with(|cs| {
        if let Some(driver) = global.borrow(cs).borrow_mut().as_mut() {
            driver.answer_to_reset();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::CardMode;
    use crate::timer::{CardConfig, NoEdge, NoTimer};
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use rand_core::SeedableRng;

    type TestCard = GlobalCard<PinMock, PinMock, NoTimer, NoTimer, NoEdge, rand_chacha::ChaCha8Rng>;

    #[test]
    fn global_setup_and_tick() {
        static CARD: TestCard = global_card_init::<
            PinMock,
            PinMock,
            NoTimer,
            NoTimer,
            NoEdge,
            rand_chacha::ChaCha8Rng,
        >();

        let io = PinMock::new(&[PinTransaction::set(PinState::High)]);
        global_card_setup(
            &CARD,
            io,
            None,
            NoTimer,
            NoTimer,
            NoEdge,
            rand_chacha::ChaCha8Rng::seed_from_u64(1),
            &[0u8; 16],
            CardConfig::default(),
        );

        critical_section::with(|cs| {
            assert!(CARD.borrow(cs).borrow().is_some());
        });

        // Idle ticks and polls are no-ops on a quiet card.
        global_card_etu_tick(&CARD);
        global_card_sample_tick(&CARD);
        global_card_io_edge(&CARD);
        global_card_poll(&CARD);

        critical_section::with(|cs| {
            let mut guard = CARD.borrow(cs).borrow_mut();
            let driver = guard.take().unwrap();
            assert_eq!(driver.mode(), CardMode::Idle);
            let (mut io, _) = driver.release_for_test();
            io.done();
        });
    }
}
