//! The card driver: hardware glue around the codec, session and cipher.
//!
//! [`CardDriver`] owns the I/O contact, the two compare timers, the
//! pin-change source and the entropy source, and exposes the three
//! interrupt entry points of the firmware:
//!
//! - [`etu_tick`](CardDriver::etu_tick) from the bit-clock compare ISR,
//!   which latches the next transmit level onto the line;
//! - [`io_edge`](CardDriver::io_edge) from the pin-change ISR, which
//!   catches the falling start-bit edge and arms the sample clock;
//! - [`sample_tick`](CardDriver::sample_tick) from the sample-clock
//!   compare ISR, which reads one bit of the incoming character.
//!
//! The main task calls [`poll`](CardDriver::poll), which consumes the
//! completion flags the ISRs set and advances the session script: loading
//! the next character, flipping line direction between characters, and
//! running the masked decryption when the script reaches it.
//!
//! Each completion flag is written by exactly one ISR and read by the one
//! main task, so no locking is needed beyond the `critical_section`
//! wrapper the `timer-isr` glue puts around the whole driver.
//!
//! There are no timeouts. A terminal that stops mid-script wedges the
//! card until hardware reset, which is acceptable for a passive
//! peripheral.

use crate::aes::MaskedAes;
use crate::apdu::ApduHeader;
use crate::codec::{CodecError, RxCharacter, TxCharacter, TxStep};
use crate::consts::BLOCK_LEN;
use crate::fmt::{diag_debug, diag_warn};
use crate::line::{InputLine, LineIo};
use crate::session::{Phase, Session, SessionAction, SessionInput};
use crate::timer::{
    CardConfig, CompareTimer, EdgeDetector, compute_etu_compare, compute_first_sample_compare,
};
use embedded_hal::digital::{InputPin, OutputPin};
use rand_core::RngCore;

/// What the I/O machinery is doing right now.
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum CardMode {
    /// Between characters; no timer wants service.
    #[default]
    Idle,
    /// A character is leaving on bit-clock ticks.
    Tx,
    /// The line is released and the edge detector waits for a start bit.
    RxAwaitStart,
    /// A start bit was seen; the sample clock is collecting bits.
    RxSampling,
}

/// The complete card firmware core.
///
/// Type parameters:
/// - `IO`: the bidirectional I/O contact, open-drain with external
///   pull-up, readable and drivable.
/// - `TRG`: an optional scope-trigger output raised around the
///   decryption, for power-analysis bench work.
/// - `BCLK`, `SCLK`: the bit clock and the sample clock.
/// - `EDGE`: the pin-change source watching `IO`.
/// - `RNG`: the entropy source feeding masks and shuffles. The quality of
///   the masking is the quality of this generator; production cards want
///   a hardware TRNG here, not a seeded PRNG.
#[derive(Debug)]
pub struct CardDriver<IO, TRG, BCLK, SCLK, EDGE, RNG>
where
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    line: Option<LineIo<IO>>,
    trigger: Option<TRG>,
    bit_clock: BCLK,
    sample_clock: SCLK,
    edge: EDGE,
    rng: RNG,
    aes: MaskedAes,
    session: Session,
    mode: CardMode,
    tx: Option<TxCharacter>,
    rx: Option<RxCharacter>,
    tx_done: bool,
    rx_done: Option<Result<u8, CodecError>>,
    etu_compare: u16,
    first_sample_compare: u16,

    /// Characters transmitted since power-up, guard included.
    pub characters_sent: u16,

    /// Received characters whose parity check failed. The bytes were
    /// consumed anyway; this is the diagnostic tally.
    pub parity_errors: u16,
}

impl<IO, TRG, BCLK, SCLK, EDGE, RNG> CardDriver<IO, TRG, BCLK, SCLK, EDGE, RNG>
where
    IO: InputPin + OutputPin,
    TRG: OutputPin,
    BCLK: CompareTimer,
    SCLK: CompareTimer,
    EDGE: EdgeDetector,
    RNG: RngCore,
{
    /// Builds the driver around its hardware resources and the
    /// provisioned 128-bit key, which is expanded to round keys here,
    /// once.
    ///
    /// The line starts released (input);
    /// [`answer_to_reset`](CardDriver::answer_to_reset) claims it.
    pub fn new(
        io: IO,
        trigger: Option<TRG>,
        bit_clock: BCLK,
        sample_clock: SCLK,
        edge: EDGE,
        rng: RNG,
        key: &[u8; 16],
        config: CardConfig,
    ) -> Self {
        Self {
            line: Some(LineIo::Rx(InputLine::new(io))),
            trigger,
            bit_clock,
            sample_clock,
            edge,
            rng,
            aes: MaskedAes::new(key),
            session: Session::new(),
            mode: CardMode::Idle,
            tx: None,
            rx: None,
            tx_done: false,
            rx_done: None,
            etu_compare: compute_etu_compare(&config),
            first_sample_compare: compute_first_sample_compare(&config),
            characters_sent: 0,
            parity_errors: 0,
        }
    }

    /// Current I/O activity, for schedulers and tests.
    pub fn mode(&self) -> CardMode {
        self.mode
    }

    /// Current position in the session script.
    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    /// The key-upload command header, once received.
    pub fn key_command(&self) -> Option<ApduHeader> {
        self.session.key_command()
    }

    /// The decryption command header, once received.
    pub fn decrypt_command(&self) -> Option<ApduHeader> {
        self.session.decrypt_command()
    }

    /// Starts the session: claims the line output-idle-high, starts the
    /// bit clock and queues the ATR.
    ///
    /// Call between 400 and 40000 card-clock cycles after reset release
    /// (see [`consts::ATR_WAIT_CYCLES`](crate::consts::ATR_WAIT_CYCLES)).
    pub fn answer_to_reset(&mut self) {
        diag_debug!("Answer-to-reset");
        let action = self.session.start_atr();
        self.dispatch(action);
    }

    /// Bit-clock compare ISR body. Writes the current character level to
    /// the line; on the tick after the guard, flags completion for
    /// [`poll`](CardDriver::poll).
    ///
    /// Runs with further interrupts disabled, like every handler here.
    pub fn etu_tick(&mut self) {
        let Some(tx) = self.tx.as_mut() else {
            return;
        };
        match tx.next() {
            TxStep::Level(high) => {
                if let Some(LineIo::Tx(out)) = self.line.as_mut() {
                    out.write(high);
                }
            }
            TxStep::Done => {
                self.tx = None;
                self.tx_done = true;
                self.characters_sent = self.characters_sent.wrapping_add(1);
            }
        }
    }

    /// Pin-change ISR body. On a falling edge while a start bit is
    /// awaited: disables the edge source against re-entry and starts the
    /// sample clock toward the middle of data bit 0.
    pub fn io_edge(&mut self) {
        if self.mode != CardMode::RxAwaitStart {
            return;
        }
        let low = match self.line.as_mut() {
            Some(LineIo::Rx(input)) => input.is_low(),
            _ => false,
        };
        if low {
            self.begin_sampling();
        }
    }

    /// Polled replacement for [`io_edge`](CardDriver::io_edge), for
    /// integrations without a pin-change interrupt (the `delay-loop`
    /// backend). Returns true when the start bit was just caught.
    pub fn poll_start_edge(&mut self) -> bool {
        if self.mode != CardMode::RxAwaitStart {
            return false;
        }
        let low = match self.line.as_mut() {
            Some(LineIo::Rx(input)) => input.is_low(),
            _ => false,
        };
        if low {
            self.begin_sampling();
        }
        low
    }

    fn begin_sampling(&mut self) {
        self.edge.disable();
        self.rx = Some(RxCharacter::new());
        self.sample_clock.start(self.first_sample_compare);
        self.mode = CardMode::RxSampling;
    }

    /// Sample-clock compare ISR body. Reads one bit; after the first data
    /// bit, drops the sample period from the start-bit window to one ETU;
    /// after the parity bit, stops the clock and flags the byte for
    /// [`poll`](CardDriver::poll).
    pub fn sample_tick(&mut self) {
        if self.mode != CardMode::RxSampling {
            return;
        }
        let level = match self.line.as_mut() {
            Some(LineIo::Rx(input)) => input.level(),
            _ => true,
        };
        let Some(rx) = self.rx.as_mut() else {
            return;
        };
        let first = rx.samples_taken() == 0;
        match rx.sample(level) {
            Err(nb::Error::WouldBlock) => {
                if first {
                    self.sample_clock.start(self.etu_compare);
                }
            }
            Ok(byte) => self.finish_character(Ok(byte)),
            Err(nb::Error::Other(error)) => self.finish_character(Err(error)),
        }
    }

    fn finish_character(&mut self, result: Result<u8, CodecError>) {
        self.sample_clock.stop();
        self.rx = None;
        if let Err(CodecError::Parity { byte }) = result {
            self.parity_errors = self.parity_errors.wrapping_add(1);
            diag_warn!("Parity check failed on received character {}", byte);
        }
        self.rx_done = Some(result);
        self.mode = CardMode::Idle;
    }

    /// Main-task entry: consumes the completion flags set by the ISRs and
    /// advances the session script. Call from the firmware main loop;
    /// cheap when nothing happened.
    pub fn poll(&mut self) {
        if self.tx_done {
            self.tx_done = false;
            let action = self.session.advance(SessionInput::CharacterSent);
            self.dispatch(action);
        }
        if let Some(result) = self.rx_done.take() {
            // The byte is consumed whether or not its parity held up;
            // finish_character already logged and counted the failure.
            let byte = match result {
                Ok(byte) | Err(CodecError::Parity { byte }) => byte,
            };
            let action = self.session.advance(SessionInput::CharacterReceived(byte));
            self.dispatch(action);
        }
    }

    fn dispatch(&mut self, action: SessionAction) {
        let mut action = action;
        loop {
            match action {
                SessionAction::Transmit(byte) => {
                    self.start_transmit(byte);
                    return;
                }
                SessionAction::Receive => {
                    self.start_receive();
                    return;
                }
                SessionAction::Decrypt => {
                    let block = self.run_decrypt();
                    action = self.session.load_response(block);
                }
            }
        }
    }

    /// Queues a character. If the terminal had the line, reclaims it and
    /// prepends one idle-high ETU so the direction flip is observable.
    fn start_transmit(&mut self, byte: u8) {
        let flipped = match self.line.take() {
            Some(LineIo::Rx(input)) => {
                self.edge.disable();
                self.line = Some(LineIo::Tx(input.drive()));
                self.bit_clock.start(self.etu_compare);
                true
            }
            other => {
                self.line = other;
                false
            }
        };
        let lead = u8::from(flipped);
        self.tx = Some(TxCharacter::with_lead(byte, lead));
        self.mode = CardMode::Tx;
    }

    /// Releases the line to the terminal and arms the start-bit watch.
    fn start_receive(&mut self) {
        match self.line.take() {
            Some(LineIo::Tx(out)) => {
                self.bit_clock.stop();
                self.line = Some(LineIo::Rx(out.release()));
            }
            other => self.line = other,
        }
        self.edge.enable();
        self.mode = CardMode::RxAwaitStart;
    }

    /// Copies the uploaded block, runs the masked inverse cipher over it
    /// with the trigger output raised, and returns the plaintext.
    fn run_decrypt(&mut self) -> [u8; BLOCK_LEN] {
        let mut block = [0u8; BLOCK_LEN];
        block.copy_from_slice(self.session.key_buffer());
        diag_debug!("Decrypting uploaded block");
        if let Some(trigger) = self.trigger.as_mut() {
            let _ = trigger.set_high();
        }
        self.aes.decrypt_block(&mut self.rng, &mut block);
        if let Some(trigger) = self.trigger.as_mut() {
            let _ = trigger.set_low();
        }
        block
    }

    /// Tears the driver down and hands the pins back, so tests can check
    /// their mock expectations.
    #[cfg(test)]
    pub(crate) fn release_for_test(self) -> (IO, Option<TRG>) {
        let io = match self.line {
            Some(LineIo::Tx(out)) => out.into_pin(),
            Some(LineIo::Rx(input)) => input.into_pin(),
            None => unreachable!("the driver always holds the line"),
        };
        (io, self.trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ATR_SEQUENCE;
    use crate::session::CommandSlot;
    use crate::timer::{NoEdge, NoTimer};
    use core::cell::Cell;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use rand_core::SeedableRng;

    #[derive(Debug, Default)]
    struct SpyTimer {
        compare: Cell<u16>,
        running: Cell<bool>,
        starts: Cell<u16>,
    }

    impl CompareTimer for &SpyTimer {
        fn start(&mut self, compare: u16) {
            self.compare.set(compare);
            self.running.set(true);
            self.starts.set(self.starts.get() + 1);
        }
        fn stop(&mut self) {
            self.running.set(false);
        }
    }

    #[derive(Debug, Default)]
    struct SpyEdge {
        armed: Cell<bool>,
    }

    impl EdgeDetector for &SpyEdge {
        fn enable(&mut self) {
            self.armed.set(true);
        }
        fn disable(&mut self) {
            self.armed.set(false);
        }
    }

    fn test_rng() -> rand_chacha::ChaCha8Rng {
        rand_chacha::ChaCha8Rng::seed_from_u64(99)
    }

    /// The first ATR character, pin transaction by pin transaction.
    #[test]
    fn atr_first_character_levels() {
        // new(): release high. answer_to_reset(): drive high, then per
        // tick: lead high, start low, 0x3B LSB-first, parity high, four
        // guard highs.
        let mut expected = vec![
            PinTransaction::set(PinState::High), // release in new()
            PinTransaction::set(PinState::High), // reclaim for ATR
            PinTransaction::set(PinState::High), // lead ETU
            PinTransaction::set(PinState::Low),  // start bit
        ];
        for i in 0..8 {
            let state = if 0x3B & (1 << i) != 0 {
                PinState::High
            } else {
                PinState::Low
            };
            expected.push(PinTransaction::set(state));
        }
        expected.push(PinTransaction::set(PinState::High)); // parity of 0x3B
        for _ in 0..4 {
            expected.push(PinTransaction::set(PinState::High)); // guard
        }

        let io = PinMock::new(&expected);
        let bit_clock = SpyTimer::default();
        let sample_clock = SpyTimer::default();
        let edge = SpyEdge::default();
        let mut driver: CardDriver<PinMock, PinMock, _, _, _, _> = CardDriver::new(
            io,
            None,
            &bit_clock,
            &sample_clock,
            &edge,
            test_rng(),
            &[0u8; 16],
            CardConfig::default(),
        );

        driver.answer_to_reset();
        assert_eq!(driver.mode(), CardMode::Tx);
        assert!(bit_clock.running.get());
        assert_eq!(bit_clock.compare.get(), 93);

        for _ in 0..15 {
            driver.etu_tick();
        }
        assert_eq!(driver.characters_sent, 0, "still inside the character");
        driver.etu_tick();
        assert_eq!(driver.characters_sent, 1);

        let (io, _) = driver.release_for_test();
        let mut io = io;
        io.done();
    }

    /// After the ATR the driver hands the line to the terminal.
    #[test]
    fn atr_flips_to_receive() {
        let mut transactions = vec![PinTransaction::set(PinState::High)];
        transactions.push(PinTransaction::set(PinState::High)); // reclaim
        // 4 characters: lead + 14 levels for the first, 14 each after.
        for (i, &byte) in ATR_SEQUENCE.iter().enumerate() {
            if i == 0 {
                transactions.push(PinTransaction::set(PinState::High));
            }
            transactions.push(PinTransaction::set(PinState::Low));
            for bit in 0..8 {
                let state = if byte & (1 << bit) != 0 {
                    PinState::High
                } else {
                    PinState::Low
                };
                transactions.push(PinTransaction::set(state));
            }
            transactions.push(PinTransaction::set(
                if crate::codec::parity_bit(byte) {
                    PinState::High
                } else {
                    PinState::Low
                },
            ));
            for _ in 0..4 {
                transactions.push(PinTransaction::set(PinState::High));
            }
        }
        transactions.push(PinTransaction::set(PinState::High)); // release

        let io = PinMock::new(&transactions);
        let bit_clock = SpyTimer::default();
        let sample_clock = SpyTimer::default();
        let edge = SpyEdge::default();
        let mut driver: CardDriver<PinMock, PinMock, _, _, _, _> = CardDriver::new(
            io,
            None,
            &bit_clock,
            &sample_clock,
            &edge,
            test_rng(),
            &[0u8; 16],
            CardConfig::default(),
        );

        driver.answer_to_reset();
        // Crank ticks and polls until the script wants the first command.
        for _ in 0..200 {
            driver.etu_tick();
            driver.poll();
            if driver.mode() == CardMode::RxAwaitStart {
                break;
            }
        }
        assert_eq!(driver.mode(), CardMode::RxAwaitStart);
        assert_eq!(
            driver.phase(),
            Phase::Command {
                slot: CommandSlot::KeyUpload,
                index: 0
            }
        );
        assert!(!bit_clock.running.get(), "bit clock stops off the air");
        assert!(edge.armed.get(), "start-bit watch armed");
        assert_eq!(driver.characters_sent, 4);

        let (io, _) = driver.release_for_test();
        let mut io = io;
        io.done();
    }

    /// A received character flows through edge, samples and poll, and the
    /// sample clock is reprogrammed from the start window to one ETU.
    #[test]
    fn receive_character_reprograms_sample_clock() {
        let byte = 0xA4u8;
        let mut transactions = vec![
            PinTransaction::set(PinState::High), // release in new()
            PinTransaction::get(PinState::Low),  // start edge check
        ];
        for bit in 0..8 {
            transactions.push(PinTransaction::get(if byte & (1 << bit) != 0 {
                PinState::High
            } else {
                PinState::Low
            }));
        }
        transactions.push(PinTransaction::get(if crate::codec::parity_bit(byte) {
            PinState::High
        } else {
            PinState::Low
        }));

        let io = PinMock::new(&transactions);
        let bit_clock = SpyTimer::default();
        let sample_clock = SpyTimer::default();
        let edge = SpyEdge::default();
        let mut driver: CardDriver<PinMock, PinMock, _, _, _, _> = CardDriver::new(
            io,
            None,
            &bit_clock,
            &sample_clock,
            &edge,
            test_rng(),
            &[0u8; 16],
            CardConfig::default(),
        );

        // Force the receive posture without running the whole ATR.
        driver.start_receive();
        assert!(edge.armed.get());

        driver.io_edge();
        assert_eq!(driver.mode(), CardMode::RxSampling);
        assert!(!edge.armed.get(), "edge source disabled after the start bit");
        assert_eq!(sample_clock.compare.get(), 128, "start-bit window");

        driver.sample_tick();
        assert_eq!(sample_clock.compare.get(), 93, "one ETU after bit 0");
        for _ in 0..8 {
            driver.sample_tick();
        }
        assert!(!sample_clock.running.get());
        assert_eq!(sample_clock.starts.get(), 2, "start window, then one ETU");
        assert_eq!(driver.mode(), CardMode::Idle);
        assert_eq!(driver.parity_errors, 0);

        let (io, _) = driver.release_for_test();
        let mut io = io;
        io.done();
    }

    /// Parity faults are counted, the byte is still consumed.
    #[test]
    fn parity_fault_counts_and_continues() {
        let byte = 0x10u8;
        let mut transactions = vec![
            PinTransaction::set(PinState::High),
            PinTransaction::get(PinState::Low),
        ];
        for bit in 0..8 {
            transactions.push(PinTransaction::get(if byte & (1 << bit) != 0 {
                PinState::High
            } else {
                PinState::Low
            }));
        }
        // Wrong parity on purpose.
        transactions.push(PinTransaction::get(if crate::codec::parity_bit(byte) {
            PinState::Low
        } else {
            PinState::High
        }));

        let io = PinMock::new(&transactions);
        let bit_clock = SpyTimer::default();
        let sample_clock = SpyTimer::default();
        let edge = SpyEdge::default();
        let mut driver: CardDriver<PinMock, PinMock, _, _, _, _> = CardDriver::new(
            io,
            None,
            &bit_clock,
            &sample_clock,
            &edge,
            test_rng(),
            &[0u8; 16],
            CardConfig::default(),
        );

        driver.start_receive();
        driver.io_edge();
        for _ in 0..9 {
            driver.sample_tick();
        }
        assert_eq!(driver.parity_errors, 1);
        assert!(driver.rx_done.is_some(), "byte still delivered to poll");

        let (io, _) = driver.release_for_test();
        let mut io = io;
        io.done();
    }

    /// The no-op timer types satisfy the bounds for delay-loop use.
    #[test]
    fn noop_hardware_compiles_into_the_driver() {
        let io = PinMock::new(&[PinTransaction::set(PinState::High)]);
        let driver: CardDriver<PinMock, PinMock, NoTimer, NoTimer, NoEdge, _> = CardDriver::new(
            io,
            None,
            NoTimer,
            NoTimer,
            NoEdge,
            test_rng(),
            &[0u8; 16],
            CardConfig::default(),
        );
        assert_eq!(driver.mode(), CardMode::Idle);
        let (io, _) = driver.release_for_test();
        let mut io = io;
        io.done();
    }
}
