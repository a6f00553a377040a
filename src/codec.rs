//! Per-character framing for the T=0 transport.
//!
//! An ISO 7816-3 T=0 character on the wire is a start bit (low, one ETU),
//! eight data bits LSB first, an even-parity bit, and at least two ETU of
//! idle-high guard. This module holds the two pure state machines behind
//! that framing:
//!
//! - [`TxCharacter`] yields one line level per ETU tick, so the timer ISR
//!   can latch the level and nothing else.
//! - [`RxCharacter`] consumes one line sample per sample tick and produces
//!   the byte together with a parity verdict.
//!
//! Neither type touches a pin or a timer. The [`driver`](crate::driver)
//! wires them to the hardware, which keeps every timing-critical decision
//! here testable on the host.

use crate::consts::GUARD_TICKS;
use thiserror::Error;

/// Transport-level receive errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum CodecError {
    /// The received character failed its even-parity check. The byte is
    /// carried along because the session consumes it anyway; T=0's
    /// NACK-and-retransmit is deliberately not implemented.
    #[error("Parity check failed on received character {byte:#04x}")]
    Parity {
        /// The data bits as sampled, parity notwithstanding.
        byte: u8,
    },
}

/// Even-parity bit for a byte: true when the data bits hold an odd number
/// of ones, so that data plus parity always has an even count.
///
/// ```
/// use t0card::codec::parity_bit;
///
/// assert!(parity_bit(0x3B));  // five ones
/// assert!(!parity_bit(0x90)); // two ones
/// ```
pub fn parity_bit(byte: u8) -> bool {
    byte.count_ones() % 2 == 1
}

/// One level to put on the line, or the end of the character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStep {
    /// Drive this level for the current ETU.
    Level(bool),
    /// Character and guard complete; the line was left idle-high.
    Done,
}

/// Transmit-side character state machine.
///
/// Call [`next`](TxCharacter::next) once per ETU tick and drive the
/// returned level. The emitted sequence is: optional leading idle ETUs,
/// start bit, data bits 0..7, parity bit, [`GUARD_TICKS`] of idle-high.
///
/// The lead exists for the first character after a direction flip, so the
/// line is observably idle-high for a full ETU before the start bit falls.
///
/// ```
/// use t0card::codec::{TxCharacter, TxStep};
///
/// let mut ch = TxCharacter::new(0x3B);
/// let mut levels = Vec::new();
/// while let TxStep::Level(high) = ch.next() {
///     levels.push(high as u8);
/// }
/// // start, LSB-first data, parity, four guard ticks
/// assert_eq!(levels, [0, 1, 1, 0, 1, 1, 1, 0, 0, 1, 1, 1, 1, 1]);
/// ```
#[derive(Debug, Clone)]
pub struct TxCharacter {
    byte: u8,
    lead: u8,
    index: u8,
}

impl TxCharacter {
    /// A character with no leading idle, for use inside a running stream.
    pub fn new(byte: u8) -> Self {
        Self::with_lead(byte, 0)
    }

    /// A character preceded by `lead` idle-high ETUs.
    pub fn with_lead(byte: u8, lead: u8) -> Self {
        Self {
            byte,
            lead,
            index: 0,
        }
    }

    /// Advances by one ETU and reports the level for it.
    pub fn next(&mut self) -> TxStep {
        let i = self.index;
        self.index = self.index.saturating_add(1);
        if i < self.lead {
            TxStep::Level(true)
        } else if i == self.lead {
            TxStep::Level(false)
        } else if i <= self.lead + 8 {
            let bit = i - self.lead - 1;
            TxStep::Level(self.byte & (1 << bit) != 0)
        } else if i == self.lead + 9 {
            TxStep::Level(parity_bit(self.byte))
        } else if i < self.lead + 10 + GUARD_TICKS {
            TxStep::Level(true)
        } else {
            TxStep::Done
        }
    }
}

/// Receive-side character state machine.
///
/// The start bit is consumed by edge detection before this machine runs;
/// it is fed the nine mid-bit samples that follow (data bits 0..7, then
/// parity). [`sample`](RxCharacter::sample) follows the `nb` convention:
/// `WouldBlock` until the parity sample lands, then the byte or a
/// [`CodecError::Parity`] carrying it.
#[derive(Debug, Clone, Default)]
pub struct RxCharacter {
    byte: u8,
    bits: u8,
    ones: u8,
}

impl RxCharacter {
    /// Fresh state for the character after a detected start edge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples consumed so far. The driver reprograms the sample
    /// timer from the start-bit period to the one-ETU period after the
    /// first sample.
    pub fn samples_taken(&self) -> u8 {
        self.bits
    }

    /// Feeds one line sample, LSB first.
    pub fn sample(&mut self, high: bool) -> nb::Result<u8, CodecError> {
        if self.bits < 8 {
            if high {
                self.byte |= 1 << self.bits;
                self.ones += 1;
            }
            self.bits += 1;
            Err(nb::Error::WouldBlock)
        } else {
            let total = self.ones + high as u8;
            if total % 2 == 0 {
                Ok(self.byte)
            } else {
                Err(nb::Error::Other(CodecError::Parity { byte: self.byte }))
            }
        }
    }
}
