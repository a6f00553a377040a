//! The fixed T=0 conversation.
//!
//! The card speaks exactly one dialogue, forever:
//!
//! 1. ATR (`3B 90 11 00`).
//! 2. Five command bytes from the terminal (the key-upload command).
//! 3. Sixteen times: send the `0xEF` handshake, receive one key byte.
//! 4. Status `61 10`.
//! 5. Five command bytes from the terminal (the decryption command).
//! 6. Procedure byte `C0`.
//! 7. Decrypt the uploaded block.
//! 8. The sixteen result bytes.
//! 9. Status `90 00`, then back to 2.
//!
//! CLA and INS are stored but never interpreted; the semantics live in the
//! positions of the script. The machine here is pure: it consumes
//! [`SessionInput`]s and emits [`SessionAction`]s, and the
//! [`driver`](crate::driver) translates actions into direction flips,
//! characters and the decryption call. That split is what makes scenario
//! tests of the whole conversation possible without any I/O.

use crate::apdu::ApduHeader;
use crate::consts::{
    APDU_HEADER_LEN, ATR_SEQUENCE, BLOCK_LEN, KEY_HANDSHAKE, PROCEDURE_BYTE, STATUS_MORE_DATA,
    STATUS_OK,
};
use heapless::Vec;

/// Which of the two command headers is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum CommandSlot {
    /// The key-upload command, first in the script.
    KeyUpload,
    /// The decryption command, second in the script.
    Decrypt,
}

/// Where the script currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Phase {
    /// Sending ATR byte `index`.
    Atr {
        /// Position in [`ATR_SEQUENCE`].
        index: u8,
    },
    /// Collecting the five header bytes of a command.
    Command {
        /// Which command the bytes belong to.
        slot: CommandSlot,
        /// Bytes received so far.
        index: u8,
    },
    /// Sending the `0xEF` handshake ahead of key byte `index`.
    KeyHandshake {
        /// Key byte the handshake announces.
        index: u8,
    },
    /// Waiting for key byte `index` from the terminal.
    KeyByte {
        /// Position in the key buffer.
        index: u8,
    },
    /// Sending `61 10`.
    StatusMoreData {
        /// Which of the two status bytes.
        index: u8,
    },
    /// Sending the `C0` procedure byte.
    ProcedureByte,
    /// The driver is running the masked inverse cipher.
    Decrypting,
    /// Sending result byte `index`.
    Response {
        /// Position in the response block.
        index: u8,
    },
    /// Sending `90 00`.
    StatusOk {
        /// Which of the two status bytes.
        index: u8,
    },
}

/// What just happened on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    /// The queued character, guard included, left the card.
    CharacterSent,
    /// A character arrived. Parity failures are handled below the session;
    /// the byte is consumed either way.
    CharacterReceived(u8),
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Queue this byte for transmission, flipping the line to output
    /// first if the terminal had it.
    Transmit(u8),
    /// Release the line and wait for a character from the terminal.
    Receive,
    /// Run the inverse cipher over the uploaded block, then feed the
    /// result back through [`Session::load_response`].
    Decrypt,
}

/// The script state machine.
#[derive(Debug)]
pub struct Session {
    phase: Phase,
    command: Vec<u8, APDU_HEADER_LEN>,
    key_buf: Vec<u8, BLOCK_LEN>,
    key_command: Option<ApduHeader>,
    decrypt_command: Option<ApduHeader>,
    response: [u8; BLOCK_LEN],
}

impl Session {
    /// A session at the top of the script.
    pub fn new() -> Self {
        Self {
            phase: Phase::Atr { index: 0 },
            command: Vec::new(),
            key_buf: Vec::new(),
            key_command: None,
            decrypt_command: None,
            response: [0; BLOCK_LEN],
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The key-upload command header, once it has arrived.
    pub fn key_command(&self) -> Option<ApduHeader> {
        self.key_command
    }

    /// The decryption command header, once it has arrived.
    pub fn decrypt_command(&self) -> Option<ApduHeader> {
        self.decrypt_command
    }

    /// The key bytes collected so far.
    pub fn key_buffer(&self) -> &[u8] {
        &self.key_buf
    }

    /// (Re)starts the script at the ATR.
    pub fn start_atr(&mut self) -> SessionAction {
        self.reset_buffers();
        self.phase = Phase::Atr { index: 0 };
        SessionAction::Transmit(ATR_SEQUENCE[0])
    }

    /// Stores the decryption result and moves to the response phase.
    pub fn load_response(&mut self, block: [u8; BLOCK_LEN]) -> SessionAction {
        self.response = block;
        self.phase = Phase::Response { index: 0 };
        SessionAction::Transmit(self.response[0])
    }

    /// Advances the script by one wire event.
    pub fn advance(&mut self, input: SessionInput) -> SessionAction {
        match (self.phase, input) {
            (Phase::Atr { index }, SessionInput::CharacterSent) => {
                if (index as usize) + 1 < ATR_SEQUENCE.len() {
                    self.phase = Phase::Atr { index: index + 1 };
                    SessionAction::Transmit(ATR_SEQUENCE[index as usize + 1])
                } else {
                    self.begin_command(CommandSlot::KeyUpload)
                }
            }
            (Phase::Command { slot, index }, SessionInput::CharacterReceived(byte)) => {
                let _ = self.command.push(byte);
                if (index as usize) + 1 < APDU_HEADER_LEN {
                    self.phase = Phase::Command {
                        slot,
                        index: index + 1,
                    };
                    SessionAction::Receive
                } else {
                    let mut header = [0u8; APDU_HEADER_LEN];
                    header.copy_from_slice(&self.command);
                    let header = ApduHeader::from_bytes(&header);
                    match slot {
                        CommandSlot::KeyUpload => {
                            self.key_command = Some(header);
                            self.phase = Phase::KeyHandshake { index: 0 };
                            SessionAction::Transmit(KEY_HANDSHAKE)
                        }
                        CommandSlot::Decrypt => {
                            self.decrypt_command = Some(header);
                            self.phase = Phase::ProcedureByte;
                            SessionAction::Transmit(PROCEDURE_BYTE)
                        }
                    }
                }
            }
            (Phase::KeyHandshake { index }, SessionInput::CharacterSent) => {
                self.phase = Phase::KeyByte { index };
                SessionAction::Receive
            }
            (Phase::KeyByte { index }, SessionInput::CharacterReceived(byte)) => {
                let _ = self.key_buf.push(byte);
                if (index as usize) + 1 < BLOCK_LEN {
                    self.phase = Phase::KeyHandshake { index: index + 1 };
                    SessionAction::Transmit(KEY_HANDSHAKE)
                } else {
                    self.phase = Phase::StatusMoreData { index: 0 };
                    SessionAction::Transmit(STATUS_MORE_DATA[0])
                }
            }
            (Phase::StatusMoreData { index: 0 }, SessionInput::CharacterSent) => {
                self.phase = Phase::StatusMoreData { index: 1 };
                SessionAction::Transmit(STATUS_MORE_DATA[1])
            }
            (Phase::StatusMoreData { index: _ }, SessionInput::CharacterSent) => {
                self.begin_command(CommandSlot::Decrypt)
            }
            (Phase::ProcedureByte, SessionInput::CharacterSent) => {
                self.phase = Phase::Decrypting;
                SessionAction::Decrypt
            }
            (Phase::Response { index }, SessionInput::CharacterSent) => {
                if (index as usize) + 1 < BLOCK_LEN {
                    self.phase = Phase::Response { index: index + 1 };
                    SessionAction::Transmit(self.response[index as usize + 1])
                } else {
                    self.phase = Phase::StatusOk { index: 0 };
                    SessionAction::Transmit(STATUS_OK[0])
                }
            }
            (Phase::StatusOk { index: 0 }, SessionInput::CharacterSent) => {
                self.phase = Phase::StatusOk { index: 1 };
                SessionAction::Transmit(STATUS_OK[1])
            }
            (Phase::StatusOk { index: _ }, SessionInput::CharacterSent) => {
                // Wrap: the card is back in the state it had right after
                // the ATR, so the next run is byte-identical.
                self.reset_buffers();
                self.begin_command(CommandSlot::KeyUpload)
            }
            // The terminal is out of step. The card has no error channel
            // on the ISO interface, so stay put and keep listening or
            // sending whatever the phase already wanted.
            (_, _) => self.repeat_current(),
        }
    }

    fn begin_command(&mut self, slot: CommandSlot) -> SessionAction {
        self.command.clear();
        self.phase = Phase::Command { slot, index: 0 };
        SessionAction::Receive
    }

    fn reset_buffers(&mut self) {
        self.command.clear();
        self.key_buf.clear();
        self.key_command = None;
        self.decrypt_command = None;
        self.response = [0; BLOCK_LEN];
    }

    fn repeat_current(&self) -> SessionAction {
        match self.phase {
            Phase::Atr { index } => SessionAction::Transmit(ATR_SEQUENCE[index as usize]),
            Phase::Command { .. } | Phase::KeyByte { .. } => SessionAction::Receive,
            Phase::KeyHandshake { .. } => SessionAction::Transmit(KEY_HANDSHAKE),
            Phase::StatusMoreData { index } => {
                SessionAction::Transmit(STATUS_MORE_DATA[index as usize])
            }
            Phase::ProcedureByte => SessionAction::Transmit(PROCEDURE_BYTE),
            Phase::Decrypting => SessionAction::Decrypt,
            Phase::Response { index } => SessionAction::Transmit(self.response[index as usize]),
            Phase::StatusOk { index } => SessionAction::Transmit(STATUS_OK[index as usize]),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
