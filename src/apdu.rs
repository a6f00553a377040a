//! Command APDU headers.
//!
//! Every terminal command arrives as the five-byte header of ISO 7816-4:
//! class, instruction and three parameters. This card never interprets CLA
//! or INS; the session script is positional. The header is still parsed
//! into a struct so the firmware above (and the tests) can see what the
//! terminal asked for.

use crate::consts::APDU_HEADER_LEN;

/// A received five-byte command header.
///
/// ```
/// use t0card::apdu::ApduHeader;
///
/// let header = ApduHeader::from_bytes(&[0x00, 0xA4, 0x00, 0x00, 0x10]);
/// assert_eq!(header.ins, 0xA4);
/// assert_eq!(header.data_length(), 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct ApduHeader {
    /// Instruction class.
    pub cla: u8,
    /// Instruction code.
    pub ins: u8,
    /// First parameter.
    pub p1: u8,
    /// Second parameter.
    pub p2: u8,
    /// Third parameter, the data length for both commands this card
    /// understands.
    pub p3: u8,
}

impl ApduHeader {
    /// Builds a header from the five bytes in wire order.
    pub fn from_bytes(bytes: &[u8; APDU_HEADER_LEN]) -> Self {
        Self {
            cla: bytes[0],
            ins: bytes[1],
            p1: bytes[2],
            p2: bytes[3],
            p3: bytes[4],
        }
    }

    /// The data length announced in P3.
    pub fn data_length(&self) -> u8 {
        self.p3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_order() {
        let h = ApduHeader::from_bytes(&[0x00, 0xC0, 0x01, 0x02, 0x10]);
        assert_eq!(
            h,
            ApduHeader {
                cla: 0x00,
                ins: 0xC0,
                p1: 0x01,
                p2: 0x02,
                p3: 0x10,
            }
        );
        assert_eq!(h.data_length(), 0x10);
    }
}
