//! AES-128 key expansion.
//!
//! The provisioned 128-bit key is expanded once, at driver construction,
//! into the eleven round keys of the standard schedule. The expansion
//! itself runs unmasked; the key is no more sensitive than the state it
//! protects, and the masked pipeline derives fresh *premasked* round keys
//! from this schedule on every invocation instead.

use super::masking::MaskSet;
use super::tables::{RCON, SBOX};

/// The eleven 16-byte round keys of AES-128, `rk[0]` being the whitening
/// key and `rk[10]` the final round key of the forward cipher.
#[derive(Debug, Clone)]
pub struct RoundKeys(pub(crate) [[u8; 16]; 11]);

impl RoundKeys {
    /// Standard AES-128 key expansion.
    pub fn expand(key: &[u8; 16]) -> Self {
        let mut w = [[0u8; 4]; 44];
        for i in 0..4 {
            w[i].copy_from_slice(&key[4 * i..4 * i + 4]);
        }
        for i in 4..44 {
            let mut temp = w[i - 1];
            if i % 4 == 0 {
                temp = [
                    SBOX[temp[1] as usize] ^ RCON[i / 4 - 1],
                    SBOX[temp[2] as usize],
                    SBOX[temp[3] as usize],
                    SBOX[temp[0] as usize],
                ];
            }
            for j in 0..4 {
                w[i][j] = w[i - 4][j] ^ temp[j];
            }
        }
        let mut rk = [[0u8; 16]; 11];
        for r in 0..11 {
            for c in 0..4 {
                rk[r][4 * c..4 * c + 4].copy_from_slice(&w[4 * r + c]);
            }
        }
        Self(rk)
    }

    /// Round key `r` in state byte order.
    pub fn round(&self, r: usize) -> &[u8; 16] {
        &self.0[r]
    }

    /// Premasked round keys for one invocation of the masked pipeline.
    ///
    /// Key addition is where the pipeline changes masks, so each round key
    /// absorbs the transition for its position in the schedule:
    ///
    /// - `rk[10]` is applied right after the input remask and leaves the
    ///   uniform `m1` mask alone.
    /// - `rk[9]..rk[1]` take the state from the S-box output mask `m2` to
    ///   the row masks `m3..m6` expected by masked InvMixColumns.
    /// - `rk[0]` takes the state from `m2` back to `m1`, which the final
    ///   remask strips.
    pub(crate) fn masked(&self, masks: &MaskSet) -> [[u8; 16]; 11] {
        let mut mrk = self.0;
        for r in 1..=9 {
            for (i, byte) in mrk[r].iter_mut().enumerate() {
                *byte ^= masks.m2 ^ masks.row_mask(i);
            }
        }
        for byte in mrk[0].iter_mut() {
            *byte ^= masks.m2 ^ masks.m1;
        }
        mrk
    }
}
