//! Masks, masked tables and the operation shuffle.
//!
//! Every invocation of the inverse cipher draws eight fresh mask bytes and
//! rebuilds the tables that depend on them, so no two power traces share a
//! masking. The roles:
//!
//! - `m1` is the S-box input mask. It is also the uniform state mask at
//!   round entry and the mask masked InvMixColumns re-establishes.
//! - `m2` is the S-box output mask.
//! - `m3..m6` mask the four rows at the InvMixColumns input.
//! - `m7` and `m8` pre-charge the InvMixColumns accumulators so no partial
//!   sum is ever a bare intermediate.
//!
//! Mask changes between those stations ride on the premasked round keys
//! (see [`RoundKeys::masked`](super::schedule::RoundKeys)).

use super::tables::{INV_SBOX, inv_mix_column};
use rand_core::RngCore;

pub(crate) fn next_byte<R: RngCore>(rng: &mut R) -> u8 {
    (rng.next_u32() & 0xff) as u8
}

/// The eight per-invocation mask bytes.
#[derive(Debug, Clone)]
pub struct MaskSet {
    /// S-box input mask and uniform round-entry mask.
    pub(crate) m1: u8,
    /// S-box output mask.
    pub(crate) m2: u8,
    /// Row masks at the InvMixColumns input.
    pub(crate) rows: [u8; 4],
    /// Accumulator pre-charges inside masked InvMixColumns.
    pub(crate) aux: [u8; 2],
}

impl MaskSet {
    /// Draws a complete mask set from the entropy source.
    pub fn draw<R: RngCore>(rng: &mut R) -> Self {
        Self {
            m1: next_byte(rng),
            m2: next_byte(rng),
            rows: [
                next_byte(rng),
                next_byte(rng),
                next_byte(rng),
                next_byte(rng),
            ],
            aux: [next_byte(rng), next_byte(rng)],
        }
    }

    /// The row mask covering state byte `i` (row = `i % 4`).
    pub(crate) fn row_mask(&self, i: usize) -> u8 {
        self.rows[i % 4]
    }

    /// The mask covering state byte `i` under the given profile.
    pub(crate) fn mask_at(&self, profile: MaskProfile, i: usize) -> u8 {
        match profile {
            MaskProfile::Clear => 0,
            MaskProfile::SboxIn => self.m1,
            MaskProfile::SboxOut => self.m2,
            MaskProfile::MixRows => self.row_mask(i),
        }
    }
}

/// The masking a state can be under between pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskProfile {
    /// No mask (only at entry and exit).
    Clear,
    /// Uniform `m1`.
    SboxIn,
    /// Uniform `m2`.
    SboxOut,
    /// Row-wise `m3..m6`.
    MixRows,
}

/// Moves the state from one mask profile to another.
pub(crate) fn remask(state: &mut [u8; 16], masks: &MaskSet, from: MaskProfile, to: MaskProfile) {
    for (i, byte) in state.iter_mut().enumerate() {
        *byte ^= masks.mask_at(from, i) ^ masks.mask_at(to, i);
    }
}

/// The per-invocation masked inverse S-box:
/// `table[x] = INV_SBOX[x ^ m1] ^ m2`, so a byte masked with `m1` looks up
/// to its substitution masked with `m2` and is never bare in between.
pub struct MaskedInvSbox {
    table: [u8; 256],
}

impl core::fmt::Debug for MaskedInvSbox {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // The table is keyed secret material for the current invocation.
        f.write_str("MaskedInvSbox { .. }")
    }
}

impl MaskedInvSbox {
    /// Rebuilds the table for a fresh mask set.
    pub fn build(masks: &MaskSet) -> Self {
        let mut table = [0u8; 256];
        for (x, entry) in table.iter_mut().enumerate() {
            *entry = INV_SBOX[x ^ masks.m1 as usize] ^ masks.m2;
        }
        Self { table }
    }

    /// One masked substitution.
    pub fn lookup(&self, masked: u8) -> u8 {
        self.table[masked as usize]
    }
}

/// Precomputed corrections for masked InvMixColumns.
///
/// InvMixColumns is linear over XOR, so running it on the column of row
/// masks yields exactly the error term the masked computation carries.
/// That term, the target mask `m1` and the accumulator pre-charge are
/// folded into one fixup byte per row.
#[derive(Debug, Clone)]
pub(crate) struct MixCorrection {
    /// Accumulator pre-charge per row (`m7` on even rows, `m8` on odd).
    pub(crate) init: [u8; 4],
    /// Final XOR per row: pre-charge, mask image and `m1` together.
    pub(crate) fix: [u8; 4],
}

impl MixCorrection {
    pub(crate) fn compute(masks: &MaskSet) -> Self {
        let image = inv_mix_column(masks.rows);
        let init = [masks.aux[0], masks.aux[1], masks.aux[0], masks.aux[1]];
        let mut fix = [0u8; 4];
        for row in 0..4 {
            fix[row] = init[row] ^ image[row] ^ masks.m1;
        }
        Self { init, fix }
    }
}

/// A random visiting order for the 16 byte substitutions of a round.
#[derive(Debug, Clone)]
pub struct ShuffleOrder([u8; 16]);

impl ShuffleOrder {
    /// Fisher-Yates shuffle of `{0..15}`, one fresh byte per swap reduced
    /// modulo the remaining range.
    pub fn draw<R: RngCore>(rng: &mut R) -> Self {
        let mut order = [0u8; 16];
        for (i, slot) in order.iter_mut().enumerate() {
            *slot = i as u8;
        }
        for i in (1..16usize).rev() {
            let j = (next_byte(rng) as usize) % (i + 1);
            order.swap(i, j);
        }
        Self(order)
    }

    /// The byte indices in visiting order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().map(|&i| i as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::SeedableRng;

    fn rng(seed: u64) -> rand_chacha::ChaCha8Rng {
        rand_chacha::ChaCha8Rng::seed_from_u64(seed)
    }

    #[test]
    fn masked_sbox_invariant() {
        // table[x ^ m_in] ^ m_out == InvSbox(x) for all x.
        let masks = MaskSet::draw(&mut rng(1));
        let sbox = MaskedInvSbox::build(&masks);
        for x in 0u8..=255 {
            assert_eq!(
                sbox.lookup(x ^ masks.m1) ^ masks.m2,
                INV_SBOX[x as usize],
                "x = {x:#04x}"
            );
        }
    }

    #[test]
    fn remask_round_trips() {
        let masks = MaskSet::draw(&mut rng(2));
        let reference: [u8; 16] = core::array::from_fn(|i| i as u8 * 17);
        let mut state = reference;
        remask(&mut state, &masks, MaskProfile::Clear, MaskProfile::MixRows);
        for i in 0..16 {
            assert_eq!(state[i], reference[i] ^ masks.row_mask(i));
        }
        remask(&mut state, &masks, MaskProfile::MixRows, MaskProfile::SboxIn);
        remask(&mut state, &masks, MaskProfile::SboxIn, MaskProfile::Clear);
        assert_eq!(state, reference);
    }

    #[test]
    fn mix_correction_matches_the_linear_image() {
        let masks = MaskSet::draw(&mut rng(3));
        let corr = MixCorrection::compute(&masks);
        let image = inv_mix_column(masks.rows);
        for row in 0..4 {
            assert_eq!(corr.fix[row] ^ corr.init[row] ^ image[row], masks.m1);
        }
    }

    #[test]
    fn shuffle_is_a_bijection() {
        let mut r = rng(4);
        for _ in 0..64 {
            let order = ShuffleOrder::draw(&mut r);
            let mut seen = [false; 16];
            for i in order.iter() {
                assert!(!seen[i]);
                seen[i] = true;
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn shuffle_first_position_is_roughly_uniform() {
        // 1600 draws over 16 buckets: expect 100 per bucket. The bound is
        // loose but far tighter than any stuck-position failure mode.
        let mut r = rng(5);
        let mut buckets = [0u32; 16];
        for _ in 0..1600 {
            let order = ShuffleOrder::draw(&mut r);
            let first = order.iter().next().unwrap();
            buckets[first] += 1;
        }
        for (i, &count) in buckets.iter().enumerate() {
            assert!((50..=150).contains(&count), "bucket {i}: {count}");
        }
    }

    #[test]
    fn mask_sets_are_fresh_across_draws() {
        let mut r = rng(6);
        let mut collisions = 0;
        let mut previous = MaskSet::draw(&mut r);
        for _ in 0..100 {
            let next = MaskSet::draw(&mut r);
            let same = previous.m1 == next.m1
                && previous.m2 == next.m2
                && previous.rows == next.rows
                && previous.aux == next.aux;
            if same {
                collisions += 1;
            }
            previous = next;
        }
        assert_eq!(collisions, 0);
    }
}
