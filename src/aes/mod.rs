//! Side-channel hardened inverse AES-128.
//!
//! The card decrypts with first-order Boolean masking plus operation
//! shuffling. Masking keeps every intermediate byte XORed with a
//! per-invocation random value, so the power draw of a bus or register
//! never correlates directly with a key-dependent byte. Shuffling visits
//! the 16 S-box substitutions of each round in a fresh random order, so an
//! attacker cannot pin the moment a given state byte is processed by
//! aligning traces.
//!
//! The pipeline stages are separate functions over the state, each with a
//! documented mask profile at entry and exit, rather than one fused
//! routine. That keeps each transformation individually checkable against
//! an unmasked reference (see the tests at the bottom).
//!
//! Round schedule of [`MaskedAes::decrypt_block`]:
//!
//! ```text
//! remask(clear -> m1)
//! add_round_key(rk'[10])                  // mask stays m1
//! for r in 9..=1 {
//!     inv_shift_rows                      // permutation, mask-safe
//!     inv_sub_bytes (masked, shuffled)    // m1 -> m2
//!     add_round_key(rk'[r])               // m2 -> rows m3..m6
//!     inv_mix_columns (masked)            // rows -> m1
//! }
//! inv_shift_rows
//! inv_sub_bytes (masked, shuffled)        // m1 -> m2
//! add_round_key(rk'[0])                   // m2 -> m1
//! remask(m1 -> clear)
//! ```
//!
//! Not provided: the forward cipher, second-order masking, and
//! constant-time guarantees beyond what masking plus shuffling give.

pub(crate) mod masking;
pub(crate) mod schedule;
pub(crate) mod tables;

pub use masking::{MaskProfile, MaskSet, MaskedInvSbox, ShuffleOrder};
pub use schedule::RoundKeys;

use masking::{MixCorrection, remask};
use rand_core::RngCore;
use tables::gmul;

/// The decryption core: a fixed key schedule applied through the masked,
/// shuffled inverse cipher.
///
/// ```
/// use rand_core::SeedableRng;
/// use t0card::aes::MaskedAes;
///
/// let aes = MaskedAes::new(&[0u8; 16]);
/// let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
/// let mut once = [0u8; 16];
/// let mut twice = [0u8; 16];
/// aes.decrypt_block(&mut rng, &mut once);
/// aes.decrypt_block(&mut rng, &mut twice);
/// // Fresh masks and shuffles each call, same plaintext.
/// assert_eq!(once, twice);
/// ```
#[derive(Debug)]
pub struct MaskedAes {
    keys: RoundKeys,
}

impl MaskedAes {
    /// Expands the provisioned key.
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            keys: RoundKeys::expand(key),
        }
    }

    /// Builds the core from an already expanded schedule.
    pub fn from_round_keys(keys: RoundKeys) -> Self {
        Self { keys }
    }

    /// Decrypts one block in place.
    ///
    /// Draws eight mask bytes, rebuilds the masked inverse S-box and the
    /// premasked round keys, then runs the schedule above. Between the
    /// first remask and the final one the state bytes are never bare in
    /// memory.
    pub fn decrypt_block<R: RngCore>(&self, rng: &mut R, state: &mut [u8; 16]) {
        let masks = MaskSet::draw(rng);
        let sbox = MaskedInvSbox::build(&masks);
        let mrk = self.keys.masked(&masks);
        let correction = MixCorrection::compute(&masks);

        remask(state, &masks, MaskProfile::Clear, MaskProfile::SboxIn);
        add_round_key(state, &mrk[10]);
        for r in (1..=9).rev() {
            inv_shift_rows(state);
            inv_sub_bytes_shuffled(state, &sbox, rng);
            add_round_key(state, &mrk[r]);
            inv_mix_columns_masked(state, &correction);
        }
        inv_shift_rows(state);
        inv_sub_bytes_shuffled(state, &sbox, rng);
        add_round_key(state, &mrk[0]);
        remask(state, &masks, MaskProfile::SboxIn, MaskProfile::Clear);
    }
}

/// XORs a (possibly premasked) round key into the state. Any mask
/// transition rides on the key bytes, so the operation itself is a plain
/// XOR.
pub(crate) fn add_round_key(state: &mut [u8; 16], rk: &[u8; 16]) {
    for (byte, k) in state.iter_mut().zip(rk.iter()) {
        *byte ^= k;
    }
}

/// Inverse ShiftRows: row `r` of the column-major state rotates right by
/// `r`. A pure byte permutation, safe under any per-row mask that is
/// constant along its row.
pub(crate) fn inv_shift_rows(state: &mut [u8; 16]) {
    let tmp = state[13];
    state[13] = state[9];
    state[9] = state[5];
    state[5] = state[1];
    state[1] = tmp;

    state.swap(2, 10);
    state.swap(6, 14);

    let tmp = state[3];
    state[3] = state[7];
    state[7] = state[11];
    state[11] = state[15];
    state[15] = tmp;
}

/// Masked inverse SubBytes in a fresh random byte order.
fn inv_sub_bytes_shuffled<R: RngCore>(state: &mut [u8; 16], sbox: &MaskedInvSbox, rng: &mut R) {
    let order = ShuffleOrder::draw(rng);
    for i in order.iter() {
        state[i] = sbox.lookup(state[i]);
    }
}

/// Masked inverse MixColumns.
///
/// Input rows are masked `m3..m6`, output rows uniformly `m1`. The
/// accumulator for each output byte starts from the `m7`/`m8` pre-charge,
/// so every partial sum stays masked, and the precomputed per-row fixup
/// removes the pre-charge and the mask image in one final XOR.
fn inv_mix_columns_masked(state: &mut [u8; 16], correction: &MixCorrection) {
    for col in 0..4 {
        let a = [
            state[4 * col],
            state[4 * col + 1],
            state[4 * col + 2],
            state[4 * col + 3],
        ];
        for row in 0..4 {
            let coef = COEFFICIENTS[row];
            let mut acc = correction.init[row];
            acc ^= gmul(a[0], coef[0]);
            acc ^= gmul(a[1], coef[1]);
            acc ^= gmul(a[2], coef[2]);
            acc ^= gmul(a[3], coef[3]);
            state[4 * col + row] = acc ^ correction.fix[row];
        }
    }
}

/// Rows of the InvMixColumns matrix.
const COEFFICIENTS: [[u8; 4]; 4] = [
    [14, 11, 13, 9],
    [9, 14, 11, 13],
    [13, 9, 14, 11],
    [11, 13, 9, 14],
];
