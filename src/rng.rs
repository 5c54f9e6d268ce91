const N: usize = 624;
const M: usize = 397;
const MATRIX_A: u32 = 0x9908_b0df;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7fff_ffff;

/// MT19937 with the classic scalar and array seeding routines.
///
/// Shard membership must be bit-for-bit reproducible across releases and
/// platforms: every CI worker derives the same partition from the same seed
/// with no coordination. General-purpose RNG crates reserve the right to
/// change their streams between versions, so the generator is pinned here.
/// Nothing in this module may change without re-deriving every stored
/// expectation.
pub struct MtRand {
    state: [u32; N],
    index: usize,
}

impl MtRand {
    /// Seed from a signed 64-bit value. The magnitude is what counts: values
    /// below 2^32 use scalar seeding, larger ones array-seed from their
    /// little-endian 32-bit limbs.
    pub fn new(seed: i64) -> Self {
        let magnitude = seed.unsigned_abs();
        let lo = magnitude as u32;
        let hi = (magnitude >> 32) as u32;
        let mut rng = MtRand {
            state: [0; N],
            index: N,
        };
        if hi == 0 {
            rng.seed_scalar(lo);
        } else {
            rng.seed_array(&[lo, hi]);
        }
        rng
    }

    fn seed_scalar(&mut self, seed: u32) {
        self.state[0] = seed;
        for i in 1..N {
            let prev = self.state[i - 1];
            self.state[i] = 1_812_433_253u32
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
        self.index = N;
    }

    fn seed_array(&mut self, key: &[u32]) {
        self.seed_scalar(19_650_218);
        let mut i = 1usize;
        let mut j = 0usize;
        for _ in 0..N.max(key.len()) {
            let prev = self.state[i - 1];
            self.state[i] = (self.state[i] ^ (prev ^ (prev >> 30)).wrapping_mul(1_664_525))
                .wrapping_add(key[j])
                .wrapping_add(j as u32);
            i += 1;
            j += 1;
            if i >= N {
                self.state[0] = self.state[N - 1];
                i = 1;
            }
            if j >= key.len() {
                j = 0;
            }
        }
        for _ in 0..N - 1 {
            let prev = self.state[i - 1];
            self.state[i] = (self.state[i] ^ (prev ^ (prev >> 30)).wrapping_mul(1_566_083_941))
                .wrapping_sub(i as u32);
            i += 1;
            if i >= N {
                self.state[0] = self.state[N - 1];
                i = 1;
            }
        }
        self.state[0] = 0x8000_0000;
    }

    pub fn next_u32(&mut self) -> u32 {
        if self.index >= N {
            self.twist();
        }
        let mut y = self.state[self.index];
        self.index += 1;
        y ^= y >> 11;
        y ^= (y << 7) & 0x9d2c_5680;
        y ^= (y << 15) & 0xefc6_0000;
        y ^= y >> 18;
        y
    }

    fn twist(&mut self) {
        for i in 0..N {
            let y = (self.state[i] & UPPER_MASK) | (self.state[(i + 1) % N] & LOWER_MASK);
            let mut next = self.state[(i + M) % N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.state[i] = next;
        }
        self.index = 0;
    }

    /// Uniform draw in `[0, bound)` by masking 32-bit words down to the
    /// smallest covering power of two and rejecting overshoot. The number of
    /// words consumed depends only on the seed and the sequence of bounds, so
    /// the stream stays reproducible.
    pub fn below(&mut self, bound: u64) -> u64 {
        if bound <= 1 {
            return 0;
        }
        let limit = bound - 1;
        let mask = covering_mask(limit);
        'retry: loop {
            let mut value: u64 = 0;
            for word in (0..2).rev() {
                if (mask >> (word * 32)) & 0xffff_ffff != 0 {
                    value |= u64::from(self.next_u32()) << (word * 32);
                    value &= mask;
                    if value > limit {
                        continue 'retry;
                    }
                }
            }
            return value;
        }
    }

    /// In-place Fisher-Yates from the back. A single-element (or empty) slice
    /// consumes no randomness.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        let mut i = items.len();
        while i > 0 {
            i -= 1;
            let j = self.below(i as u64 + 1) as usize;
            items.swap(i, j);
        }
    }
}

/// Smallest mask of the form 2^k - 1 that covers `value`.
fn covering_mask(value: u64) -> u64 {
    let mut mask = value;
    mask |= mask >> 1;
    mask |= mask >> 2;
    mask |= mask >> 4;
    mask |= mask >> 8;
    mask |= mask >> 16;
    mask |= mask >> 32;
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_published_mt19937_vector() {
        let mut rng = MtRand::new(5489);
        let first: Vec<u32> = (0..5).map(|_| rng.next_u32()).collect();
        assert_eq!(
            first,
            vec![3_499_211_612, 581_869_302, 3_890_346_734, 3_586_334_585, 545_404_204]
        );
    }

    #[test]
    fn scalar_seed_stream_is_stable() {
        let mut rng = MtRand::new(678);
        assert_eq!(rng.next_u32(), 2_241_504_337);
        assert_eq!(rng.next_u32(), 3_949_027_710);
        assert_eq!(rng.next_u32(), 2_362_728_802);
    }

    #[test]
    fn array_seed_stream_is_stable() {
        // A magnitude above 2^32 takes the two-limb seeding path.
        let mut rng = MtRand::new(3_906_982_861_516_061_026);
        assert_eq!(rng.next_u32(), 2_922_531_982);
        assert_eq!(rng.next_u32(), 2_583_598_750);
        assert_eq!(rng.next_u32(), 2_106_150_288);
    }

    #[test]
    fn negative_seeds_use_their_magnitude() {
        let mut pos = MtRand::new(678);
        let mut neg = MtRand::new(-678);
        for _ in 0..16 {
            assert_eq!(pos.next_u32(), neg.next_u32());
        }
    }

    #[test]
    fn below_stays_in_range() {
        let mut rng = MtRand::new(42);
        for bound in [1u64, 2, 3, 7, 100, 1 << 33] {
            for _ in 0..50 {
                assert!(rng.below(bound) < bound);
            }
        }
    }

    #[test]
    fn shuffle_is_deterministic_for_a_seed() {
        let mut items = vec!["a", "b", "c", "d", "e", "f"];
        MtRand::new(678).shuffle(&mut items);
        assert_eq!(items, vec!["f", "d", "e", "a", "c", "b"]);

        let mut items = vec!["a", "b", "c", "d", "e", "f"];
        MtRand::new(123_456_789).shuffle(&mut items);
        assert_eq!(items, vec!["d", "f", "b", "c", "e", "a"]);
    }

    #[test]
    fn shuffling_one_element_consumes_no_randomness() {
        let mut used = MtRand::new(42);
        let mut fresh = MtRand::new(42);
        used.shuffle(&mut ["only"]);
        assert_eq!(used.next_u32(), fresh.next_u32());
    }
}
