//! Randomness abstraction
//!
//! Fault injection and retry jitter draw from an [`Rng`] so that simulation
//! runs are reproducible from a seed. Production code uses
//! [`ProductionRng`]; DST uses [`SimulatedRng`].

pub mod simulation;

pub use simulation::SimulatedRng;

/// Source of randomness used by fault injection and retry jitter
pub trait Rng: Send + 'static {
    fn next_u64(&mut self) -> u64;

    /// Returns true with the given probability (clamped to 0.0..=1.0)
    fn gen_bool(&mut self, probability: f64) -> bool;

    /// Uniform value in `[min, max)`; returns `min` when the range is empty
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    fn shuffle<T>(&mut self, slice: &mut [T]);
}

/// OS-seeded RNG for production jitter
pub struct ProductionRng {
    inner: rand_chacha::ChaCha8Rng,
}

impl ProductionRng {
    pub fn new() -> Self {
        use rand::SeedableRng;
        ProductionRng {
            inner: rand_chacha::ChaCha8Rng::from_entropy(),
        }
    }
}

impl Default for ProductionRng {
    fn default() -> Self {
        Self::new()
    }
}

impl Rng for ProductionRng {
    fn next_u64(&mut self) -> u64 {
        use rand::RngCore;
        self.inner.next_u64()
    }

    fn gen_bool(&mut self, probability: f64) -> bool {
        use rand::Rng;
        self.inner.gen_bool(probability.clamp(0.0, 1.0))
    }

    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        use rand::Rng;
        if min >= max {
            return min;
        }
        self.inner.gen_range(min..max)
    }

    fn shuffle<T>(&mut self, slice: &mut [T]) {
        use rand::seq::SliceRandom;
        slice.shuffle(&mut self.inner);
    }
}
