//! Seeded RNG for deterministic simulation
//!
//! Every fault decision in a DST run is drawn from one `SimulatedRng`, so a
//! failing seed replays the exact same fault sequence.

use super::Rng;

/// Deterministic RNG (ChaCha8) seeded from a `u64`
#[derive(Debug, Clone)]
pub struct SimulatedRng {
    inner: rand_chacha::ChaCha8Rng,
}

impl SimulatedRng {
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;
        SimulatedRng {
            inner: rand_chacha::ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Derive an independent stream for a sub-component (e.g. one node)
    pub fn fork(&mut self) -> Self {
        SimulatedRng::new(self.next_u64())
    }
}

impl Rng for SimulatedRng {
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
