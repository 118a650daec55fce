//! Packet loss simulation for datagram transports.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Drops outgoing datagrams with a fixed probability.
#[derive(Debug, Clone)]
pub struct LossModel {
    probability: f64,
    rng: StdRng,
}

impl LossModel {
    /// Creates a loss model seeded from the OS. The probability is clamped
    /// to `0.0..=1.0`; NaN counts as no loss.
    pub fn new(probability: f64) -> Self {
        Self::with_rng(probability, StdRng::from_os_rng())
    }

    /// Creates a reproducible loss model.
    pub fn seeded(probability: f64, seed: u64) -> Self {
        Self::with_rng(probability, StdRng::seed_from_u64(seed))
    }

    /// A model that never drops anything.
    pub fn lossless() -> Self {
        Self::new(0.0)
    }

    fn with_rng(probability: f64, rng: StdRng) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { probability, rng }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Decides the fate of the next datagram.
    pub fn should_drop(&mut self) -> bool {
        self.probability > 0.0 && self.rng.random_bool(self.probability)
    }
}

impl Default for LossModel {
    fn default() -> Self {
        Self::lossless()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossless_never_drops() {
        let mut model = LossModel::lossless();
        assert!((0..1000).all(|_| !model.should_drop()));
    }

    #[test]
    fn certain_loss_always_drops() {
        let mut model = LossModel::seeded(1.0, 7);
        assert!((0..1000).all(|_| model.should_drop()));
    }

    #[test]
    fn probability_is_clamped() {
        assert_eq!(LossModel::new(-0.5).probability(), 0.0);
        assert_eq!(LossModel::new(3.0).probability(), 1.0);
        assert_eq!(LossModel::new(f64::NAN).probability(), 0.0);
    }

    #[test]
    fn drop_rate_roughly_matches() {
        let mut model = LossModel::seeded(0.3, 42);
        let dropped = (0..10_000).filter(|_| model.should_drop()).count();
        assert!((2_500..3_500).contains(&dropped), "dropped {dropped}");
    }

    #[test]
    fn seeded_models_are_reproducible() {
        let mut a = LossModel::seeded(0.5, 99);
        let mut b = LossModel::seeded(0.5, 99);
        let left: Vec<bool> = (0..64).map(|_| a.should_drop()).collect();
        let right: Vec<bool> = (0..64).map(|_| b.should_drop()).collect();
        assert_eq!(left, right);
    }
}
