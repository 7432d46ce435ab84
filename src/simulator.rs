//! Loss and corruption injection for inbound segments.
//!
//! Real links drop and damage data. To exercise checksum validation and the
//! Go-Back-N retransmission path without depending on actual network
//! conditions, the transport-side decoder hands every fully framed segment to
//! a [`Simulator`] first:
//!
//! | Outcome     | Probability        | Effect                              |
//! |-------------|--------------------|-------------------------------------|
//! | Dropped     | `loss_rate / 2`    | frame discarded, decoder keeps going |
//! | Corrupted   | `loss_rate / 2`    | one random bit flipped in place      |
//! | Delivered   | `1 - loss_rate`    | frame untouched                      |
//!
//! A corrupted frame still goes through checksum validation, which is what
//! ends up discarding it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Configuration for the fault-injection model.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability in `[0.0, 1.0]` that a frame is lost or corrupted.
    pub loss_rate: f64,
    /// Fixed RNG seed for reproducible runs; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            seed: None,
        }
    }
}

/// What the simulator did to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Delivered,
    Dropped,
    Corrupted,
}

/// A seeded fault injector.
#[derive(Debug)]
pub struct Simulator {
    loss_rate: f64,
    rng: StdRng,
}

impl Simulator {
    pub fn new(config: &SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            loss_rate: config.loss_rate.clamp(0.0, 1.0),
            rng,
        }
    }

    /// Decide the fate of one frame, flipping a bit of `frame` in place when
    /// the outcome is [`Fault::Corrupted`].
    pub fn apply(&mut self, frame: &mut [u8]) -> Fault {
        if self.loss_rate <= 0.0 || frame.is_empty() {
            return Fault::Delivered;
        }
        if !self.rng.random_bool(self.loss_rate) {
            return Fault::Delivered;
        }
        if self.rng.random_bool(0.5) {
            return Fault::Dropped;
        }

        let bit = self.rng.random_range(0..frame.len() * 8);
        frame[bit / 8] ^= 1 << (bit % 8);
        Fault::Corrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(loss_rate: f64) -> Simulator {
        Simulator::new(&SimulatorConfig {
            loss_rate,
            seed: Some(7),
        })
    }

    #[test]
    fn zero_rate_is_transparent() {
        let mut sim = seeded(0.0);
        let mut frame = vec![0xaa; 32];
        for _ in 0..1000 {
            assert_eq!(sim.apply(&mut frame), Fault::Delivered);
        }
        assert_eq!(frame, vec![0xaa; 32]);
    }

    #[test]
    fn full_rate_never_delivers() {
        let mut sim = seeded(1.0);
        let mut frame = vec![0u8; 16];
        for _ in 0..200 {
            assert_ne!(sim.apply(&mut frame), Fault::Delivered);
        }
    }

    #[test]
    fn corruption_flips_exactly_one_bit() {
        let mut sim = seeded(1.0);
        loop {
            let mut frame = vec![0u8; 64];
            if sim.apply(&mut frame) == Fault::Corrupted {
                let flipped: u32 = frame.iter().map(|b| b.count_ones()).sum();
                assert_eq!(flipped, 1);
                break;
            }
        }
    }

    #[test]
    fn both_outcomes_occur() {
        let mut sim = seeded(1.0);
        let mut dropped = 0;
        let mut corrupted = 0;
        for _ in 0..400 {
            match sim.apply(&mut [0u8; 8]) {
                Fault::Dropped => dropped += 1,
                Fault::Corrupted => corrupted += 1,
                Fault::Delivered => unreachable!(),
            }
        }
        assert!(dropped > 100 && corrupted > 100, "{dropped} / {corrupted}");
    }

    #[test]
    fn same_seed_same_outcomes() {
        let mut a = seeded(0.5);
        let mut b = seeded(0.5);
        for _ in 0..100 {
            assert_eq!(a.apply(&mut [0u8; 4]), b.apply(&mut [0u8; 4]));
        }
    }
}
