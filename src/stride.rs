//! Stride strategies controlling fingerprint window placement

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Strategy for choosing the gap between the starts of consecutive
/// fingerprint images.
///
/// The requested step is expressed in samples and translated into a number
/// of reduced frames at grouping time, so two images may partially overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stride {
    /// Fixed step between consecutive image starts.
    Fixed { samples: usize },
    /// Step drawn uniformly from `[min, max]` before each image. Seedable
    /// so that ingest runs are reproducible.
    Random { min: usize, max: usize, seed: u64 },
    /// Advance by a single frame hop, examining every possible starting
    /// offset. Default at query time.
    Incremental,
}

impl Stride {
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Stride::Random { min, max, .. } = self {
            if min > max {
                return Err(EngineError::InvalidConfig(format!(
                    "random stride range [{min}, {max}] is empty"
                )));
            }
        }
        Ok(())
    }

    /// Begin a stepping sequence at the given frame hop (`overlap` samples
    /// per frame).
    pub fn stepper(&self, overlap: usize) -> StrideStepper {
        let rng = match self {
            Stride::Random { seed, .. } => Some(ChaCha8Rng::seed_from_u64(*seed)),
            _ => None,
        };
        StrideStepper {
            stride: self.clone(),
            overlap,
            rng,
        }
    }
}

/// Stateful frame-step generator for one command execution.
pub struct StrideStepper {
    stride: Stride,
    overlap: usize,
    rng: Option<ChaCha8Rng>,
}

impl StrideStepper {
    /// Number of frames to advance from the previous image start. Always at
    /// least one frame, so every stride makes forward progress.
    pub fn next_step(&mut self) -> usize {
        let samples = match &self.stride {
            Stride::Fixed { samples } => *samples,
            Stride::Incremental => 0,
            Stride::Random { min, max, .. } => {
                let rng = self.rng.as_mut().expect("random stride carries an rng");
                rng.gen_range(*min..=*max)
            }
        };
        frames_for(samples, self.overlap)
    }
}

/// Round a step in samples to the nearest whole frame, clamped to one.
fn frames_for(samples: usize, overlap: usize) -> usize {
    ((samples + overlap / 2) / overlap).max(1)
}
