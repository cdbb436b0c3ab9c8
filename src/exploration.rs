use rand::Rng;

use crate::decay::Decay;

/// Exploration policy result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    Explore,
    Exploit,
}

/// Epsilon greedy exploration policy with time-decaying epsilon threshold
pub struct EpsilonGreedy<D: Decay> {
    epsilon: D,
}

impl<D: Decay> EpsilonGreedy<D> {
    /// Initialize epsilon greedy policy with a decay strategy
    pub fn new(decay: D) -> Self {
        Self { epsilon: decay }
    }

    /// The exploration rate at `episode`
    pub fn epsilon(&self, episode: u32) -> f32 {
        self.epsilon.evaluate(episode as f32)
    }

    /// Invoke epsilon greedy policy for the current episode
    ///
    /// Drawn as `gen::<f32>() < epsilon`, so an epsilon of 0 exploits on
    /// every draw and an epsilon of 1 explores on every draw.
    pub fn choose(&self, episode: u32, rng: &mut impl Rng) -> Choice {
        if rng.gen::<f32>() < self.epsilon(episode) {
            Choice::Explore
        } else {
            Choice::Exploit
        }
    }
}
