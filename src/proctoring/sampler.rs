//! Choosing which sessions are watched this epoch.
//!
//! The monitored count is bounded by the configured sampling fraction,
//! floor and ceiling; the members are a uniform random subset drawn
//! without replacement. Each epoch is drawn independently of the last.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;

use super::session::SessionId;
use crate::config::ProctoringConfig;

/// Slack applied before rounding up so that products such as `100 * 0.15`
/// (which is 15.000000000000002 in binary floating point) round to 15.
const CEIL_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPolicy {
    pub sample_rate: f64,
    pub min_monitored: usize,
    pub max_monitored: usize,
}

impl SamplingPolicy {
    pub fn new(sample_rate: f64, min_monitored: usize, max_monitored: usize) -> Self {
        Self {
            sample_rate,
            min_monitored,
            max_monitored,
        }
    }

    /// How many of `n` active sessions to monitor.
    pub fn target_count(&self, n: usize) -> usize {
        if n < self.min_monitored {
            return n;
        }
        let scaled = ((n as f64) * self.sample_rate - CEIL_EPSILON).ceil().max(0.0) as usize;
        scaled
            .max(self.min_monitored)
            .min(self.max_monitored)
            .min(n)
    }
}

impl From<&ProctoringConfig> for SamplingPolicy {
    fn from(config: &ProctoringConfig) -> Self {
        Self::new(
            config.sample_rate,
            config.min_monitored,
            config.max_monitored,
        )
    }
}

pub struct Sampler {
    policy: SamplingPolicy,
    rng: StdRng,
}

impl Sampler {
    pub fn new(policy: SamplingPolicy) -> Self {
        Self {
            policy,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sampler, for reproducible selections.
    pub fn with_seed(policy: SamplingPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    /// Draws the monitored set for this epoch from `candidates`.
    pub fn select(&mut self, candidates: &[SessionId]) -> HashSet<SessionId> {
        let count = self.policy.target_count(candidates.len());
        candidates
            .choose_multiple(&mut self.rng, count)
            .cloned()
            .collect()
    }
}

/// Ids currently under observation. Replaced wholesale on every rotation;
/// between rotations ids are only ever removed.
#[derive(Debug, Default)]
pub struct MonitoredSet {
    ids: HashSet<SessionId>,
}

impl MonitoredSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.ids.contains(session_id)
    }

    pub fn replace(&mut self, ids: HashSet<SessionId>) {
        self.ids = ids;
    }

    pub fn remove(&mut self, session_id: &str) -> bool {
        self.ids.remove(session_id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sorted copy of the member ids
    pub fn sorted_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.ids.iter().cloned().collect();
        ids.sort();
        ids
    }
}
