use crate::config::Settings;
use crate::INF;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of classifier configurations.
pub const NUM_CASES: usize = 4;

/// Reuse-distance histogram for one model configuration.
///
/// Maps a distance to its frequency; [`INF`] keys first uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    pub distances: HashMap<u64, u64>,
}

impl Histogram {
    pub fn record(&mut self, distance: u64) {
        *self.distances.entry(distance).or_insert(0) += 1;
    }

    /// Sum of all frequencies.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.distances.values().sum()
    }

    /// Bins in ascending distance order; the [`INF`] bin sorts last.
    #[must_use]
    pub fn sorted(&self) -> Vec<(u64, u64)> {
        self.distances
            .iter()
            .map(|(&distance, &frequency)| (distance, frequency))
            .sorted()
            .collect()
    }

    /// First-ever uses of a line.
    #[must_use]
    pub fn compulsory_misses(&self) -> u64 {
        self.distances.get(&INF).copied().unwrap_or(0)
    }

    /// Accesses whose distance exceeds the associativity.
    #[must_use]
    pub fn capacity_misses(&self, cache_ways: u64) -> u64 {
        self.distances
            .iter()
            .filter(|&(&distance, _)| distance != INF && distance > cache_ways)
            .map(|(_, &frequency)| frequency)
            .sum()
    }

    /// Accesses that fit: finite distance not above the associativity.
    #[must_use]
    pub fn hits(&self, cache_ways: u64) -> u64 {
        self.distances
            .iter()
            .filter(|&(&distance, _)| distance != INF && distance <= cache_ways)
            .map(|(_, &frequency)| frequency)
            .sum()
    }
}

impl std::ops::AddAssign for Histogram {
    fn add_assign(&mut self, other: Self) {
        for (distance, frequency) in other.distances {
            *self.distances.entry(distance).or_insert(0) += frequency;
        }
    }
}

/// The five modelled miss categories.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum MissKind {
    Compulsory,
    Capacity,
    Associativity,
    Latency,
    Mshr,
}

/// Decomposed miss counts for one kernel, derived from the four
/// classifier runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissBreakdown {
    pub compulsory: u64,
    pub capacity: u64,
    pub associativity: u64,
    pub latency: u64,
    pub mshr: u64,
    /// Total misses of the baseline run.
    pub total: u64,
    /// Total misses with a fully associative cache.
    pub total_associativity: u64,
    /// Total misses with zero latencies.
    pub total_latency: u64,
    /// Total misses with unlimited MSHRs.
    pub total_mshr: u64,
    /// Hits of the baseline run.
    pub hits: u64,
}

impl MissBreakdown {
    /// Decompose the four per-configuration histograms.
    ///
    /// Baseline misses beyond the compulsory ones are attributed to the
    /// feature whose removal avoided them; what remains is capacity. A
    /// negative remainder is absorbed by the first sufficiently large
    /// component, trying MSHR, then latency, then associativity.
    #[must_use]
    pub fn from_histograms(histograms: &[Histogram; NUM_CASES], hardware: &Settings) -> Self {
        let mut compulsory = [0u64; NUM_CASES];
        let mut miss = [0u64; NUM_CASES];
        for (case, histogram) in histograms.iter().enumerate() {
            // the full-associativity case folds every way into one set
            let cache_ways = if case == 1 {
                hardware.cache_ways * hardware.cache_sets
            } else {
                hardware.cache_ways
            };
            compulsory[case] = histogram.compulsory_misses();
            miss[case] = compulsory[case] + histogram.capacity_misses(cache_ways);
        }
        let hits = histograms[0].hits(hardware.cache_ways);

        for (case, kind) in [(1, "full-associativity"), (2, "zero-latency"), (3, "unlimited-MSHR")]
        {
            if miss[case] > miss[0] {
                log::warn!(
                    "more misses in the {kind} run ({}) than in the baseline ({})",
                    miss[case],
                    miss[0]
                );
            }
        }

        let mut associativity = miss[0] as i64 - miss[1] as i64;
        let mut latency = compulsory[0] as i64 - compulsory[2] as i64;
        let mut mshr = miss[0] as i64 - miss[3] as i64;
        let compulsory = compulsory[2];

        let rest = miss[0] as i64
            - (compulsory as i64 + latency.max(0) + associativity.max(0) + mshr.max(0));
        let capacity = rest.max(0) as u64;
        if rest < 0 {
            let overshoot = -rest;
            if mshr > overshoot {
                mshr -= overshoot;
            } else if latency > overshoot {
                latency -= overshoot;
            } else {
                associativity -= overshoot;
            }
        }

        Self {
            compulsory,
            capacity,
            associativity: associativity.max(0) as u64,
            latency: latency.max(0) as u64,
            mshr: mshr.max(0) as u64,
            total: miss[0],
            total_associativity: miss[1],
            total_latency: miss[2],
            total_mshr: miss[3],
            hits,
        }
    }

    #[must_use]
    pub fn get(&self, kind: MissKind) -> u64 {
        match kind {
            MissKind::Compulsory => self.compulsory,
            MissKind::Capacity => self.capacity,
            MissKind::Associativity => self.associativity,
            MissKind::Latency => self.latency,
            MissKind::Mshr => self.mshr,
        }
    }

    /// Modelled accesses: baseline misses plus hits.
    #[must_use]
    pub fn accesses(&self) -> u64 {
        self.total + self.hits
    }

    /// Miss rate in percent.
    #[must_use]
    pub fn miss_rate(&self) -> f64 {
        if self.accesses() == 0 {
            return 0.0;
        }
        100.0 * self.total as f64 / self.accesses() as f64
    }
}
