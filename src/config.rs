use crate::set_index::Mapping;
use color_eyre::eyre::{self, ensure, WrapErr};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;

/// Number of cores (SMs); the model simulates one core at a time.
pub const NUM_CORES: usize = 1;
/// Latency of a cache hit.
pub const NON_MEM_LATENCY: u64 = 0;
/// Maximum number of threads supported per kernel trace.
pub const MAX_THREADS: usize = 32 * 1024;
/// Threads per warp.
pub const WARP_SIZE: usize = 32;
/// Maximum threads concurrently active on one core.
pub const MAX_ACTIVE_THREADS: usize = 1536;
/// Maximum thread blocks concurrently active on one core.
pub const MAX_ACTIVE_BLOCKS: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing `{key} <value>` entry")]
    Missing { key: &'static str },
    #[error("invalid value `{value}` for `{key}`")]
    Invalid {
        key: &'static str,
        value: String,
        source: std::num::ParseIntError,
    },
}

/// Hardware parameters of the modelled L1 cache and its core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Size of a cache line in bytes.
    pub line_size: u64,
    /// Cache size in bytes.
    pub cache_bytes: u64,
    /// Cache size in lines.
    pub cache_lines: u64,
    /// Associativity (1 = direct mapped).
    pub cache_ways: u64,
    /// Number of sets (1 = fully associative).
    pub cache_sets: u64,
    /// Number of miss-status holding registers.
    pub num_mshr: u64,
    pub num_cores: usize,
    pub warp_size: usize,
    pub max_active_threads: usize,
    pub max_active_blocks: usize,
    /// Best-case off-chip memory latency in ticks.
    pub mem_latency: u64,
    /// Standard deviation of the memory latency.
    pub mem_latency_stddev: u64,
    /// Latency of a cache hit.
    pub non_mem_latency: u64,
    /// Line address to set index mapping.
    pub mapping: Mapping,
}

impl Settings {
    /// Build settings from the six configurable values; the remaining
    /// fields are hardware constants and derived sizes.
    pub fn new(
        line_size: u64,
        cache_bytes: u64,
        cache_ways: u64,
        num_mshr: u64,
        mem_latency: u64,
        mem_latency_stddev: u64,
    ) -> eyre::Result<Self> {
        ensure!(line_size > 0, "line_size must be positive");
        ensure!(cache_ways > 0, "cache_ways must be positive");
        ensure!(num_mshr > 0, "num_mshr must be positive");
        ensure!(
            cache_bytes > 0 && cache_bytes % line_size == 0,
            "cache_bytes ({cache_bytes}) must be a positive multiple of line_size ({line_size})"
        );
        let cache_lines = cache_bytes / line_size;
        ensure!(
            cache_lines % cache_ways == 0,
            "cache_lines ({cache_lines}) must be a multiple of cache_ways ({cache_ways})"
        );
        Ok(Self {
            line_size,
            cache_bytes,
            cache_lines,
            cache_ways,
            cache_sets: cache_lines / cache_ways,
            num_mshr,
            num_cores: NUM_CORES,
            warp_size: WARP_SIZE,
            max_active_threads: MAX_ACTIVE_THREADS,
            max_active_blocks: MAX_ACTIVE_BLOCKS,
            mem_latency,
            mem_latency_stddev,
            non_mem_latency: NON_MEM_LATENCY,
            mapping: Mapping::default(),
        })
    }

    /// Parse a configuration: six whitespace-separated `identifier value`
    /// pairs, in order `line_size`, `cache_bytes`, `cache_ways`,
    /// `num_mshr`, `mem_latency`, `mem_latency_stddev`.
    pub fn from_reader(reader: impl BufRead) -> eyre::Result<Self> {
        let mut values = [0u64; 6];
        let keys = [
            "line_size",
            "cache_bytes",
            "cache_ways",
            "num_mshr",
            "mem_latency",
            "mem_latency_stddev",
        ];
        let mut tokens = Vec::new();
        for line in reader.lines() {
            let line = line.wrap_err("failed to read configuration")?;
            tokens.extend(line.split_whitespace().map(str::to_owned));
        }
        for (i, key) in keys.into_iter().enumerate() {
            // token 2i is the identifier, 2i+1 its value
            let token = tokens.get(2 * i + 1).ok_or(Error::Missing { key })?;
            values[i] = token.parse().map_err(|source| Error::Invalid {
                key,
                value: token.clone(),
                source,
            })?;
        }
        Self::new(
            values[0], values[1], values[2], values[3], values[4], values[5],
        )
    }

    pub fn from_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("could not read settings file {}", path.display()))?;
        Self::from_reader(std::io::BufReader::new(file))
            .wrap_err_with(|| format!("malformed settings file {}", path.display()))
    }
}

impl Default for Settings {
    /// Fermi's 16KB L1: 128-byte lines, 4 ways, 32 sets.
    fn default() -> Self {
        Self::new(128, 16 * 1024, 4, 32, 400, 20).unwrap()
    }
}
