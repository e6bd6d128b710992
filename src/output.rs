use crate::config::Settings;
use crate::stats::{Histogram, MissBreakdown, MissKind};
use color_eyre::eyre::{self, WrapErr};
use itertools::Itertools;
use std::cmp::Reverse;
use std::io::{BufRead, Write};
use std::path::Path;
use strum::IntoEnumIterator;

/// How many histogram bins to log after a run.
const LOG_MAX_DISTANCES: usize = 10;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("verification data must hold hit and miss counts")]
    MissingCounts,
    #[error("invalid count `{value}` in verification data")]
    InvalidCount {
        value: String,
        source: std::num::ParseIntError,
    },
}

/// Measured hit and miss counts from a hardware profiler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub hits: u64,
    pub misses: u64,
}

impl Verification {
    /// Measured miss rate in percent.
    #[must_use]
    pub fn miss_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            return 0.0;
        }
        100.0 * self.misses as f64 / (self.hits + self.misses) as f64
    }
}

/// Write the per-kernel report: hardware header, the baseline reuse
/// distance histogram in ascending distance order, and the modelled
/// miss breakdown.
pub fn write_report(
    writer: &mut impl Write,
    hardware: &Settings,
    histogram: &Histogram,
    breakdown: &MissBreakdown,
) -> eyre::Result<()> {
    writeln!(writer, "line_size: {}", hardware.line_size)?;
    writeln!(writer, "cache_bytes: {}", hardware.cache_bytes)?;
    writeln!(writer, "cache_lines: {}", hardware.cache_lines)?;
    writeln!(writer, "cache_ways: {}", hardware.cache_ways)?;
    writeln!(writer, "cache_sets: {}", hardware.cache_sets)?;

    writeln!(writer, "\nhistogram:")?;
    for (distance, frequency) in histogram.sorted() {
        writeln!(writer, "{distance} {frequency}")?;
    }
    writeln!(writer)?;

    writeln!(writer, "modelled_accesses: {}", breakdown.accesses())?;
    for kind in MissKind::iter() {
        writeln!(writer, "modelled_misses({kind}): {}", breakdown.get(kind))?;
    }
    writeln!(
        writer,
        "modelled_misses(tot_associativity): {}",
        breakdown.total_associativity
    )?;
    writeln!(
        writer,
        "modelled_misses(tot_latency): {}",
        breakdown.total_latency
    )?;
    writeln!(writer, "modelled_misses(tot_mshr): {}", breakdown.total_mshr)?;
    writeln!(writer, "modelled_hits: {}", breakdown.hits)?;
    writeln!(writer, "modelled_miss_rate: {}", breakdown.miss_rate())?;
    Ok(())
}

/// Write the report to `path`, truncating any previous one.
pub fn write_report_file(
    path: impl AsRef<Path>,
    hardware: &Settings,
    histogram: &Histogram,
    breakdown: &MissBreakdown,
) -> eyre::Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)
        .wrap_err_with(|| format!("could not create output file {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    write_report(&mut writer, hardware, histogram, breakdown)?;
    writer.flush()?;
    Ok(())
}

/// Log the most frequent reuse distances of a histogram.
pub fn log_top_distances(histogram: &Histogram) {
    let top = histogram
        .sorted()
        .into_iter()
        .sorted_by_key(|&(_, frequency)| Reverse(frequency))
        .take(LOG_MAX_DISTANCES);
    for (distance, frequency) in top {
        if distance == crate::INF {
            log::info!("[inf] => {frequency}");
        } else {
            log::info!("[{distance}] => {frequency}");
        }
    }
}

/// Parse profiler verification data: hits, then misses.
pub fn read_verification(reader: impl BufRead) -> eyre::Result<Verification> {
    let mut counts = [0u64; 2];
    let mut tokens = Vec::new();
    for line in reader.lines() {
        let line = line.wrap_err("failed to read verification data")?;
        tokens.extend(line.split_whitespace().map(str::to_owned));
    }
    for (i, count) in counts.iter_mut().enumerate() {
        let token = tokens.get(i).ok_or(Error::MissingCounts)?;
        *count = token.parse().map_err(|source| Error::InvalidCount {
            value: token.clone(),
            source,
        })?;
    }
    Ok(Verification {
        hits: counts[0],
        misses: counts[1],
    })
}

/// Read the profiler counts next to a kernel's trace, if present.
pub fn read_verification_file(path: impl AsRef<Path>) -> eyre::Result<Option<Verification>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("could not read verification file {}", path.display()))?;
    let verification = read_verification(std::io::BufReader::new(file))
        .wrap_err_with(|| format!("malformed verification file {}", path.display()))?;
    Ok(Some(verification))
}

/// Append the measured counts to an existing report file.
pub fn append_verification(
    path: impl AsRef<Path>,
    verification: &Verification,
) -> eyre::Result<()> {
    let path = path.as_ref();
    let file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("could not append to output file {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    writeln!(writer)?;
    writeln!(writer, "verified_misses: {}", verification.misses)?;
    writeln!(writer, "verified_hits: {}", verification.hits)?;
    writeln!(writer, "verified_miss_rate: {}", verification.miss_rate())?;
    writer.flush()?;
    Ok(())
}
