use crate::config::MAX_THREADS;
use crate::thread::{Access, Direction, Thread};
use color_eyre::eyre::{self, WrapErr};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;

/// Thread block dimensions from a trace header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim {
    #[must_use]
    pub fn size(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }
}

impl std::fmt::Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing `blocksize: x y z` header")]
    MissingHeader,
    #[error("line {line}: expected `tid dir addr bytes`")]
    InvalidRecord { line: usize },
    #[error("trace contains no memory accesses")]
    Empty,
}

/// A parsed kernel trace: per-thread access lists and block dimensions.
///
/// Only loads are retained; stores bypass the modelled L1.
#[derive(Debug)]
pub struct KernelTrace {
    pub threads: Vec<Thread>,
    pub block_dim: Dim,
    pub num_accesses: u64,
}

/// Parse a `.trc` trace.
///
/// Line 1 holds the block dimensions; every further non-empty line is a
/// whitespace-separated `tid dir addr bytes` record. The thread count
/// is the largest thread id plus one, capped at [`MAX_THREADS`].
pub fn read_trace(reader: impl BufRead) -> eyre::Result<KernelTrace> {
    let mut lines = reader.lines().enumerate();

    let (_, header) = lines.next().ok_or(Error::MissingHeader)?;
    let header = header.wrap_err("failed to read trace")?;
    let block_dim = parse_header(&header).ok_or(Error::MissingHeader)?;

    let mut threads = vec![Thread::default(); MAX_THREADS];
    let mut num_threads = 0usize;
    let mut num_accesses = 0u64;

    for (index, line) in lines {
        let line = line.wrap_err("failed to read trace")?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(&line).ok_or(Error::InvalidRecord { line: index + 1 })?;
        let (tid, direction, address, bytes) = record;

        // stores are not cached
        if direction != Direction::Read {
            continue;
        }
        if tid >= MAX_THREADS {
            log::warn!("dropping access of thread {tid}, only {MAX_THREADS} threads are supported");
            continue;
        }
        num_accesses += 1;
        num_threads = num_threads.max(tid + 1);
        threads[tid].append_access(Access::new(direction, address, bytes));
    }

    if num_accesses == 0 || num_threads == 0 {
        return Err(Error::Empty.into());
    }
    threads.truncate(num_threads);

    log::info!(
        "blocksize {block_dim}, {num_threads} thread(s), {num_accesses} load(s)"
    );
    Ok(KernelTrace {
        threads,
        block_dim,
        num_accesses,
    })
}

/// Read the trace for one kernel; `None` when the file does not exist,
/// which ends the per-benchmark kernel loop.
pub fn read_trace_file(path: impl AsRef<Path>) -> eyre::Result<Option<KernelTrace>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("could not read trace file {}", path.display()))?;
    let trace = read_trace(std::io::BufReader::new(file))
        .wrap_err_with(|| format!("'{}' is not a valid memory access trace", path.display()))?;
    Ok(Some(trace))
}

fn parse_header(line: &str) -> Option<Dim> {
    let mut tokens = line.split_whitespace();
    // the identifier token is not checked, only its shape
    tokens.next()?;
    let x = tokens.next()?.parse().ok()?;
    let y = tokens.next()?.parse().ok()?;
    let z = tokens.next()?.parse().ok()?;
    Some(Dim { x, y, z })
}

fn parse_record(line: &str) -> Option<(usize, Direction, u64, u32)> {
    let mut tokens = line.split_whitespace();
    let tid = tokens.next()?.parse().ok()?;
    let direction = match tokens.next()? {
        "0" => Direction::Read,
        "1" => Direction::Write,
        _ => return None,
    };
    let address = tokens.next()?.parse().ok()?;
    let bytes = tokens.next()?.parse().ok()?;
    Some((tid, direction, address, bytes))
}
