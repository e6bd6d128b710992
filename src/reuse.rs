use crate::config::Settings;
use crate::pool::Pool;
use crate::requests::Requests;
use crate::scheduler::Hierarchy;
use crate::stats::Histogram;
use crate::thread::Thread;
use crate::tree::Tree;
use crate::{address, INF};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;

/// Slack added when sizing a per-set stack tree; absorbs stack growth
/// ahead of the first reuses.
pub const STACK_EXTRA_SIZE: u64 = 256;

/// Per-run cache parameters; the classifier cases vary these while the
/// hardware settings stay fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub cache_sets: usize,
    pub cache_ways: u64,
    pub mem_latency: u64,
    pub mem_latency_stddev: u64,
    pub non_mem_latency: u64,
    pub num_mshr: u64,
}

impl From<&Settings> for RunConfig {
    fn from(hardware: &Settings) -> Self {
        Self {
            cache_sets: hardware.cache_sets as usize,
            cache_ways: hardware.cache_ways,
            mem_latency: hardware.mem_latency,
            mem_latency_stddev: hardware.mem_latency_stddev,
            non_mem_latency: hardware.non_mem_latency,
            num_mshr: hardware.num_mshr,
        }
    }
}

/// Compute the reuse-distance histogram for one core.
///
/// Warps are consumed round-robin over windows of `active_blocks`
/// blocks. A distance is measured at issue against the per-set stack,
/// but the stack itself is only updated when the request completes
/// (after its hit or miss latency), so latency reorders line installs
/// the way the hardware does. The histogram must be empty at entry;
/// every thread's program counter is reset before returning.
#[allow(clippy::too_many_arguments)]
pub fn reuse_distance(
    hierarchy: &Hierarchy,
    core_id: usize,
    threads: &mut [Thread],
    histogram: &mut Histogram,
    active_blocks: usize,
    hardware: &Settings,
    run: &RunConfig,
    latency: &Normal<f64>,
    rng: &mut impl Rng,
) {
    assert!(active_blocks > 0);
    let num_sets = run.cache_sets;

    // Count the accesses that survive coalescing, per set. An access
    // straddling a line boundary is counted in both sets; the straddle
    // test uses the original address and the possibly-raised end.
    let mut per_set_accesses = vec![0u64; num_sets];
    for thread in threads.iter_mut() {
        while !thread.is_done() {
            let access = thread.schedule();
            if access.width != 0 {
                let line_addr = access.address / hardware.line_size;
                let set = hardware.mapping.set_index(line_addr, num_sets as u64) as usize;
                per_set_accesses[set] += 1;

                let end_line_addr = access.end_address / hardware.line_size;
                if line_addr != end_line_addr {
                    let set = hardware.mapping.set_index(end_line_addr, num_sets as u64) as usize;
                    per_set_accesses[set] += 1;
                }
            }
        }
        thread.reset();
    }
    let grand_total: u64 = per_set_accesses.iter().sum();

    // One stack per set, plus the global last-use map.
    let mut stacks: Vec<Tree> = per_set_accesses
        .iter()
        .map(|&count| Tree::new(count + STACK_EXTRA_SIZE))
        .collect();
    let mut last_use: HashMap<address, u64> = HashMap::new();
    let mut set_counters = vec![1u64; num_sets];
    let mut timestamp = 0u64;

    let core = &hierarchy.cores[core_id];
    let num_windows = core.len().div_ceil(active_blocks);
    log::debug!(
        "core {core_id}: {num_windows} window(s) of {active_blocks} active block(s), {grand_total} accesses"
    );

    for window in 0..num_windows {
        let mut pool = Pool::new();
        let window_start = window * active_blocks;
        let window_stop = (window_start + active_blocks).min(core.len());
        for &block_id in &core[window_start..window_stop] {
            for &warp_id in &hierarchy.blocks[block_id] {
                pool.add_warp(warp_id, 0);
            }
        }
        pool.set_size();

        let mut hit_books: Vec<Requests> = (0..num_sets).map(|_| Requests::new()).collect();
        let mut miss_books: Vec<Requests> = (0..num_sets).map(|_| Requests::new()).collect();

        while !pool.is_done() {
            // MSHR occupancy snapshot; not refreshed while the warp issues.
            let num_miss_requests: u64 = miss_books
                .iter()
                .map(|book| book.num_unique() as u64)
                .sum();

            if let Some(warp_id) = pool.take_warp() {
                let warp = &hierarchy.warps[warp_id];
                let mut max_future_time = 0u64;
                let mut threads_done = 0usize;

                // Transactions are issued per 4-byte slice of the warp;
                // the first thread's size decides the slicing even when
                // its own access was absorbed.
                let bytes = warp
                    .first()
                    .map_or(1, |&tid| threads[tid].next_bytes());
                let portions = (bytes / 4).max(1) as usize;
                'portions: for portion in 0..portions {
                    let slice_start = portion * (hardware.warp_size / portions);
                    let slice_stop = (portion + 1) * (hardware.warp_size / portions);

                    for tnum in slice_start..slice_stop.min(warp.len()) {
                        let tid = warp[tnum];
                        if threads[tid].is_done() {
                            threads_done += 1;
                            continue;
                        }

                        let access = threads[tid].schedule();
                        if access.width == 0 {
                            continue;
                        }

                        let line_addr = access.address / hardware.line_size;
                        let set =
                            hardware.mapping.set_index(line_addr, num_sets as u64) as usize;
                        assert!(set < num_sets);

                        let previous_time = last_use.get(&line_addr).copied();
                        let distance = match previous_time {
                            Some(previous_time) => {
                                debug_assert!(previous_time < set_counters[set]);
                                stacks[set].count(previous_time)
                            }
                            None => INF,
                        };

                        if distance >= run.cache_ways {
                            // miss: sample the half-normal latency tail
                            let noise = latency.sample(rng).round().abs() as u64;
                            let memory_latency = run.mem_latency + noise;
                            let arrival_time = timestamp + memory_latency;
                            if memory_latency > max_future_time {
                                max_future_time = memory_latency;
                            }

                            // Out of MSHRs: the leading thread backs off and
                            // the whole warp retries next tick.
                            if num_miss_requests >= run.num_mshr && tnum == 0 {
                                threads[tid].unschedule();
                                max_future_time = 0;
                                break 'portions;
                            }
                            miss_books[set].add(line_addr, arrival_time, set);
                        } else {
                            let arrival_time = timestamp + run.non_mem_latency;
                            hit_books[set].add(line_addr, arrival_time, set);
                        }
                        histogram.record(distance);
                    }

                    drain_requests(
                        &mut hit_books,
                        &mut miss_books,
                        timestamp,
                        &mut last_use,
                        &mut stacks,
                        &mut set_counters,
                    );
                }

                if threads_done == warp.len() {
                    pool.done += 1;
                } else {
                    pool.add_warp(warp_id, max_future_time);
                }
            }

            drain_requests(
                &mut hit_books,
                &mut miss_books,
                timestamp,
                &mut last_use,
                &mut stacks,
                &mut set_counters,
            );
            pool.process_warps_in_flight();
            timestamp += 1;
        }
    }

    for thread in threads.iter_mut() {
        thread.reset();
    }

    let recorded = histogram.total();
    if recorded != grand_total {
        log::warn!("recorded {recorded} distances for {grand_total} scheduled accesses");
    }
}

/// Complete every request that matured at `timestamp`: hits before
/// misses, sets in ascending order.
fn drain_requests(
    hit_books: &mut [Requests],
    miss_books: &mut [Requests],
    timestamp: u64,
    last_use: &mut HashMap<address, u64>,
    stacks: &mut [Tree],
    set_counters: &mut [u64],
) {
    for set in 0..stacks.len() {
        complete_requests(
            &mut hit_books[set],
            timestamp,
            last_use,
            &mut stacks[set],
            &mut set_counters[set],
        );
        complete_requests(
            &mut miss_books[set],
            timestamp,
            last_use,
            &mut stacks[set],
            &mut set_counters[set],
        );
    }
}

/// Install the lines of all requests maturing at `timestamp`: the
/// previous stack position (if any) is vacated, the line moves to the
/// top of its set's stack.
fn complete_requests(
    requests: &mut Requests,
    timestamp: u64,
    last_use: &mut HashMap<address, u64>,
    stack: &mut Tree,
    set_counter: &mut u64,
) {
    if !requests.has_requests(timestamp) {
        return;
    }
    for request in requests.take_requests(timestamp) {
        if let Some(&previous_time) = last_use.get(&request.line_addr) {
            stack.unset(previous_time);
        }
        last_use.insert(request.line_addr, *set_counter);
        stack.set(*set_counter);
        *set_counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{reuse_distance, RunConfig};
    use crate::config::Settings;
    use crate::scheduler::schedule_threads;
    use crate::set_index::Mapping;
    use crate::stats::Histogram;
    use crate::thread::{Access, Direction, Thread};
    use crate::INF;
    use color_eyre::eyre;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::Normal;
    use std::collections::HashMap;

    fn read(address: u64, bytes: u32) -> Access {
        Access::new(Direction::Read, address, bytes)
    }

    /// 4-way, single-set, 4-byte-line cache with deterministic latency.
    fn tiny_settings(mem_latency: u64, num_mshr: u64) -> Settings {
        let mut settings = Settings::new(4, 16, 4, num_mshr, mem_latency, 0).unwrap();
        settings.mapping = Mapping::Linear;
        settings
    }

    fn run(
        threads: &mut [Thread],
        hardware: &Settings,
        block_size: usize,
    ) -> eyre::Result<Histogram> {
        let hierarchy = schedule_threads(threads, hardware, block_size);
        let active_blocks = hierarchy.cores[0]
            .len()
            .min(hardware.max_active_threads / block_size)
            .min(hardware.max_active_blocks);
        let run_config = RunConfig::from(hardware);
        let latency = Normal::new(0.0, run_config.mem_latency_stddev as f64)?;
        let mut rng = StdRng::seed_from_u64(7);
        let mut histogram = Histogram::default();
        reuse_distance(
            &hierarchy,
            0,
            threads,
            &mut histogram,
            active_blocks,
            hardware,
            &run_config,
            &latency,
            &mut rng,
        );
        Ok(histogram)
    }

    #[test]
    fn repeated_access_to_one_line() -> eyre::Result<()> {
        let hardware = tiny_settings(10, 4);
        let mut threads = vec![Thread::default()];
        threads[0].append_access(read(0, 4));
        threads[0].append_access(read(0, 4));

        let histogram = run(&mut threads, &hardware, 1)?;
        assert_eq!(
            histogram.distances,
            HashMap::from([(INF, 1), (0, 1)])
        );
        // program counters are reset for the next configuration
        assert!(!threads[0].is_done());
        Ok(())
    }

    #[test]
    fn coalesced_warp_issues_one_access() -> eyre::Result<()> {
        let hardware = Settings::default();
        let mut threads: Vec<Thread> = (0..32u64)
            .map(|tid| {
                let mut thread = Thread::default();
                thread.append_access(read(tid * 4, 4));
                thread
            })
            .collect();

        let histogram = run(&mut threads, &hardware, 32)?;
        assert_eq!(histogram.distances, HashMap::from([(INF, 1)]));
        Ok(())
    }

    #[test]
    fn capacity_overflow_evicts_the_oldest_line() -> eyre::Result<()> {
        let hardware = tiny_settings(0, 4);
        let mut threads = vec![Thread::default()];
        // six distinct lines, then back to the first
        for line in 0..6u64 {
            threads[0].append_access(read(line * 4, 4));
        }
        threads[0].append_access(read(0, 4));

        let histogram = run(&mut threads, &hardware, 1)?;
        assert_eq!(
            histogram.distances,
            HashMap::from([(INF, 6), (5, 1)])
        );
        Ok(())
    }

    #[test]
    fn second_warp_hits_after_the_first_completes() -> eyre::Result<()> {
        // zero latency: the install happens in the same tick
        let hardware = tiny_settings(0, 4);
        let mut threads = vec![Thread::default(); 64];
        threads[0].append_access(read(0, 4));
        threads[32].append_access(read(0, 4));

        let histogram = run(&mut threads, &hardware, 64)?;
        assert_eq!(
            histogram.distances,
            HashMap::from([(INF, 1), (0, 1)])
        );
        Ok(())
    }

    #[test]
    fn mshr_saturation_retries_the_blocked_warp() -> eyre::Result<()> {
        let hardware = tiny_settings(2, 1);
        let mut threads = vec![Thread::default(); 64];
        threads[0].append_access(read(0, 4));
        threads[32].append_access(read(4, 4));

        let histogram = run(&mut threads, &hardware, 64)?;
        // both representatives miss; the second is delayed, not dropped
        assert_eq!(histogram.distances, HashMap::from([(INF, 2)]));
        Ok(())
    }

    #[test]
    fn single_mshr_turns_the_second_use_into_a_hit() -> eyre::Result<()> {
        let hardware = tiny_settings(2, 1);
        let mut threads = vec![Thread::default(); 64];
        threads[0].append_access(read(0, 4));
        threads[32].append_access(read(0, 4));

        let histogram = run(&mut threads, &hardware, 64)?;
        assert_eq!(
            histogram.distances,
            HashMap::from([(INF, 1), (0, 1)])
        );
        Ok(())
    }

    #[test]
    fn line_straddling_accesses_count_twice() -> eyre::Result<()> {
        let hardware = tiny_settings(0, 4);
        let mut threads = vec![Thread::default()];
        // 8 bytes starting mid-line: spans lines 0 and 1
        threads[0].append_access(read(2, 8));

        let histogram = run(&mut threads, &hardware, 1)?;
        // the issue loop only walks the first line; the pre-count sees two
        assert_eq!(histogram.total(), 1);
        Ok(())
    }

    #[test]
    fn histogram_total_matches_the_scheduled_accesses() -> eyre::Result<()> {
        let hardware = Settings::default();
        let mut threads: Vec<Thread> = (0..64u64)
            .map(|tid| {
                let mut thread = Thread::default();
                for column in 0..4u64 {
                    thread.append_access(read((tid * 32 + column * 4096) % 65536, 4));
                }
                thread
            })
            .collect();

        let histogram = run(&mut threads, &hardware, 32)?;
        // coalescing survivors are exactly what the engine replays
        let representatives: u64 = threads
            .iter()
            .flat_map(|thread| &thread.accesses)
            .filter(|access| access.width != 0)
            .count() as u64;
        assert_eq!(histogram.total(), representatives);
        Ok(())
    }
}
