use crate::config::Settings;
use crate::reuse::{reuse_distance, RunConfig};
use crate::scheduler::Hierarchy;
use crate::stats::{Histogram, NUM_CASES};
use crate::thread::Thread;
use crate::INF;
use color_eyre::eyre;
use rand::Rng;
use rand_distr::Normal;

/// Run the reuse-distance engine once per classifier case.
///
/// Case 0 is the full model; the other cases each disable one feature
/// so the miss breakdown can attribute its share: full associativity
/// (1), zero latencies (2), unlimited MSHRs (3). The hierarchy and
/// threads are reused across cases; the engine resets every program
/// counter before it returns.
pub fn model_core(
    hierarchy: &Hierarchy,
    core_id: usize,
    threads: &mut [Thread],
    active_blocks: usize,
    hardware: &Settings,
    rng: &mut impl Rng,
) -> eyre::Result<[Histogram; NUM_CASES]> {
    let mut histograms: [Histogram; NUM_CASES] = Default::default();
    for (case, histogram) in histograms.iter_mut().enumerate() {
        let mut run = RunConfig::from(hardware);
        match case {
            // a single set holding every way
            1 => {
                run.cache_sets = 1;
                run.cache_ways = hardware.cache_ways * hardware.cache_sets;
            }
            // hits and misses install in the issue tick
            2 => {
                run.mem_latency = 0;
                run.mem_latency_stddev = 0;
                run.non_mem_latency = 0;
            }
            3 => run.num_mshr = INF,
            _ => {}
        }
        log::info!(
            "case {case}: {} set(s), {} way(s), latency {}±{}, {} mshr",
            run.cache_sets,
            run.cache_ways,
            run.mem_latency,
            run.mem_latency_stddev,
            run.num_mshr,
        );
        let latency = Normal::new(0.0, run.mem_latency_stddev as f64)?;
        reuse_distance(
            hierarchy,
            core_id,
            threads,
            histogram,
            active_blocks,
            hardware,
            &run,
            &latency,
            rng,
        );
    }
    Ok(histograms)
}

#[cfg(test)]
mod tests {
    use super::model_core;
    use crate::config::Settings;
    use crate::scheduler::schedule_threads;
    use crate::set_index::Mapping;
    use crate::stats::MissBreakdown;
    use crate::thread::{Access, Direction, Thread};
    use crate::INF;
    use color_eyre::eyre;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn read(address: u64, bytes: u32) -> Access {
        Access::new(Direction::Read, address, bytes)
    }

    fn model(
        threads: &mut [Thread],
        hardware: &Settings,
        block_size: usize,
    ) -> eyre::Result<MissBreakdown> {
        let hierarchy = schedule_threads(threads, hardware, block_size);
        let active_blocks = hierarchy.cores[0]
            .len()
            .min(hardware.max_active_threads / block_size)
            .min(hardware.max_active_blocks);
        let mut rng = StdRng::seed_from_u64(99);
        let histograms = model_core(&hierarchy, 0, threads, active_blocks, hardware, &mut rng)?;
        Ok(MissBreakdown::from_histograms(&histograms, hardware))
    }

    #[test]
    fn all_cases_agree_on_a_single_reused_line() -> eyre::Result<()> {
        let hardware = Settings::default();
        let mut threads = vec![Thread::default()];
        threads[0].append_access(read(0, 4));
        threads[0].append_access(read(0, 4));

        let hierarchy = schedule_threads(&mut threads, &hardware, 1);
        let mut rng = StdRng::seed_from_u64(99);
        let histograms = model_core(&hierarchy, 0, &mut threads, 1, &hardware, &mut rng)?;

        for histogram in &histograms {
            assert_eq!(histogram.distances, HashMap::from([(INF, 1), (0, 1)]));
        }
        let breakdown = MissBreakdown::from_histograms(&histograms, &hardware);
        assert_eq!(breakdown.compulsory, 1);
        assert_eq!(breakdown.total, 1);
        assert_eq!(breakdown.hits, 1);
        assert!((breakdown.miss_rate() - 50.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn set_conflicts_surface_as_associativity_misses() -> eyre::Result<()> {
        // 2 ways x 4 sets of 4-byte lines; zero latency keeps the
        // distances exact
        let mut hardware = Settings::new(4, 32, 2, 4, 0, 0)?;
        hardware.mapping = Mapping::Linear;

        // four lines all in set 0, then the first again
        let mut threads = vec![Thread::default()];
        for line in [0u64, 4, 8, 12, 0] {
            threads[0].append_access(read(line * 4, 4));
        }

        let breakdown = model(&mut threads, &hardware, 1)?;
        assert_eq!(breakdown.compulsory, 4);
        assert_eq!(breakdown.associativity, 1);
        assert_eq!(breakdown.capacity, 0);
        assert_eq!(breakdown.latency, 0);
        assert_eq!(breakdown.mshr, 0);
        assert_eq!(breakdown.total, 5);
        assert_eq!(breakdown.hits, 0);
        Ok(())
    }

    #[test]
    fn compulsory_misses_count_the_unique_lines() -> eyre::Result<()> {
        let hardware = Settings::default();
        let mut threads = vec![Thread::default()];
        // three unique lines, some repeated
        for line in [0u64, 1, 2, 0, 1, 2, 0] {
            threads[0].append_access(read(line * 128, 4));
        }

        let breakdown = model(&mut threads, &hardware, 1)?;
        assert_eq!(breakdown.compulsory, 3);
        assert_eq!(breakdown.accesses(), 7);
        Ok(())
    }
}
