use clap::Parser;
use color_eyre::eyre::{self, ensure, eyre};
use rand::rngs::StdRng;
use rand::SeedableRng;
use reusesim::config::Settings;
use reusesim::model::model_core;
use reusesim::output;
use reusesim::scheduler::schedule_threads;
use reusesim::stats::MissBreakdown;
use reusesim::trace::{read_trace_file, KernelTrace};
use std::path::{Path, PathBuf};

/// A reuse distance based GPU L1 cache model.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Options {
    /// Benchmark to model: traces are read from
    /// `<output-dir>/<bench>/<bench>_NN.trc`.
    bench: String,

    /// Hardware configuration file.
    #[arg(long, default_value = "configurations/current.conf")]
    config: PathBuf,

    /// Directory holding the per-benchmark trace and report files.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Seed for the memory latency distribution; random when absent.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let options = Options::parse();

    let hardware = Settings::from_file(&options.config)?;
    log::info!(
        "cache configuration: ~{}KB, {} byte lines, {} ways, {} sets",
        hardware.cache_bytes / 1024,
        hardware.line_size,
        hardware.cache_ways,
        hardware.cache_sets,
    );

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // one trace per kernel launch, until the first missing file
    let bench_dir = options.output_dir.join(&options.bench);
    for kernel_id in 0u32.. {
        let kernel_name = format!("{}_{:02}", options.bench, kernel_id);
        let trace_path = bench_dir.join(format!("{kernel_name}.trc"));
        let Some(trace) = read_trace_file(&trace_path)? else {
            if kernel_id == 0 {
                return Err(eyre!("could not read trace file {}", trace_path.display()));
            }
            break;
        };
        model_kernel(&kernel_name, trace, &bench_dir, &hardware, &mut rng)?;
    }
    Ok(())
}

fn model_kernel(
    kernel_name: &str,
    trace: KernelTrace,
    bench_dir: &Path,
    hardware: &Settings,
    rng: &mut StdRng,
) -> eyre::Result<()> {
    let block_size = trace.block_dim.size();
    ensure!(
        block_size > 0,
        "kernel {kernel_name}: empty block dimensions {}",
        trace.block_dim
    );

    let mut threads = trace.threads;
    let hierarchy = schedule_threads(&mut threads, hardware, block_size);

    // a single core is modelled
    let core_id = 0;
    let hardware_active_blocks = (hardware.max_active_threads / block_size)
        .min(hardware.max_active_blocks);
    let active_blocks = hierarchy.cores[core_id].len().min(hardware_active_blocks);
    ensure!(
        active_blocks > 0,
        "kernel {kernel_name}: blocks of {block_size} threads exceed the core's capacity"
    );
    log::info!("kernel {kernel_name}: running {active_blocks} block(s) at a time");

    let histograms = model_core(
        &hierarchy,
        core_id,
        &mut threads,
        active_blocks,
        hardware,
        rng,
    )?;
    let breakdown = MissBreakdown::from_histograms(&histograms, hardware);
    output::log_top_distances(&histograms[0]);
    log::info!(
        "kernel {kernel_name}: {} + {} + {} + {} + {} = {} misses, {} hits, miss rate {:.2}%",
        breakdown.compulsory,
        breakdown.capacity,
        breakdown.associativity,
        breakdown.latency,
        breakdown.mshr,
        breakdown.total,
        breakdown.hits,
        breakdown.miss_rate(),
    );

    let report_path = bench_dir.join(format!("{kernel_name}.out"));
    output::write_report_file(&report_path, hardware, &histograms[0], &breakdown)?;

    // measured counts from a profiler run, when available
    let verification_path = bench_dir.join(format!("{kernel_name}.prof"));
    match output::read_verification_file(&verification_path)? {
        Some(verification) => {
            log::info!(
                "kernel {kernel_name}: verified {} misses, {} hits, miss rate {:.2}%",
                verification.misses,
                verification.hits,
                verification.miss_rate(),
            );
            output::append_verification(&report_path, &verification)?;
        }
        None => log::info!("kernel {kernel_name}: no verification data, skipping"),
    }
    Ok(())
}
