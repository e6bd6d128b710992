use crate::config::Settings;
use crate::thread::Thread;

/// Thread-to-warp-to-block-to-core assignment for one kernel launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    /// Ordered thread ids per warp.
    pub warps: Vec<Vec<usize>>,
    /// Ordered warp ids per block.
    pub blocks: Vec<Vec<usize>>,
    /// Ordered block ids per core; blocks are distributed round-robin.
    pub cores: Vec<Vec<usize>>,
}

/// Assign threads to warps, blocks and cores, then coalesce memory
/// accesses within each warp.
///
/// Coalescing is persistent: absorbed accesses keep `width == 0` for all
/// later phases, and a representative access may have its `end_address`
/// raised past the bytes its own thread touches.
pub fn schedule_threads(
    threads: &mut [Thread],
    hardware: &Settings,
    block_size: usize,
) -> Hierarchy {
    assert!(block_size > 0);
    let num_warps_per_block = block_size.div_ceil(hardware.warp_size);
    let num_blocks = threads.len().div_ceil(block_size);

    let mut hierarchy = Hierarchy {
        warps: vec![Vec::new(); num_warps_per_block * num_blocks],
        blocks: vec![Vec::new(); num_blocks],
        cores: vec![Vec::new(); hardware.num_cores],
    };

    for tid in 0..threads.len() {
        let warp_id =
            (tid % block_size) / hardware.warp_size + (tid / block_size) * num_warps_per_block;
        threads[tid].set_warp(warp_id);
        threads[tid].set_block(tid / block_size);
        hierarchy.warps[warp_id].push(tid);
    }
    for warp_id in 0..hierarchy.warps.len() {
        hierarchy.blocks[warp_id / num_warps_per_block].push(warp_id);
    }
    for block_id in 0..hierarchy.blocks.len() {
        hierarchy.cores[block_id % hardware.num_cores].push(block_id);
    }

    for warp in &hierarchy.warps {
        coalesce_warp(threads, warp, hardware);
    }
    hierarchy
}

/// Fuse per-thread accesses of one warp into cache-line transactions.
///
/// Walks the access columns; within a column threads are grouped into
/// full, half or quarter warps depending on the access size, and a
/// thread whose line was already loaded by an earlier thread of its
/// group has its access absorbed.
fn coalesce_warp(threads: &mut [Thread], warp: &[usize], hardware: &Settings) {
    let mut done = 0;
    let mut access = 0;
    while done < warp.len() {
        for (tnum, &tid) in warp.iter().enumerate() {
            if access < threads[tid].accesses.len() {
                let this = threads[tid].accesses[access];
                let schedule_length = match this.bytes {
                    8 => hardware.warp_size / 2,
                    16 => hardware.warp_size / 4,
                    _ => hardware.warp_size,
                };
                let this_line = this.address / hardware.line_size;

                let group_start = schedule_length * (tnum / schedule_length);
                for old_tnum in group_start..tnum {
                    let old_tid = warp[old_tnum];
                    // an earlier thread may have diverged and run out of accesses
                    let Some(old) = threads[old_tid].accesses.get(access).copied() else {
                        continue;
                    };
                    if this_line == old.address / hardware.line_size {
                        threads[tid].accesses[access].width = 0;
                        if this.address != old.address {
                            let earlier = &mut threads[old_tid].accesses[access];
                            earlier.end_address = earlier.end_address.max(this.end_address);
                            earlier.width += 1;
                        }
                        break;
                    }
                }
            } else if access == threads[tid].accesses.len() {
                done += 1;
            }
        }
        access += 1;
    }
}
