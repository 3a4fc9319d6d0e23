use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::consts::{BATCH_SHUFFLE_SEED, WORKING_SET_FACTOR};
use crate::error::{Result, StackError};

/// Batch partition of the input set under the memory budget.
#[derive(Clone, Debug)]
pub struct BatchPlan {
    /// Input indices in deterministic shuffled order; batches are
    /// contiguous runs of this permutation.
    pub order: Vec<usize>,
    pub batch_size: usize,
    pub num_batches: usize,
    /// Concurrent whole-frame tasks permitted by the budget and CPU count.
    pub image_parallelism: usize,
}

impl BatchPlan {
    /// The input indices of batch `b`.
    pub fn batch(&self, b: usize) -> &[usize] {
        let start = b * self.batch_size;
        let end = ((b + 1) * self.batch_size).min(self.order.len());
        &self.order[start..end]
    }
}

/// Partition `frame_count` inputs into batches that fit the memory budget.
///
/// The per-frame working set is `w * h * 4 * F` bytes with F covering raw,
/// calibrated, background, aligned and scratch buffers. Inputs are
/// shuffled with a fixed seed before partitioning so batch 0 is a
/// representative sample of the night. Fails fast when the budget cannot
/// hold even one frame.
pub fn plan_batches(
    frame_count: usize,
    axes: (usize, usize),
    memory_mib: usize,
) -> Result<BatchPlan> {
    let (width, height) = axes;
    let budget_mib = if memory_mib > 0 {
        memory_mib
    } else {
        default_memory_budget_mib()
    };

    let frame_bytes = width * height * std::mem::size_of::<f32>() * WORKING_SET_FACTOR;
    let max_concurrent = (budget_mib << 20) / frame_bytes.max(1);
    if max_concurrent == 0 {
        return Err(StackError::MemoryBudget {
            budget_mib,
            width,
            height,
        });
    }

    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let image_parallelism = max_concurrent.min(cpu_count);

    let batch_size = max_concurrent.min(frame_count).max(1);
    let num_batches = frame_count.div_ceil(batch_size);

    let mut order: Vec<usize> = (0..frame_count).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(BATCH_SHUFFLE_SEED);
    order.shuffle(&mut rng);

    info!(
        frames = frame_count,
        batches = num_batches,
        batch_size,
        budget_mib,
        image_parallelism,
        "Planned stacking batches"
    );

    Ok(BatchPlan {
        order,
        batch_size,
        num_batches,
        image_parallelism,
    })
}

/// Default stacking budget: 70% of physical memory, with a conservative
/// fallback when the probe fails.
pub fn default_memory_budget_mib() -> usize {
    physical_memory_mib()
        .map(|total| total * 7 / 10)
        .unwrap_or(4096)
}

/// Total physical memory in MiB, best effort.
fn physical_memory_mib() -> Option<usize> {
    #[cfg(target_os = "linux")]
    {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                let kb: usize = rest.split_whitespace().next()?.parse().ok()?;
                return Some(kb / 1024);
            }
        }
        None
    }

    #[cfg(target_os = "macos")]
    {
        let output = std::process::Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .ok()?;
        let bytes: usize = String::from_utf8(output.stdout).ok()?.trim().parse().ok()?;
        Some(bytes >> 20)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
