use std::sync::OnceLock;

const PARALLEL_CHUNK_ALIGNMENT_PIXELS: usize = 256;

/// Pre-initialize the conversion thread pool so the first saved frame
/// doesn't pay the pool-creation cost. Safe to call multiple times; only
/// the first call has any effect.
pub(crate) fn warmup_pool(max_workers: usize) {
    install_conversion_pool(max_workers, || {});
}

#[inline(always)]
pub(crate) fn should_parallelize(
    pixel_count: usize,
    min_pixels: usize,
    min_chunk_pixels: usize,
    max_workers: usize,
) -> bool {
    let workers = conversion_workers(max_workers);
    if workers <= 1 {
        return false;
    }
    let min_chunk_total = min_chunk_pixels.saturating_mul(workers);
    pixel_count >= min_pixels.max(min_chunk_total)
}

#[inline(always)]
pub(crate) fn parallel_chunk_pixels(
    pixel_count: usize,
    min_chunk_pixels: usize,
    max_workers: usize,
) -> Option<usize> {
    let workers = conversion_workers(max_workers);
    let mut chunk_pixels = pixel_count / workers;

    if chunk_pixels < min_chunk_pixels {
        return None;
    }

    chunk_pixels -= chunk_pixels % PARALLEL_CHUNK_ALIGNMENT_PIXELS;
    if chunk_pixels == 0 || pixel_count.div_ceil(chunk_pixels) < 2 {
        return None;
    }

    Some(chunk_pixels)
}

#[inline]
pub(crate) fn conversion_workers(max_workers: usize) -> usize {
    static WORKERS: OnceLock<usize> = OnceLock::new();
    (*WORKERS.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }))
    .min(max_workers.max(1))
}

/// Run `job` inside the dedicated conversion pool, or inline when the
/// machine has a single core or the pool could not be built.
#[inline]
pub(crate) fn install_conversion_pool<F, R>(max_workers: usize, job: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    if let Some(pool) = POOL
        .get_or_init(|| {
            let workers = conversion_workers(max_workers);
            if workers <= 1 {
                return None;
            }
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|index| format!("snow-timelapse-convert-{index}"))
                .build()
                .ok()
        })
        .as_ref()
    {
        pool.install(job)
    } else {
        job()
    }
}
