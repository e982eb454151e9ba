//! A process-wide cap on CPU-hungry external tools.
//!
//! `pdftotext`, `pdftocairo` and `tesseract` each keep a core busy. A batch
//! runs `jobs * page_jobs` pages at once, which can be far more than the
//! machine has cores, so every call to one of those tools takes a permit
//! first.

use std::sync::LazyLock;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// One permit per core.
static CPU_PERMITS: LazyLock<Semaphore> =
    LazyLock::new(|| Semaphore::new(num_cpus::get().max(1)));

/// Run `f` while holding a CPU permit.
#[instrument(level = "trace", skip_all)]
pub async fn with_cpu_permit<Func, Fut, R>(f: Func) -> Result<R>
where
    Func: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let _permit = CPU_PERMITS
        .acquire()
        .await
        .context("CPU permits are no longer available")?;
    trace!(available = CPU_PERMITS.available_permits(), "Acquired CPU permit");
    f().await
}

/// Take every CPU permit, the way a busy batch would.
#[cfg(test)]
pub async fn hold_all_cpu_permits() -> tokio::sync::SemaphorePermit<'static> {
    let permits = u32::try_from(num_cpus::get().max(1)).unwrap_or(u32::MAX);
    CPU_PERMITS
        .acquire_many(permits)
        .await
        .expect("CPU permits should be available")
}
