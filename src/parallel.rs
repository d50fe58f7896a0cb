use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;

pub fn run_in_pool<T, F>(n_jobs: Option<usize>, context: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    match n_jobs {
        Some(jobs) if jobs > 0 => {
            let pool = ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .context(context)?;
            Ok(pool.install(f))
        }
        _ => Ok(f()),
    }
}

pub fn collect_results<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(results.len());
    for res in results {
        out.push(res?);
    }
    Ok(out)
}

pub fn resolve_jobs(n_jobs: Option<usize>, tasks: usize) -> Option<usize> {
    match n_jobs {
        Some(jobs) if jobs > 0 => {
            let capped = jobs.min(tasks.max(1));
            if jobs > capped {
                tracing::warn!("Requested {jobs} workers for {tasks} tasks; using {capped}");
            }
            Some(capped)
        }
        _ => None,
    }
}
