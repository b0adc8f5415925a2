#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use symwave::{Backend, ReductionOrder, SolverParams, World, WorldBuilder};

static NEXT_JOB: AtomicUsize = AtomicUsize::new(0);

/// a job id no other test, in this or a concurrent test binary, is using
pub fn fresh_job_id() -> usize {
    (std::process::id() as usize) * 1000 + NEXT_JOB.fetch_add(1, Ordering::SeqCst)
}

/// Run `f` on `num_pes` pes, each a thread with its own world on the shmem fabric.
///
/// Results are returned in pe order.
pub fn run_pes<F, R>(num_pes: usize, f: F) -> Vec<R>
where
    F: Fn(World) -> R + Send + Sync + Clone + 'static,
    R: Send + 'static,
{
    let job_id = fresh_job_id();
    let handles: Vec<_> = (0..num_pes)
        .map(|pe| {
            let f = f.clone();
            std::thread::spawn(move || {
                let world = WorldBuilder::new()
                    .with_fabric(Backend::Shmem)
                    .with_topology(pe, num_pes, job_id)
                    .build()
                    .expect("unable to build world");
                f(world)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("pe panicked"))
        .collect()
}

pub fn params(num_points: usize) -> SolverParams {
    SolverParams {
        num_points,
        threads: 1,
        threads_per_block: 256,
        stability_factor: 0.5,
        safety_factor: 1.0 - 1.0e-5,
        period: 1.0,
        progress_interval: 0,
        reduction: ReductionOrder::Standard,
        bind_cores: false,
    }
}
