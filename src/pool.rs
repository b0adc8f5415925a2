//! Block parallel execution over a pe's local slice.
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use core_affinity::CoreId;
use crossbeam::channel::{self, Sender};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// An `f64` that worker threads can accumulate into
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(val: f64) -> AtomicF64 {
        AtomicF64 {
            bits: AtomicU64::new(val.to_bits()),
        }
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }

    /// returns the previous value
    pub fn fetch_add(&self, val: f64) -> f64 {
        let mut cur = self.bits.load(Ordering::Relaxed);
        loop {
            let new = (f64::from_bits(cur) + val).to_bits();
            match self
                .bits
                .compare_exchange_weak(cur, new, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(prev) => return f64::from_bits(prev),
                Err(actual) => cur = actual,
            }
        }
    }
}

/// `threads` threads, the caller plus `threads - 1` long lived workers, each taking
/// blocks of `block_size` points at a time.
///
/// Workers are spawned once and fed jobs through a crossbeam channel for the life of
/// the pool. When cores are given, worker `i` pins itself to `cores[i % cores.len()]`;
/// the caller is expected to already sit on `cores[0]`.
pub struct WorkPool {
    threads: usize,
    block_size: usize,
    worker_cores: Vec<Option<usize>>,
    injector: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkPool")
            .field("threads", &self.threads)
            .field("block_size", &self.block_size)
            .field("worker_cores", &self.worker_cores)
            .finish()
    }
}

impl WorkPool {
    pub fn new(threads: usize, block_size: usize) -> WorkPool {
        WorkPool::with_cores(threads, block_size, &[])
    }

    pub fn with_cores(threads: usize, block_size: usize, cores: &[CoreId]) -> WorkPool {
        let threads = threads.max(1);
        let core_for = |i: usize| {
            if cores.is_empty() {
                None
            } else {
                Some(cores[i % cores.len()])
            }
        };
        let (injector, jobs) = channel::unbounded::<Job>();
        let mut handles = vec![];
        let mut worker_cores = vec![core_for(0).map(|c| c.id)];
        for i in 1..threads {
            let jobs = jobs.clone();
            let core = core_for(i);
            let spawned = std::thread::Builder::new()
                .name(format!("symwave_worker_{}", i))
                .spawn(move || {
                    if let Some(core) = core {
                        core_affinity::set_for_current(core);
                    }
                    while let Ok(job) = jobs.recv() {
                        job();
                    }
                });
            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    worker_cores.push(core.map(|c| c.id));
                }
                Err(e) => {
                    warn!(error = %e, "unable to spawn worker thread, continuing with {}", i);
                    break;
                }
            }
        }
        debug!(?worker_cores, block_size, "work pool started");
        WorkPool {
            threads: handles.len() + 1,
            block_size: block_size.max(1),
            worker_cores,
            injector: if handles.is_empty() { None } else { Some(injector) },
            handles,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// core id of each thread, index 0 is the calling thread
    pub fn worker_cores(&self) -> &[Option<usize>] {
        &self.worker_cores
    }

    /// Run `op(start, block)` over disjoint blocks of `data`, `start` is the index of
    /// `block[0]` within `data`.
    ///
    /// Blocks may run in any order and on any thread. A panic in `op` is resumed on the
    /// calling thread once every thread has stopped touching `data`.
    pub fn for_each_block<T, F>(&self, data: &mut [T], op: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        self.run_blocks(data, self.block_size, &op);
    }

    fn run_blocks<T, F>(&self, data: &mut [T], block_size: usize, op: &F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        let num_blocks = (data.len() + block_size - 1) / block_size;
        let injector = match &self.injector {
            Some(injector) if num_blocks > 1 => injector,
            _ => {
                for (i, block) in data.chunks_mut(block_size).enumerate() {
                    op(i * block_size, block);
                }
                return;
            }
        };

        let (block_tx, block_rx) = channel::unbounded();
        for (i, block) in data.chunks_mut(block_size).enumerate() {
            // the receiver is alive in this scope
            let _ = block_tx.send((i * block_size, block));
        }
        drop(block_tx);

        let (done_tx, done_rx) = channel::unbounded::<std::thread::Result<()>>();
        for _ in 0..self.handles.len().min(num_blocks - 1) {
            let block_rx = block_rx.clone();
            let done_tx = done_tx.clone();
            let job: Box<dyn FnOnce() + Send + '_> = Box::new(move || {
                let res = panic::catch_unwind(AssertUnwindSafe(|| {
                    while let Ok((start, block)) = block_rx.recv() {
                        op(start, block);
                    }
                }));
                let _ = done_tx.send(res);
            });
            // Safety: the borrows of `op` and `data` held by the job outlive it, this call
            // does not return before every job has been run or dropped (see `done_rx` below)
            let job: Job = unsafe { std::mem::transmute(job) };
            // a job refused by the channel is dropped right here
            let _ = injector.send(job);
        }
        drop(done_tx);

        let mine = panic::catch_unwind(AssertUnwindSafe(|| {
            while let Ok((start, block)) = block_rx.recv() {
                op(start, block);
            }
        }));
        drop(block_rx);

        let mut first_panic: Option<Box<dyn Any + Send>> = mine.err();
        // disconnects once the last job has dropped its sender
        while let Ok(res) = done_rx.recv() {
            if let Err(payload) = res {
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    /// Like [WorkPool::for_each_block] over an immutable slice, summing each block's partial
    /// result into one accumulator.
    pub fn sum_blocks<T, F>(&self, data: &[T], op: F) -> f64
    where
        T: Sync,
        F: Fn(usize, &[T]) -> f64 + Sync,
    {
        let acc = AtomicF64::new(0.0);
        let mut starts: Vec<usize> = (0..data.len()).step_by(self.block_size).collect();
        self.run_blocks(&mut starts, 1, &|_, chunk: &mut [usize]| {
            for start in chunk.iter() {
                let end = (start + self.block_size).min(data.len());
                acc.fetch_add(op(*start, &data[*start..end]));
            }
        });
        acc.load()
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        drop(self.injector.take());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
