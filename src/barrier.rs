use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

use crate::warnings::RuntimeWarning;

/// One slot per pe, replicated on every pe.
///
/// `bases[pe]` points at the copy of the array held in `pe`'s segment.
pub(crate) struct FlagArray {
    bases: Vec<*const AtomicUsize>,
    my_pe: usize,
}

unsafe impl Send for FlagArray {}
unsafe impl Sync for FlagArray {}

impl FlagArray {
    /// # Safety
    /// every pointer must address `bases.len()` live, zero initialized `AtomicUsize`s
    /// that outlive the returned array
    pub(crate) unsafe fn new(bases: Vec<*const AtomicUsize>, my_pe: usize) -> FlagArray {
        FlagArray { bases, my_pe }
    }

    fn num_pes(&self) -> usize {
        self.bases.len()
    }

    fn slot(&self, pe: usize, index: usize) -> &AtomicUsize {
        debug_assert!(pe < self.num_pes() && index < self.num_pes());
        unsafe { &*self.bases[pe].add(index) }
    }

    /// write `val` into my slot on every pe
    fn put_all(&self, val: usize) {
        for pe in 0..self.num_pes() {
            self.slot(pe, self.my_pe).store(val, Ordering::Release);
        }
    }

    fn local(&self, index: usize) -> usize {
        self.slot(self.my_pe, index).load(Ordering::Acquire)
    }

    fn snapshot(&self) -> Vec<usize> {
        (0..self.num_pes()).map(|i| self.local(i)).collect()
    }
}

pub(crate) struct Barrier {
    my_pe: usize,
    num_pes: usize,
    barrier_cnt: AtomicUsize,
    barrier_buf: Option<SubBufs>,
    // concurrent callers on one pe would otherwise share a barrier id
    lock: Mutex<()>,
}

struct SubBufs {
    arrive: FlagArray,
    depart: FlagArray,
}

impl Barrier {
    pub(crate) fn new(my_pe: usize, num_pes: usize, bufs: Option<(FlagArray, FlagArray)>) -> Barrier {
        let barrier_buf = if num_pes > 1 {
            bufs.map(|(arrive, depart)| SubBufs { arrive, depart })
        } else {
            None
        };
        Barrier {
            my_pe,
            num_pes,
            barrier_cnt: AtomicUsize::new(0),
            barrier_buf,
            lock: Mutex::new(()),
        }
    }

    fn print_bar(&self) {
        if let Some(bufs) = &self.barrier_buf {
            trace!(
                my_pe = self.my_pe,
                arrive = ?bufs.arrive.snapshot(),
                depart = ?bufs.depart.snapshot(),
                "barrier state"
            );
        }
    }

    fn check_barrier_vals(&self, barrier_id: usize, barrier_buf: &FlagArray) {
        let mut s = Instant::now();
        for pe in 0..self.num_pes {
            while barrier_buf.local(pe) != barrier_id {
                std::thread::yield_now();
                let elapsed = s.elapsed().as_secs_f64();
                if elapsed > crate::config().deadlock_timeout {
                    RuntimeWarning::BarrierTimeout(elapsed).print();
                    self.print_bar();
                    s = Instant::now();
                }
            }
        }
    }

    /// Blocks until every pe has entered the same barrier instance.
    ///
    /// The depart round keeps a fast pe from overwriting arrive flags that a
    /// slow pe has not observed yet.
    pub(crate) fn barrier(&self) {
        if let Some(bufs) = &self.barrier_buf {
            let _guard = self.lock.lock();
            let barrier_id = self.barrier_cnt.fetch_add(1, Ordering::SeqCst);
            self.check_barrier_vals(barrier_id, &bufs.depart);
            let barrier_id = barrier_id + 1;
            bufs.arrive.put_all(barrier_id);
            self.check_barrier_vals(barrier_id, &bufs.arrive);
            bufs.depart.put_all(barrier_id);
        }
    }
}
