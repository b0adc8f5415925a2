use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use shared_memory::*;
use tracing::{debug, trace};

use crate::barrier::{Barrier, FlagArray};
use crate::fabric::{
    padded_len, AllocError, AllocRequest, AllocResult, MismatchKind, SEGMENT_ALIGN,
};
use crate::warnings::RuntimeWarning;

/// bytes reserved at the front of every shared object for the ready marker
const HEADER: usize = SEGMENT_ALIGN;
const OPEN_BACKOFF: std::time::Duration = std::time::Duration::from_millis(10);

pub(crate) struct ShmemHandle {
    base_addr: *mut u8,
    num_bytes: usize,
    _shmem: Shmem,
}

unsafe impl Send for ShmemHandle {}
unsafe impl Sync for ShmemHandle {}

impl ShmemHandle {
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base_addr
    }
    pub(crate) fn num_bytes(&self) -> usize {
        self.num_bytes
    }
}

fn fabric_err(shmem_id: &str, e: ShmemError) -> AllocError {
    AllocError::FabricAllocationError(format!("shared memory {:?}: {}", shmem_id, e))
}

fn aborted(shmem_id: &str) -> AllocError {
    AllocError::FabricAllocationError(format!(
        "shared memory {:?}: another pe failed to map it",
        shmem_id
    ))
}

/// Map the shared object `symwave_{job_id}_{id}` holding `size` data bytes.
///
/// Every pe first tries to create the object and falls back to opening it. The
/// `create` pe zeroes the data and then publishes `header`; everyone returns only
/// once the header shows that value, or with an error as soon as `abort` holds.
#[tracing::instrument(skip_all, level = "debug")]
fn attach_to_shmem(
    job_id: usize,
    id: &str,
    size: usize,
    header: usize,
    create: bool,
    retries: usize,
    abort: &dyn Fn() -> bool,
) -> AllocResult<ShmemHandle> {
    let shmem_size = HEADER + size;
    let shmem_id = format!("symwave_{}_{}", job_id, id);

    let mut retry = 0;
    let m = loop {
        let attempt = match ShmemConf::new()
            .size(shmem_size)
            .os_id(&shmem_id)
            .create()
        {
            Ok(m) => break m,
            Err(ShmemError::LinkExists)
            | Err(ShmemError::MappingIdExists)
            | Err(ShmemError::MapOpenFailed(_)) => ShmemConf::new().os_id(&shmem_id).open(),
            Err(e) => return Err(fabric_err(&shmem_id, e)),
        };
        match attempt {
            // a pe racing us may not have sized the object yet
            Ok(m) if m.len() >= shmem_size => break m,
            Ok(m) if retry >= retries => {
                return Err(AllocError::TopologyMismatch(MismatchKind::Segment {
                    expected: size,
                    found: m.len().saturating_sub(HEADER),
                }))
            }
            Ok(_) => {}
            Err(e) if retry >= retries => return Err(fabric_err(&shmem_id, e)),
            Err(_) => {}
        }
        if abort() {
            return Err(aborted(&shmem_id));
        }
        retry += 1;
        std::thread::sleep(OPEN_BACKOFF);
    };

    let marker = unsafe { &*(m.as_ptr() as *const AtomicUsize) };
    let data = unsafe { m.as_ptr().add(HEADER) };
    if create {
        unsafe { std::ptr::write_bytes(data, 0, size) };
        marker.store(header, Ordering::Release);
    } else {
        let mut s = Instant::now();
        while marker.load(Ordering::Acquire) != header {
            if abort() {
                return Err(aborted(&shmem_id));
            }
            std::thread::yield_now();
            let elapsed = s.elapsed().as_secs_f64();
            if elapsed > crate::config().deadlock_timeout {
                RuntimeWarning::BarrierTimeout(elapsed).print();
                s = Instant::now();
            }
        }
    }
    trace!("shmem inited {:?} {:?}", shmem_id, header);

    Ok(ShmemHandle {
        base_addr: data,
        num_bytes: size,
        _shmem: m,
    })
}

/// One collective allocation, mapped into this pe's address space
pub(crate) struct ShmemAlloc {
    pub(crate) my_pe: usize,
    num_pes: usize,
    num_bytes: usize,
    padded_bytes: usize,
    id: usize,
    shmem: ShmemHandle,
}

unsafe impl Sync for ShmemAlloc {}
unsafe impl Send for ShmemAlloc {}

impl std::fmt::Debug for ShmemAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmemAlloc")
            .field("id", &self.id)
            .field("base", &self.shmem.base_ptr())
            .field("num_bytes", &self.num_bytes)
            .field("padded_bytes", &self.padded_bytes)
            .field("my_pe", &self.my_pe)
            .field("num_pes", &self.num_pes)
            .finish()
    }
}

impl ShmemAlloc {
    /// start of `pe`'s segment in my address space
    pub(crate) fn pe_ptr(&self, pe: usize) -> *mut u8 {
        debug_assert!(pe < self.num_pes);
        unsafe { self.shmem.base_ptr().add(pe * self.padded_bytes) }
    }
    pub(crate) fn num_bytes(&self) -> usize {
        self.num_bytes
    }
    pub(crate) fn id(&self) -> usize {
        self.id
    }
    fn mapped_bytes(&self) -> usize {
        self.shmem.num_bytes()
    }
}

/// A pe's view of the control object shared by the whole job.
///
/// Layout after the header: one word holding the job's pe count, one word naming the
/// last allocation some pe failed to map, then a block per pe of
/// `arrive[num_pes] depart[num_pes] seq bytes tag`.
struct CtlSlots {
    base: *const AtomicUsize,
    num_pes: usize,
}

impl CtlSlots {
    fn words(num_pes: usize) -> usize {
        2 + num_pes * Self::block_words(num_pes)
    }
    fn block_words(num_pes: usize) -> usize {
        2 * num_pes + 3
    }
    fn word(&self, index: usize) -> &AtomicUsize {
        debug_assert!(index < Self::words(self.num_pes));
        unsafe { &*self.base.add(index) }
    }
    fn block(&self, pe: usize) -> usize {
        2 + pe * Self::block_words(self.num_pes)
    }
    fn job_pes(&self) -> &AtomicUsize {
        self.word(0)
    }
    /// `seq + 1` of the failed allocation, 0 while none failed
    fn alloc_failed(&self) -> &AtomicUsize {
        self.word(1)
    }
    fn arrive(&self, pe: usize) -> *const AtomicUsize {
        self.word(self.block(pe)) as *const AtomicUsize
    }
    fn depart(&self, pe: usize) -> *const AtomicUsize {
        self.word(self.block(pe) + self.num_pes) as *const AtomicUsize
    }
    fn seq(&self, pe: usize) -> &AtomicUsize {
        self.word(self.block(pe) + 2 * self.num_pes)
    }
    fn bytes(&self, pe: usize) -> &AtomicUsize {
        self.word(self.block(pe) + 2 * self.num_pes + 1)
    }
    fn tag(&self, pe: usize) -> &AtomicUsize {
        self.word(self.block(pe) + 2 * self.num_pes + 2)
    }
}

/// Allocates symmetric segments for every pe of a job sharing one node
pub(crate) struct ShmemAllocator {
    ctl: CtlSlots,
    barrier: Barrier,
    my_pe: usize,
    num_pes: usize,
    job_id: usize,
    retries: usize,
    seq: AtomicUsize,
    allocs: RwLock<Vec<Arc<ShmemAlloc>>>,
    // must drop after the barrier and slots that point into it
    _ctl_shmem: ShmemHandle,
}

unsafe impl Sync for ShmemAllocator {}
unsafe impl Send for ShmemAllocator {}

impl std::fmt::Debug for ShmemAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmemAllocator")
            .field("my_pe", &self.my_pe)
            .field("num_pes", &self.num_pes)
            .field("job_id", &self.job_id)
            .finish()
    }
}

fn tag_word(tag: u64) -> usize {
    tag as usize
}

/// marker published in the header of the control object
const CTL_READY: usize = 0x5359_4d57;

impl ShmemAllocator {
    #[tracing::instrument(skip_all, level = "debug")]
    pub(crate) fn new(
        my_pe: usize,
        num_pes: usize,
        job_id: usize,
        retries: usize,
    ) -> AllocResult<Self> {
        if num_pes == 0 || my_pe >= num_pes {
            return Err(AllocError::TopologyMismatch(MismatchKind::InvalidPe {
                pe: my_pe,
                num_pes,
            }));
        }
        let size = CtlSlots::words(num_pes) * std::mem::size_of::<AtomicUsize>();
        // nobody can be told if the control object itself cannot be mapped
        let shmem =
            attach_to_shmem(job_id, "ctl", size, CTL_READY, my_pe == 0, retries, &|| false)?;
        let ctl = CtlSlots {
            base: shmem.base_ptr() as *const AtomicUsize,
            num_pes,
        };
        // pe 0 publishes the job's pe count once the zeroed segment is visible
        if my_pe == 0 {
            ctl.job_pes().store(num_pes, Ordering::Release);
        } else {
            let mut found = ctl.job_pes().load(Ordering::Acquire);
            while found == 0 {
                std::thread::yield_now();
                found = ctl.job_pes().load(Ordering::Acquire);
            }
            if found != num_pes {
                return Err(AllocError::TopologyMismatch(MismatchKind::NumPes {
                    expected: num_pes,
                    found,
                }));
            }
        }

        let arrive = (0..num_pes).map(|pe| ctl.arrive(pe)).collect();
        let depart = (0..num_pes).map(|pe| ctl.depart(pe)).collect();
        let bufs = unsafe { (FlagArray::new(arrive, my_pe), FlagArray::new(depart, my_pe)) };
        let barrier = Barrier::new(my_pe, num_pes, Some(bufs));
        debug!(my_pe, num_pes, job_id, "shmem control segment attached");

        Ok(ShmemAllocator {
            ctl,
            barrier,
            my_pe,
            num_pes,
            job_id,
            retries,
            seq: AtomicUsize::new(0),
            allocs: RwLock::new(vec![]),
            _ctl_shmem: shmem,
        })
    }

    pub(crate) fn barrier(&self) {
        self.barrier.barrier();
    }

    fn check_requests(&self, seq: usize, request: AllocRequest) -> Result<(), MismatchKind> {
        let tag = tag_word(request.tag);
        for pe in 0..self.num_pes {
            let found = self.ctl.seq(pe).load(Ordering::Acquire);
            if found != seq {
                return Err(MismatchKind::Sequence {
                    pe,
                    expected: seq,
                    found,
                });
            }
            let found = self.ctl.bytes(pe).load(Ordering::Acquire);
            if found != request.num_bytes {
                return Err(MismatchKind::Size {
                    pe,
                    expected: request.num_bytes,
                    found,
                });
            }
            if self.ctl.tag(pe).load(Ordering::Acquire) != tag {
                return Err(MismatchKind::Tag { pe });
            }
        }
        Ok(())
    }

    /// Collective allocation of `request.num_bytes` on every pe.
    ///
    /// All pes publish their request, then each compares against every other pe,
    /// so a disagreement is reported on every pe rather than silently producing
    /// buffers of different shapes.
    #[tracing::instrument(skip_all, level = "debug")]
    pub(crate) fn alloc(&self, request: AllocRequest) -> AllocResult<Arc<ShmemAlloc>> {
        if request.num_bytes == 0 {
            return Err(AllocError::ZeroSized);
        }
        let mut allocs = self.allocs.write();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        // nobody may still be reading the previous request
        self.barrier.barrier();
        self.ctl.seq(self.my_pe).store(seq, Ordering::Release);
        self.ctl
            .bytes(self.my_pe)
            .store(request.num_bytes, Ordering::Release);
        self.ctl
            .tag(self.my_pe)
            .store(tag_word(request.tag), Ordering::Release);
        self.barrier.barrier();
        if let Err(kind) = self.check_requests(seq, request) {
            debug!(my_pe = self.my_pe, %kind, "symmetric allocation rejected");
            return Err(AllocError::TopologyMismatch(kind));
        }

        let padded_bytes = padded_len(request.num_bytes);
        let total = padded_bytes
            .checked_mul(self.num_pes)
            .ok_or(AllocError::OutOfMemoryError(request.num_bytes))?;
        let failed = self.ctl.alloc_failed();
        let marker = seq + 1;
        let shmem = attach_to_shmem(
            self.job_id,
            &seq.to_string(),
            total,
            marker,
            self.my_pe == 0,
            self.retries,
            &|| failed.load(Ordering::Acquire) == marker,
        );
        if shmem.is_err() {
            failed.store(marker, Ordering::Release);
        }
        // every pe has mapped the object, or given up on it, before any owner can unlink it
        self.barrier.barrier();
        let shmem = shmem?;
        if failed.load(Ordering::Acquire) == marker {
            debug!(my_pe = self.my_pe, seq, "symmetric allocation failed on another pe");
            return Err(aborted(&format!("symwave_{}_{}", self.job_id, seq)));
        }

        let alloc = Arc::new(ShmemAlloc {
            my_pe: self.my_pe,
            num_pes: self.num_pes,
            num_bytes: request.num_bytes,
            padded_bytes,
            id: seq,
            shmem,
        });
        trace!("attached {:?}", alloc);
        allocs.push(alloc.clone());
        Ok(alloc)
    }

    pub(crate) fn free_alloc(&self, alloc: &Arc<ShmemAlloc>) {
        let mut allocs = self.allocs.write();
        allocs.retain(|a| !Arc::ptr_eq(a, alloc));
    }

    pub(crate) fn occupied(&self) -> usize {
        self.allocs.read().iter().map(|a| a.mapped_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job(n: usize) -> usize {
        std::process::id() as usize * 1000 + 900 + n
    }

    #[test]
    fn pe_count_disagreement_is_detected() {
        let job = test_job(1);
        let first = ShmemAllocator::new(0, 3, job, 5).unwrap();
        let err = ShmemAllocator::new(1, 2, job, 5).unwrap_err();
        assert_eq!(
            err,
            AllocError::TopologyMismatch(MismatchKind::NumPes {
                expected: 2,
                found: 3
            })
        );
        drop(first);
    }

    #[test]
    fn too_small_control_segment_is_detected() {
        let job = test_job(2);
        let first = ShmemAllocator::new(0, 2, job, 5).unwrap();
        let err = ShmemAllocator::new(1, 3, job, 2).unwrap_err();
        assert!(matches!(
            err,
            AllocError::TopologyMismatch(MismatchKind::Segment { .. })
        ));
        drop(first);
    }

    #[test]
    fn failed_attach_is_reported_on_every_pe() {
        let job = test_job(3);
        // a leftover object, too small for the first allocation of the job
        let stale = ShmemConf::new()
            .size(HEADER + 8)
            .os_id(format!("symwave_{}_0", job))
            .create()
            .unwrap();
        // pe 1 would otherwise keep retrying for a long time
        let handles: Vec<_> = [(0usize, 2usize), (1, 100_000)]
            .into_iter()
            .map(|(pe, retries)| {
                std::thread::spawn(move || {
                    let allocator = ShmemAllocator::new(pe, 2, job, retries).unwrap();
                    let res = allocator.alloc(AllocRequest {
                        num_bytes: 1024,
                        tag: 1,
                    });
                    res.map(|alloc| alloc.num_bytes())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        drop(stale);
        assert!(matches!(
            results[0],
            Err(AllocError::TopologyMismatch(MismatchKind::Segment { .. }))
        ));
        assert!(matches!(results[1], Err(AllocError::FabricAllocationError(_))));
    }

    #[test]
    fn control_layout_does_not_overlap() {
        let num_pes = 3;
        let words = CtlSlots::words(num_pes);
        let mut backing: Vec<AtomicUsize> = (0..words).map(|_| AtomicUsize::new(0)).collect();
        let ctl = CtlSlots {
            base: backing.as_mut_ptr() as *const AtomicUsize,
            num_pes,
        };
        let mut seen = vec![ctl.job_pes() as *const AtomicUsize, ctl.alloc_failed()];
        for pe in 0..num_pes {
            for i in 0..num_pes {
                seen.push(unsafe { ctl.arrive(pe).add(i) });
                seen.push(unsafe { ctl.depart(pe).add(i) });
            }
            seen.push(ctl.seq(pe));
            seen.push(ctl.bytes(pe));
            seen.push(ctl.tag(pe));
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), words);
    }
}
