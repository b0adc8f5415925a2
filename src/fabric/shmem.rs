pub(crate) mod fabric;

use super::{
    check_pe, AllocRequest, AllocResult, Backend, CommAlloc, CommAllocInner, CommInfo, CommMem,
    CommProgress, CommRdma, RdmaCounts, RdmaResult, RdmaStats,
};
use crate::config;
use fabric::ShmemAllocator;

/// A fabric connecting the pes of a single node through POSIX shared memory
#[derive(Debug)]
pub(crate) struct ShmemComm {
    alloc: ShmemAllocator,
    my_pe: usize,
    num_pes: usize,
    stats: RdmaStats,
}

impl ShmemComm {
    /// Join job `job_id` as `my_pe` of `num_pes`
    pub(crate) fn new(my_pe: usize, num_pes: usize, job_id: usize) -> AllocResult<ShmemComm> {
        let alloc = ShmemAllocator::new(my_pe, num_pes, job_id, config().shmem_open_retries)?;
        Ok(ShmemComm {
            alloc,
            my_pe,
            num_pes,
            stats: RdmaStats::default(),
        })
    }

    /// Topology as set by the launcher through `SYMWAVE_NUM_PES`, `SYMWAVE_PE_ID`
    /// and `SYMWAVE_JOB_ID`
    pub(crate) fn from_env() -> AllocResult<ShmemComm> {
        let num_pes = config().num_pes.unwrap_or(1);
        let my_pe = config().pe_id.unwrap_or(0);
        let job_id = config().job_id.unwrap_or(0);
        ShmemComm::new(my_pe, num_pes, job_id)
    }

    fn pe_ptr(&self, alloc: &CommAlloc, pe: usize) -> *mut u8 {
        match &alloc.inner_alloc {
            CommAllocInner::Shmem(alloc) => alloc.pe_ptr(pe),
            CommAllocInner::Local(alloc) => alloc.as_ptr(),
        }
    }
}

impl CommInfo for ShmemComm {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Shmem
    }
}

impl CommMem for ShmemComm {
    fn alloc(&self, request: AllocRequest) -> AllocResult<CommAlloc> {
        let alloc = self.alloc.alloc(request)?;
        Ok(CommAlloc {
            inner_alloc: CommAllocInner::Shmem(alloc),
        })
    }

    fn free(&self, alloc: &CommAlloc) {
        if let CommAllocInner::Shmem(alloc) = &alloc.inner_alloc {
            self.alloc.free_alloc(alloc);
        }
    }

    fn mem_occupied(&self) -> usize {
        self.alloc.occupied()
    }
}

impl CommRdma for ShmemComm {
    fn get(&self, alloc: &CommAlloc, pe: usize, offset: usize, dst: &mut [u8]) -> RdmaResult {
        check_pe(pe, self.num_pes)?;
        alloc.check_bounds(offset, dst.len())?;
        unsafe {
            let src = self.pe_ptr(alloc, pe).add(offset);
            std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len());
        }
        self.stats.record_get(pe == self.my_pe, dst.len());
        Ok(())
    }

    fn put(&self, alloc: &CommAlloc, pe: usize, offset: usize, src: &[u8]) -> RdmaResult {
        check_pe(pe, self.num_pes)?;
        alloc.check_bounds(offset, src.len())?;
        unsafe {
            let dst = self.pe_ptr(alloc, pe).add(offset);
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }
        self.stats.record_put(pe == self.my_pe, src.len());
        Ok(())
    }

    fn rdma_stats(&self) -> RdmaCounts {
        self.stats.counts()
    }
}

impl CommProgress for ShmemComm {
    fn barrier(&self) {
        self.alloc.barrier();
    }
}
