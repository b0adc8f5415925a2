use super::{
    check_pe, AllocError, AllocRequest, AllocResult, Backend, CommAlloc, CommAllocInner, CommInfo,
    CommMem, CommProgress, CommRdma, RdmaCounts, RdmaResult, RdmaStats, SEGMENT_ALIGN,
};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) struct LocalAlloc {
    ptr: *mut u8,
    layout: std::alloc::Layout,
    num_bytes: usize,
    id: usize,
}

unsafe impl Send for LocalAlloc {}
unsafe impl Sync for LocalAlloc {}

impl std::fmt::Debug for LocalAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAlloc")
            .field("ptr", &self.ptr)
            .field("num_bytes", &self.num_bytes)
            .field("id", &self.id)
            .finish()
    }
}

impl LocalAlloc {
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
    pub(crate) fn num_bytes(&self) -> usize {
        self.num_bytes
    }
    pub(crate) fn id(&self) -> usize {
        self.id
    }
}

impl Drop for LocalAlloc {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr, self.layout) };
    }
}

/// A single pe fabric backed by the process heap
pub(crate) struct LocalComm {
    allocs: Mutex<HashMap<usize, Arc<LocalAlloc>>>,
    next_id: AtomicUsize,
    stats: RdmaStats,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalComm")
    }
}

impl LocalComm {
    pub(crate) fn new() -> LocalComm {
        LocalComm {
            allocs: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            stats: RdmaStats::default(),
        }
    }
}

impl CommInfo for LocalComm {
    fn my_pe(&self) -> usize {
        0
    }
    fn num_pes(&self) -> usize {
        1
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
}

impl CommMem for LocalComm {
    fn alloc(&self, request: AllocRequest) -> AllocResult<CommAlloc> {
        if request.num_bytes == 0 {
            return Err(AllocError::ZeroSized);
        }
        let layout = std::alloc::Layout::from_size_align(request.num_bytes, SEGMENT_ALIGN)
            .map_err(|_| AllocError::OutOfMemoryError(request.num_bytes))?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(AllocError::OutOfMemoryError(request.num_bytes));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let alloc = Arc::new(LocalAlloc {
            ptr,
            layout,
            num_bytes: request.num_bytes,
            id,
        });
        self.allocs.lock().insert(id, alloc.clone());
        Ok(CommAlloc {
            inner_alloc: CommAllocInner::Local(alloc),
        })
    }

    fn free(&self, alloc: &CommAlloc) {
        self.allocs.lock().remove(&alloc.id());
    }

    fn mem_occupied(&self) -> usize {
        let mut occupied = 0;
        let allocs = self.allocs.lock();
        for alloc in allocs.values() {
            occupied += alloc.layout.size();
        }
        occupied
    }
}

impl CommRdma for LocalComm {
    fn get(&self, alloc: &CommAlloc, pe: usize, offset: usize, dst: &mut [u8]) -> RdmaResult {
        check_pe(pe, 1)?;
        alloc.check_bounds(offset, dst.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(alloc.as_ptr().add(offset), dst.as_mut_ptr(), dst.len())
        };
        self.stats.record_get(true, dst.len());
        Ok(())
    }

    fn put(&self, alloc: &CommAlloc, pe: usize, offset: usize, src: &[u8]) -> RdmaResult {
        check_pe(pe, 1)?;
        alloc.check_bounds(offset, src.len())?;
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), alloc.as_ptr().add(offset), src.len()) };
        self.stats.record_put(true, src.len());
        Ok(())
    }

    fn rdma_stats(&self) -> RdmaCounts {
        self.stats.counts()
    }
}

impl CommProgress for LocalComm {
    fn barrier(&self) {}
}
