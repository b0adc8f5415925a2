//! The communication fabric beneath the symmetric heap.
//!
//! A [Comm] provides this pe's identity, collective allocation of equally sized
//! per-pe segments, one-sided byte level get/put into any pe's segment, and the
//! global barrier. The `local` backend runs a single pe out of the process heap,
//! the `shmem` backend maps one POSIX shared memory object per allocation so that
//! every pe on the node can address every other pe's segment directly.
pub(crate) mod error;
pub(crate) mod local;
pub(crate) mod shmem;

pub use error::{AllocError, MismatchKind, RdmaError};
pub(crate) use error::{AllocResult, RdmaResult};

use crate::config;
use local::{LocalAlloc, LocalComm};
use shmem::{fabric::ShmemAlloc, ShmemComm};

use enum_dispatch::enum_dispatch;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The list of available fabric backends, used to specify how pes communicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// a single pe, no inter process communication
    Local,
    /// multiple pes on a single node communicating through POSIX shared memory
    Shmem,
}

impl Default for Backend {
    fn default() -> Self {
        match config().backend.as_str() {
            "shmem" => Backend::Shmem,
            _ => Backend::Local,
        }
    }
}

/// Alignment of every per-pe segment, also the padding unit between segments
pub(crate) const SEGMENT_ALIGN: usize = 64;

pub(crate) fn padded_len(num_bytes: usize) -> usize {
    (num_bytes + SEGMENT_ALIGN - 1) / SEGMENT_ALIGN * SEGMENT_ALIGN
}

/// What a pe asks for when entering a collective allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AllocRequest {
    pub(crate) num_bytes: usize,
    /// identifies the element type and label, must match on every pe
    pub(crate) tag: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum CommAllocInner {
    Local(Arc<LocalAlloc>),
    Shmem(Arc<ShmemAlloc>),
}

/// A handle to this pe's segment of a collective allocation
#[derive(Debug, Clone)]
pub(crate) struct CommAlloc {
    pub(crate) inner_alloc: CommAllocInner,
}

impl CommAlloc {
    /// start of my segment in my address space
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        match &self.inner_alloc {
            CommAllocInner::Local(alloc) => alloc.as_ptr(),
            CommAllocInner::Shmem(alloc) => alloc.pe_ptr(alloc.my_pe),
        }
    }

    /// requested size of each per-pe segment
    pub(crate) fn num_bytes(&self) -> usize {
        match &self.inner_alloc {
            CommAllocInner::Local(alloc) => alloc.num_bytes(),
            CommAllocInner::Shmem(alloc) => alloc.num_bytes(),
        }
    }

    pub(crate) fn id(&self) -> usize {
        match &self.inner_alloc {
            CommAllocInner::Local(alloc) => alloc.id(),
            CommAllocInner::Shmem(alloc) => alloc.id(),
        }
    }

    pub(crate) fn check_bounds(&self, offset: usize, len: usize) -> RdmaResult {
        let size = self.num_bytes();
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(RdmaError::OutOfBounds { offset, len, size }),
        }
    }
}

/// Counts of one-sided operations issued by this pe
#[derive(Debug, Default)]
pub(crate) struct RdmaStats {
    gets: AtomicUsize,
    puts: AtomicUsize,
    bytes_got: AtomicUsize,
    bytes_put: AtomicUsize,
}

/// A point in time copy of [RdmaStats]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RdmaCounts {
    /// gets whose target was a pe other than the caller
    pub remote_gets: usize,
    /// puts whose target was a pe other than the caller
    pub remote_puts: usize,
    pub bytes_got: usize,
    pub bytes_put: usize,
}

impl RdmaStats {
    pub(crate) fn record_get(&self, local: bool, bytes: usize) {
        if !local {
            self.gets.fetch_add(1, Ordering::Relaxed);
            self.bytes_got.fetch_add(bytes, Ordering::Relaxed);
        }
    }
    pub(crate) fn record_put(&self, local: bool, bytes: usize) {
        if !local {
            self.puts.fetch_add(1, Ordering::Relaxed);
            self.bytes_put.fetch_add(bytes, Ordering::Relaxed);
        }
    }
    pub(crate) fn counts(&self) -> RdmaCounts {
        RdmaCounts {
            remote_gets: self.gets.load(Ordering::Relaxed),
            remote_puts: self.puts.load(Ordering::Relaxed),
            bytes_got: self.bytes_got.load(Ordering::Relaxed),
            bytes_put: self.bytes_put.load(Ordering::Relaxed),
        }
    }
}

#[enum_dispatch]
pub(crate) trait CommInfo {
    fn my_pe(&self) -> usize;
    fn num_pes(&self) -> usize;
    fn backend(&self) -> Backend;
}

#[enum_dispatch]
pub(crate) trait CommMem {
    /// Collective: every pe must call with an identical request, in the same order
    fn alloc(&self, request: AllocRequest) -> AllocResult<CommAlloc>;
    /// Forget this pe's registration of the allocation, the memory itself is
    /// released once the last handle drops
    fn free(&self, alloc: &CommAlloc);
    /// bytes currently allocated on this pe
    fn mem_occupied(&self) -> usize;
}

#[enum_dispatch]
pub(crate) trait CommRdma {
    /// copy `dst.len()` bytes from `pe`'s segment starting at `offset`
    fn get(&self, alloc: &CommAlloc, pe: usize, offset: usize, dst: &mut [u8]) -> RdmaResult;
    /// copy `src` into `pe`'s segment starting at `offset`
    fn put(&self, alloc: &CommAlloc, pe: usize, offset: usize, src: &[u8]) -> RdmaResult;
    fn rdma_stats(&self) -> RdmaCounts;
}

#[enum_dispatch]
pub(crate) trait CommProgress {
    /// Collective: returns once every pe has entered the same barrier
    fn barrier(&self);
}

#[enum_dispatch(CommInfo, CommMem, CommRdma, CommProgress)]
#[derive(Debug)]
pub(crate) enum Comm {
    Shmem(ShmemComm),
    Local(LocalComm),
}

pub(crate) fn check_pe(pe: usize, num_pes: usize) -> RdmaResult {
    if pe < num_pes {
        Ok(())
    } else {
        Err(RdmaError::InvalidPe { pe, num_pes })
    }
}
