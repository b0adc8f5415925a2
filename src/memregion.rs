//! Symmetric buffers are fixed size arrays allocated collectively, one instance per pe,
//! where any pe can address the instance of any other pe with one-sided operations.
//!
//! # Warning
//! The local views are unsafe: nothing prevents a remote pe from writing into this pe's
//! instance while a slice is held. The solver upholds this by only ever reading remotely
//! from grid buffers, and by separating each step with a barrier.
use crate::fabric::{AllocError, AllocRequest, Comm, CommAlloc, CommInfo, CommMem, CommRdma, RdmaError};
use crate::world::World;

use core::marker::PhantomData;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Trait representing types that can be used in remote operations
///
/// Implementors are plain data: [Copy], and valid for any bit pattern a remote pe may hold,
/// so that remote reads can be performed as bitwise copies.
pub trait Dist: Sync + Send + Copy + Default + std::fmt::Debug + 'static {}

macro_rules! impl_dist {
    ($($t:ty),*) => {
        $(impl Dist for $t {})*
    };
}

impl_dist!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

/// The tag every pe publishes for an allocation, the element type and label must agree
pub(crate) fn alloc_tag<T: Dist>(label: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::any::type_name::<T>().hash(&mut hasher);
    label.hash(&mut hasher);
    hasher.finish()
}

/// A typed array of `len` elements on every pe.
///
/// Created through [World::alloc_symmetric] or [World::alloc_symmetric_named].
/// Dropping the handle unmaps this pe's view; use [SymmetricBuffer::free] when other
/// pes may still be reading from it.
pub struct SymmetricBuffer<T: Dist> {
    alloc: CommAlloc,
    comm: Arc<Comm>,
    len: usize,
    label: String,
    _phantom: PhantomData<T>,
}

impl<T: Dist> std::fmt::Debug for SymmetricBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricBuffer")
            .field("label", &self.label)
            .field("len", &self.len)
            .field("alloc", &self.alloc)
            .finish()
    }
}

impl<T: Dist> SymmetricBuffer<T> {
    #[tracing::instrument(skip(comm), level = "debug")]
    pub(crate) fn new(comm: Arc<Comm>, label: &str, len: usize) -> Result<Self, AllocError> {
        let num_bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(AllocError::OutOfMemoryError(usize::MAX))?;
        let alloc = comm.alloc(AllocRequest {
            num_bytes,
            tag: alloc_tag::<T>(label),
        })?;
        debug!(id = alloc.id(), num_bytes, "symmetric buffer allocated");
        Ok(SymmetricBuffer {
            alloc,
            comm,
            len,
            label: label.to_owned(),
            _phantom: PhantomData,
        })
    }

    /// number of elements in each pe's instance
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Return a slice of this pe's instance
    ///
    /// # Safety
    /// the caller must ensure no remote pe writes into this instance while the slice is alive
    pub unsafe fn as_slice(&self) -> &[T] {
        std::slice::from_raw_parts(self.alloc.as_ptr() as *const T, self.len)
    }

    /// Return a mutable slice of this pe's instance
    ///
    /// # Safety
    /// the caller must ensure no remote pe reads or writes this instance while the slice is alive
    pub unsafe fn as_mut_slice(&mut self) -> &mut [T] {
        std::slice::from_raw_parts_mut(self.alloc.as_ptr() as *mut T, self.len)
    }

    fn byte_range(&self, index: usize, count: usize) -> Result<(usize, usize), RdmaError> {
        let size = std::mem::size_of::<T>();
        let out_of_bounds = RdmaError::OutOfBounds {
            offset: index.saturating_mul(size),
            len: count.saturating_mul(size),
            size: self.len * size,
        };
        match (index.checked_mul(size), count.checked_mul(size)) {
            (Some(offset), Some(len)) => Ok((offset, len)),
            _ => Err(out_of_bounds),
        }
    }

    /// Blocking one-sided read of element `index` of `pe`'s instance
    pub fn get(&self, pe: usize, index: usize) -> Result<T, RdmaError> {
        let mut val = [T::default()];
        self.get_slice(pe, index, &mut val)?;
        Ok(val[0])
    }

    /// Blocking one-sided read of `dst.len()` elements of `pe`'s instance starting at `index`
    pub fn get_slice(&self, pe: usize, index: usize, dst: &mut [T]) -> Result<(), RdmaError> {
        let (offset, len) = self.byte_range(index, dst.len())?;
        let bytes = unsafe { std::slice::from_raw_parts_mut(dst.as_mut_ptr() as *mut u8, len) };
        self.comm.get(&self.alloc, pe, offset, bytes)
    }

    /// Blocking one-sided write of `src` into `pe`'s instance starting at `index`.
    ///
    /// Reserved to the runtime's own collectives, grid buffers are only ever read remotely.
    pub(crate) fn put(&self, pe: usize, index: usize, src: &[T]) -> Result<(), RdmaError> {
        let (offset, len) = self.byte_range(index, src.len())?;
        let bytes = unsafe { std::slice::from_raw_parts(src.as_ptr() as *const u8, len) };
        self.comm.put(&self.alloc, pe, offset, bytes)
    }

    /// Write `src` at `index` into every pe's instance, including this pe's
    pub(crate) fn put_all(&self, index: usize, src: &[T]) -> Result<(), RdmaError> {
        for pe in 0..self.comm.num_pes() {
            self.put(pe, index, src)?;
        }
        Ok(())
    }

    /// Collective release: waits until every pe is done with the buffer before unmapping it
    pub fn free(self, world: &World) {
        world.barrier();
        drop(self);
    }
}

impl<T: Dist> Drop for SymmetricBuffer<T> {
    fn drop(&mut self) {
        self.comm.free(&self.alloc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_separate_type_and_label() {
        assert_eq!(alloc_tag::<f64>("grid"), alloc_tag::<f64>("grid"));
        assert_ne!(alloc_tag::<f64>("grid"), alloc_tag::<f32>("grid"));
        assert_ne!(alloc_tag::<f64>("grid"), alloc_tag::<f64>("halo"));
    }

    #[test]
    fn local_buffer_rdma() {
        let world = crate::WorldBuilder::new()
            .with_fabric(crate::Backend::Local)
            .build()
            .unwrap();
        let mut buf = world.alloc_symmetric::<f64>(8).unwrap();
        unsafe {
            for (i, elem) in buf.as_mut_slice().iter_mut().enumerate() {
                *elem = i as f64;
            }
        }
        assert_eq!(buf.get(0, 3).unwrap(), 3.0);
        let mut dst = [0.0; 3];
        buf.get_slice(0, 5, &mut dst).unwrap();
        assert_eq!(dst, [5.0, 6.0, 7.0]);
        buf.put_all(0, &[42.0]).unwrap();
        assert_eq!(unsafe { buf.as_slice()[0] }, 42.0);
        assert!(matches!(buf.get(0, 8), Err(RdmaError::OutOfBounds { .. })));
        assert!(matches!(buf.get(1, 0), Err(RdmaError::InvalidPe { pe: 1, num_pes: 1 })));
        buf.free(&world);
        world.finalize();
    }
}
