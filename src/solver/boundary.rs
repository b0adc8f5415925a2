use crate::arch::Topology;
use crate::fabric::RdmaError;

/// Where halo values come from: element `index` of `pe`'s instance of a buffer
pub trait HaloSource {
    fn remote_read(&self, pe: usize, index: usize) -> Result<f64, RdmaError>;
}

/// The previous time level just beyond each end of this pe's slice.
///
/// `None` on a side that is a global edge.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Halo {
    pub left: Option<f64>,
    pub right: Option<f64>,
}

/// Decides which points are fixed and where each point's neighbors live
#[derive(Debug, Clone, Copy)]
pub struct BoundaryResolver {
    topology: Topology,
    slice_len: usize,
}

impl BoundaryResolver {
    pub fn new(topology: Topology, slice_len: usize) -> BoundaryResolver {
        BoundaryResolver {
            topology,
            slice_len,
        }
    }

    /// the two ends of the global grid never change
    pub fn is_fixed(&self, idx: usize) -> bool {
        (self.topology.is_first() && idx == 0)
            || (self.topology.is_last() && idx + 1 == self.slice_len)
    }

    /// One one-sided read per side that borders another pe's slice
    pub fn fetch_halo<S: HaloSource + ?Sized>(&self, source: &S) -> Result<Halo, RdmaError> {
        let my_pe = self.topology.my_pe;
        let left = if !self.topology.is_first() {
            Some(source.remote_read(my_pe - 1, self.slice_len - 1)?)
        } else {
            None
        };
        let right = if !self.topology.is_last() {
            Some(source.remote_read(my_pe + 1, 0)?)
        } else {
            None
        };
        Ok(Halo { left, right })
    }

    /// (left, right) values of `previous` around `idx`, None for a fixed point
    /// or when the needed halo side was not fetched
    pub fn neighbors(&self, idx: usize, previous: &[f64], halo: &Halo) -> Option<(f64, f64)> {
        if self.is_fixed(idx) {
            return None;
        }
        let left = if idx > 0 {
            previous[idx - 1]
        } else {
            halo.left?
        };
        let right = if idx + 1 < self.slice_len {
            previous[idx + 1]
        } else {
            halo.right?
        };
        Some((left, right))
    }
}
