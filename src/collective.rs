use crate::fabric::{AllocError, Comm, CommInfo, CommProgress, RdmaError};
use crate::memregion::SymmetricBuffer;

use parking_lot::Mutex;
use std::sync::Arc;

/// Blocking all-reduce of one `f64` per pe.
///
/// Every pe writes its contribution into its own slot on every pe, then folds the
/// slots in rank order, so all pes compute the bit identical sum.
pub(crate) struct SumReducer {
    slots: SymmetricBuffer<f64>,
    comm: Arc<Comm>,
    lock: Mutex<()>,
}

impl SumReducer {
    /// Collective
    pub(crate) fn new(comm: Arc<Comm>) -> Result<SumReducer, AllocError> {
        let slots = SymmetricBuffer::new(comm.clone(), "sum_reduce", comm.num_pes())?;
        Ok(SumReducer {
            slots,
            comm,
            lock: Mutex::new(()),
        })
    }

    /// Collective: every pe must call this the same number of times
    pub(crate) fn sum(&self, value: f64) -> Result<f64, RdmaError> {
        let _guard = self.lock.lock();
        // the previous reduction has been read everywhere
        self.comm.barrier();
        let published = self.slots.put_all(self.comm.my_pe(), &[value]);
        self.comm.barrier();
        published?;
        let slots = unsafe { self.slots.as_slice() };
        Ok(slots.iter().fold(0.0, |acc, v| acc + v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::local::LocalComm;

    #[test]
    fn single_pe_sum_is_identity() {
        let comm = Arc::new(Comm::Local(LocalComm::new()));
        let reducer = SumReducer::new(comm).unwrap();
        assert_eq!(reducer.sum(1.5).unwrap(), 1.5);
        assert_eq!(reducer.sum(-0.25).unwrap(), -0.25);
    }
}
