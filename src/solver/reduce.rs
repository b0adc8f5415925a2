use crate::arch::Partition;
use crate::env_var::ReductionOrder;
use crate::fabric::RdmaError;
use crate::pool::WorkPool;
use crate::world::World;

/// A blocking sum over every pe that yields the same value everywhere
pub trait GlobalSum {
    fn global_sum(&self, value: f64) -> Result<f64, RdmaError>;
}

impl GlobalSum for World {
    fn global_sum(&self, value: f64) -> Result<f64, RdmaError> {
        self.sum_reduce(value)
    }
}

/// Sum over owned points of `(u - reference(global_index))^2`
pub fn local_sum_sq<F>(pool: &WorkPool, field: &[f64], partition: &Partition, reference: F) -> f64
where
    F: Fn(usize) -> f64 + Sync,
{
    pool.sum_blocks(field, |start, block| {
        block
            .iter()
            .enumerate()
            .map(|(i, u)| {
                let diff = u - reference(partition.global_index(start + i));
                diff * diff
            })
            .sum()
    })
}

/// Root mean square error over this pe's points only
pub fn local_error(sum_sq: f64, slice_len: usize) -> f64 {
    (sum_sq / slice_len as f64).sqrt()
}

pub fn global_combine<S: GlobalSum + ?Sized>(sum: &S, local: f64) -> Result<f64, RdmaError> {
    sum.global_sum(local)
}

/// The grid wide L2 error normalized by `num_points`
pub fn global_error<S: GlobalSum + ?Sized>(
    sum: &S,
    local_sum_sq: f64,
    num_points: usize,
    order: ReductionOrder,
) -> Result<f64, RdmaError> {
    let num_points = num_points as f64;
    match order {
        ReductionOrder::Standard => {
            let total = global_combine(sum, local_sum_sq)?;
            Ok((total / num_points).sqrt())
        }
        ReductionOrder::Legacy => global_combine(sum, (local_sum_sq / num_points).sqrt()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Topology;

    /// every pe contributed the same value
    struct Replicated(usize);

    impl GlobalSum for Replicated {
        fn global_sum(&self, value: f64) -> Result<f64, RdmaError> {
            Ok(value * self.0 as f64)
        }
    }

    #[test]
    fn sum_sq_uses_global_index() {
        let part = Partition::new(8, Topology::new(1, 2)).unwrap();
        let field = vec![4.0, 5.0, 6.0, 9.0];
        let pool = WorkPool::new(2, 1);
        assert_eq!(local_sum_sq(&pool, &field, &part, |g| g as f64), 4.0);
        assert_eq!(local_error(4.0, 4), 1.0);
    }

    #[test]
    fn reduction_orders() {
        let sum = Replicated(4);
        // four pes, each with a squared error of 2 over 8 points in total
        let standard = global_error(&sum, 2.0, 8, ReductionOrder::Standard).unwrap();
        assert_eq!(standard, 1.0);
        let legacy = global_error(&sum, 2.0, 8, ReductionOrder::Legacy).unwrap();
        assert_eq!(legacy, 2.0);
    }

    #[test]
    fn orders_agree_on_one_pe() {
        let sum = Replicated(1);
        let standard = global_error(&sum, 0.5, 32, ReductionOrder::Standard).unwrap();
        let legacy = global_error(&sum, 0.5, 32, ReductionOrder::Legacy).unwrap();
        assert_eq!(standard, legacy);
    }
}
