use super::boundary::{BoundaryResolver, HaloSource};
use super::grid::{FieldBuffer, GridState};
use crate::fabric::RdmaError;
use crate::pool::WorkPool;

/// Advances a pe's slice by one explicit timestep of `u_tt = u_xx`
#[derive(Debug)]
pub struct StencilStepper {
    resolver: BoundaryResolver,
    pool: WorkPool,
}

impl StencilStepper {
    pub fn new(resolver: BoundaryResolver, pool: WorkPool) -> StencilStepper {
        StencilStepper { resolver, pool }
    }

    pub fn pool(&self) -> &WorkPool {
        &self.pool
    }

    /// Writes `current` from `previous` and `older`. The halo is read from the
    /// neighbors' `previous` before any block runs. Fixed points are left untouched.
    pub fn step<B>(&self, grid: &mut GridState<B>, dt: f64, dx: f64) -> Result<(), RdmaError>
    where
        B: FieldBuffer + HaloSource,
    {
        let halo = self.resolver.fetch_halo(grid.previous())?;
        let dtdxsq = (dt / dx) * (dt / dx);
        let resolver = &self.resolver;
        let (current, previous, older) = grid.split_mut();
        self.pool.for_each_block(current, |start, block| {
            for (i, u) in block.iter_mut().enumerate() {
                let idx = start + i;
                if let Some((left, right)) = resolver.neighbors(idx, previous, &halo) {
                    let u_old = previous[idx];
                    *u = 2.0 * u_old - older[idx] + dtdxsq * (right - 2.0 * u_old + left);
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Partition, Topology};
    use crate::solver::grid::sine_pattern;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// A grid buffer whose neighbors hold fixed values
    struct Buf {
        values: Vec<f64>,
        halo_value: f64,
        reads: Arc<Mutex<Vec<(usize, usize)>>>,
    }

    impl FieldBuffer for Buf {
        fn values(&self) -> &[f64] {
            &self.values
        }
        fn values_mut(&mut self) -> &mut [f64] {
            &mut self.values
        }
    }

    impl HaloSource for Buf {
        fn remote_read(&self, pe: usize, index: usize) -> Result<f64, RdmaError> {
            self.reads.lock().push((pe, index));
            Ok(self.halo_value)
        }
    }

    fn grid(len: usize, halo_value: f64) -> (GridState<Buf>, Arc<Mutex<Vec<(usize, usize)>>>) {
        let reads = Arc::new(Mutex::new(vec![]));
        let bufs = [(); 3].map(|_| Buf {
            values: vec![0.0; len],
            halo_value,
            reads: reads.clone(),
        });
        (GridState::new(bufs), reads)
    }

    fn run(stepper: &StencilStepper, grid: &mut GridState<Buf>, steps: usize, dt: f64, dx: f64) {
        for _ in 0..steps {
            stepper.step(grid, dt, dx).unwrap();
            grid.advance();
        }
    }

    #[test]
    fn uniform_field_stays_uniform() {
        let topology = Topology::new(1, 3);
        let part = Partition::new(96, topology).unwrap();
        let (mut grid, reads) = grid(32, 3.0);
        grid.initialize(&part, |_| 3.0);
        let stepper = StencilStepper::new(BoundaryResolver::new(topology, 32), WorkPool::new(2, 8));
        run(&stepper, &mut grid, 5, 0.5, 1.0);
        assert!(grid.current().values().iter().all(|u| *u == 3.0));
        // one read per side per step
        assert_eq!(reads.lock().len(), 10);
        assert!(reads.lock().chunks(2).all(|r| r == [(0, 31), (2, 0)]));
    }

    #[test]
    fn fixed_points_keep_initial_value() {
        let topology = Topology::new(0, 1);
        let part = Partition::new(64, topology).unwrap();
        let (mut grid, reads) = grid(64, 0.0);
        grid.initialize(&part, |g| 1.0 + g as f64 * 0.01);
        let stepper = StencilStepper::new(BoundaryResolver::new(topology, 64), WorkPool::new(4, 16));
        run(&stepper, &mut grid, 20, 0.5, 1.0);
        assert_eq!(grid.current().values()[0], 1.0);
        assert_eq!(grid.current().values()[63], 1.0 + 63.0 * 0.01);
        assert!(reads.lock().is_empty());
    }

    #[test]
    fn thread_count_does_not_change_results() {
        let topology = Topology::new(0, 1);
        let part = Partition::new(1000, topology).unwrap();
        let dx = 1.0 / 999.0;
        let mut results = vec![];
        for (threads, block) in [(1, 256), (3, 7), (8, 64)] {
            let (mut grid, _) = grid(1000, 0.0);
            grid.initialize(&part, sine_pattern(1000));
            let stepper =
                StencilStepper::new(BoundaryResolver::new(topology, 1000), WorkPool::new(threads, block));
            run(&stepper, &mut grid, 50, 0.5 * dx, dx);
            results.push(grid.current().values().to_vec());
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], results[2]);
    }
}
