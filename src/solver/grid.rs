use super::boundary::HaloSource;
use crate::arch::Partition;
use crate::fabric::RdmaError;
use crate::memregion::SymmetricBuffer;
use crate::world::World;

/// Storage for one time level of a pe's slice.
pub trait FieldBuffer {
    fn values(&self) -> &[f64];
    fn values_mut(&mut self) -> &mut [f64];
}

impl FieldBuffer for Vec<f64> {
    fn values(&self) -> &[f64] {
        self
    }
    fn values_mut(&mut self) -> &mut [f64] {
        self
    }
}

/// One time level of a pe's slice, held in the symmetric heap.
///
/// Only the solver creates these, and the only remote access it ever makes to one is the
/// halo read through [HaloSource], so a local slice never aliases a remote write.
#[derive(Debug)]
pub struct GridBuffer {
    buffer: SymmetricBuffer<f64>,
}

impl GridBuffer {
    pub(crate) fn new(buffer: SymmetricBuffer<f64>) -> GridBuffer {
        GridBuffer { buffer }
    }

    /// Collective, see [SymmetricBuffer::free]
    pub(crate) fn free(self, world: &World) {
        self.buffer.free(world);
    }
}

// remote pes only read grid buffers, and never while this pe writes them
impl FieldBuffer for GridBuffer {
    fn values(&self) -> &[f64] {
        unsafe { self.buffer.as_slice() }
    }
    fn values_mut(&mut self) -> &mut [f64] {
        unsafe { self.buffer.as_mut_slice() }
    }
}

impl HaloSource for GridBuffer {
    fn remote_read(&self, pe: usize, index: usize) -> Result<f64, RdmaError> {
        self.buffer.get(pe, index)
    }
}

/// The default initial condition, one full sine wave over the global grid
pub fn sine_pattern(num_points: usize) -> impl Fn(usize) -> f64 + Sync {
    let denom = (num_points.max(2) - 1) as f64;
    move |global| (2.0 * std::f64::consts::PI * global as f64 / denom).sin()
}

/// Three time levels of a pe's slice: `current` (t), `previous` (t - dt) and `older` (t - 2dt).
///
/// Roles rotate by relabeling, the buffers never move.
#[derive(Debug)]
pub struct GridState<B> {
    buffers: [B; 3],
    rotation: usize,
}

impl<B: FieldBuffer> GridState<B> {
    pub fn new(buffers: [B; 3]) -> GridState<B> {
        let len = buffers[0].values().len();
        assert!(
            buffers.iter().all(|b| b.values().len() == len),
            "grid buffers must have equal length"
        );
        GridState {
            buffers,
            rotation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers[0].values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rotation(&self) -> usize {
        self.rotation
    }

    fn current_index(&self) -> usize {
        self.rotation
    }
    fn previous_index(&self) -> usize {
        (self.rotation + 2) % 3
    }
    fn older_index(&self) -> usize {
        (self.rotation + 1) % 3
    }

    pub fn current(&self) -> &B {
        &self.buffers[self.current_index()]
    }
    pub fn previous(&self) -> &B {
        &self.buffers[self.previous_index()]
    }
    pub fn older(&self) -> &B {
        &self.buffers[self.older_index()]
    }

    /// the most recently computed level once [GridState::advance] has run
    pub fn latest(&self) -> &B {
        self.previous()
    }

    /// older := previous, previous := current, current := the old older
    pub fn advance(&mut self) {
        self.rotation = (self.rotation + 1) % 3;
    }

    /// Fill all three levels with `pattern(global_index)`
    pub fn initialize<F: Fn(usize) -> f64>(&mut self, partition: &Partition, pattern: F) {
        debug_assert_eq!(partition.slice_len(), self.len());
        for buffer in self.buffers.iter_mut() {
            for (local, u) in buffer.values_mut().iter_mut().enumerate() {
                *u = pattern(partition.global_index(local));
            }
        }
    }

    /// (current, previous, older)
    pub fn split_mut(&mut self) -> (&mut [f64], &[f64], &[f64]) {
        let [b0, b1, b2] = &mut self.buffers;
        match self.rotation {
            0 => (b0.values_mut(), b2.values(), b1.values()),
            1 => (b1.values_mut(), b0.values(), b2.values()),
            _ => (b2.values_mut(), b1.values(), b0.values()),
        }
    }

    pub fn into_buffers(self) -> [B; 3] {
        self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Topology;

    fn labeled() -> GridState<Vec<f64>> {
        GridState::new([vec![0.0; 4], vec![1.0; 4], vec![2.0; 4]])
    }

    fn roles(grid: &GridState<Vec<f64>>) -> (f64, f64, f64) {
        (grid.current()[0], grid.previous()[0], grid.older()[0])
    }

    #[test]
    fn advance_rotates_roles() {
        let mut grid = labeled();
        assert_eq!(roles(&grid), (0.0, 2.0, 1.0));
        grid.advance();
        // current becomes previous, previous becomes older
        assert_eq!(roles(&grid), (1.0, 0.0, 2.0));
        grid.advance();
        assert_eq!(roles(&grid), (2.0, 1.0, 0.0));
        grid.advance();
        assert_eq!(roles(&grid), (0.0, 2.0, 1.0));
        assert_eq!(grid.rotation(), 0);
    }

    #[test]
    fn split_matches_roles() {
        let mut grid = labeled();
        for _ in 0..3 {
            let expected = roles(&grid);
            let (cur, prev, older) = grid.split_mut();
            assert_eq!((cur[0], prev[0], older[0]), expected);
            cur[0] += 10.0;
            assert_eq!(grid.current()[0], expected.0 + 10.0);
            grid.advance();
        }
    }

    #[test]
    fn initialize_uses_global_index() {
        let part = Partition::new(8, Topology::new(1, 2)).unwrap();
        let mut grid = GridState::new([vec![0.0; 4], vec![0.0; 4], vec![0.0; 4]]);
        grid.initialize(&part, |g| g as f64);
        for b in [grid.current(), grid.previous(), grid.older()] {
            assert_eq!(b.as_slice(), &[4.0, 5.0, 6.0, 7.0]);
        }
    }

    #[test]
    fn sine_pattern_spans_one_period() {
        let pattern = sine_pattern(5);
        assert_eq!(pattern(0), 0.0);
        assert!((pattern(1) - 1.0).abs() < 1e-15);
        assert!(pattern(4).abs() < 1e-12);
    }
}
