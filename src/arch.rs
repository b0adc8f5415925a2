//! Block decomposition of the global grid over the pes of a [World][crate::World].

/// Who this pe is within the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topology {
    pub my_pe: usize,
    pub num_pes: usize,
}

impl Topology {
    pub fn new(my_pe: usize, num_pes: usize) -> Topology {
        Topology { my_pe, num_pes }
    }

    pub fn is_first(&self) -> bool {
        self.my_pe == 0
    }

    pub fn is_last(&self) -> bool {
        self.my_pe + 1 == self.num_pes
    }
}

/// A grid that cannot be split evenly across the pes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionError {
    Empty { num_points: usize, num_pes: usize },
    /// the pe id lies outside of the job
    InvalidPe { my_pe: usize, num_pes: usize },
    Indivisible { num_points: usize, num_pes: usize },
}

impl std::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PartitionError::Empty { num_points, num_pes } => write!(
                f,
                "cannot partition {} points over {} pes",
                num_points, num_pes
            ),
            PartitionError::InvalidPe { my_pe, num_pes } => {
                write!(f, "pe {} is not part of a job with {} pes", my_pe, num_pes)
            }
            PartitionError::Indivisible { num_points, num_pes } => write!(
                f,
                "{} points are not divisible by {} pes",
                num_points, num_pes
            ),
        }
    }
}

impl std::error::Error for PartitionError {}

type PartitionResult<T> = Result<T, PartitionError>;

/// Contiguous equal slices of `num_points`, slice `i` owned by pe `i`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    topology: Topology,
    slice_len: usize,
}

impl Partition {
    /// Fails when there is nothing to split or the split would be uneven.
    pub fn new(num_points: usize, topology: Topology) -> PartitionResult<Partition> {
        let num_pes = topology.num_pes;
        if num_points == 0 || num_pes == 0 {
            return Err(PartitionError::Empty { num_points, num_pes });
        }
        if topology.my_pe >= num_pes {
            return Err(PartitionError::InvalidPe {
                my_pe: topology.my_pe,
                num_pes,
            });
        }
        if num_points % num_pes != 0 {
            return Err(PartitionError::Indivisible { num_points, num_pes });
        }
        Ok(Partition {
            topology,
            slice_len: num_points / num_pes,
        })
    }

    pub fn slice_len(&self) -> usize {
        self.slice_len
    }

    /// first global index owned by this pe
    pub fn start(&self) -> usize {
        self.topology.my_pe * self.slice_len
    }

    pub fn global_index(&self, local: usize) -> usize {
        debug_assert!(local < self.slice_len);
        self.start() + local
    }

    pub fn owned(&self) -> std::ops::Range<usize> {
        self.start()..self.start() + self.slice_len
    }
}
