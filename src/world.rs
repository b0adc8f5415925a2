use crate::arch::Topology;
use crate::collective::SumReducer;
use crate::fabric::{
    local::LocalComm, shmem::ShmemComm, AllocError, Backend, Comm, CommInfo, CommMem,
    CommProgress, CommRdma, MismatchKind, RdmaCounts, RdmaError,
};
use crate::memregion::{Dist, SymmetricBuffer};

use std::sync::Arc;
use tracing::debug;

/// An abstraction representing all the PE's (processing elements) within a given distributed execution.
///
/// Constructing a world is collective: every pe of the job must build one, with the same backend.
/// Tearing it down with [World::finalize] is collective as well.
pub struct World {
    reducer: SumReducer,
    comm: Arc<Comm>,
    my_pe: usize,
    num_pes: usize,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("my_pe", &self.my_pe)
            .field("num_pes", &self.num_pes)
            .field("backend", &self.comm.backend())
            .finish()
    }
}

impl World {
    /// Returns the id of this PE (roughly equivalent to MPI Rank)
    pub fn my_pe(&self) -> usize {
        self.my_pe
    }

    /// Returns number of PE's in this execution
    pub fn num_pes(&self) -> usize {
        self.num_pes
    }

    pub fn topology(&self) -> Topology {
        Topology::new(self.my_pe, self.num_pes)
    }

    pub fn backend(&self) -> Backend {
        self.comm.backend()
    }

    /// Global synchronization, returns once every pe has entered this barrier
    #[tracing::instrument(skip_all)]
    pub fn barrier(&self) {
        self.comm.barrier();
    }

    /// Collectively allocate `len` elements of `T` on every pe.
    ///
    /// Every pe must call this with the same `len` and `T`, in the same order relative to
    /// other symmetric allocations, or the allocation fails on every pe with
    /// [AllocError::TopologyMismatch].
    #[tracing::instrument(skip_all)]
    pub fn alloc_symmetric<T: Dist>(&self, len: usize) -> Result<SymmetricBuffer<T>, AllocError> {
        self.alloc_symmetric_named("", len)
    }

    /// As [World::alloc_symmetric], the label must also match across pes
    #[tracing::instrument(skip(self), fields(my_pe = self.my_pe))]
    pub fn alloc_symmetric_named<T: Dist>(
        &self,
        label: &str,
        len: usize,
    ) -> Result<SymmetricBuffer<T>, AllocError> {
        SymmetricBuffer::new(self.comm.clone(), label, len)
    }

    /// Blocking collective sum of one value per pe, the same result is returned on every pe
    #[tracing::instrument(skip_all)]
    pub fn sum_reduce(&self, value: f64) -> Result<f64, RdmaError> {
        self.reducer.sum(value)
    }

    /// one-sided operations this pe has issued to other pes
    pub fn rdma_stats(&self) -> RdmaCounts {
        self.comm.rdma_stats()
    }

    /// bytes of symmetric memory currently mapped by this pe
    pub fn mem_occupied(&self) -> usize {
        self.comm.mem_occupied()
    }

    /// Collective shutdown, no pe unmaps the runtime segments while others still use them
    #[tracing::instrument(skip_all)]
    pub fn finalize(self) {
        self.barrier();
        debug!(my_pe = self.my_pe, "world finalized");
    }
}

/// An implementation of the Builder design pattern, used to construct an instance of a [World].
///
/// Allows for customizing the way the world is built.
///
/// # Examples
///
///```
/// use symwave::{WorldBuilder, Backend};
///
/// let world = WorldBuilder::new()
///     .with_fabric(Backend::Local)
///     .build()
///     .expect("world");
///```
#[derive(Debug)]
pub struct WorldBuilder {
    backend: Backend,
    topology: Option<(usize, usize, usize)>,
}

impl Default for WorldBuilder {
    fn default() -> Self {
        WorldBuilder::new()
    }
}

impl WorldBuilder {
    /// Construct a new world builder, the backend defaults to `SYMWAVE_BACKEND`
    #[tracing::instrument(skip_all)]
    pub fn new() -> WorldBuilder {
        WorldBuilder {
            backend: Backend::default(),
            topology: None,
        }
    }

    /// Specify the fabric backend to use for this execution
    #[tracing::instrument(skip_all)]
    pub fn with_fabric(mut self, backend: Backend) -> WorldBuilder {
        self.backend = backend;
        self
    }

    /// Join job `job_id` as `my_pe` of `num_pes` rather than reading the launcher's environment.
    ///
    /// Used to emulate several pes as threads of one process.
    #[tracing::instrument(skip_all)]
    pub fn with_topology(mut self, my_pe: usize, num_pes: usize, job_id: usize) -> WorldBuilder {
        self.topology = Some((my_pe, num_pes, job_id));
        self
    }

    /// Instantiate a world handle, collective over every pe of the job
    #[tracing::instrument(skip_all)]
    pub fn build(self) -> Result<World, AllocError> {
        let comm: Comm = match self.backend {
            Backend::Local => {
                if let Some((pe, num_pes, _)) = self.topology {
                    if num_pes != 1 || pe != 0 {
                        return Err(AllocError::TopologyMismatch(MismatchKind::NumPes {
                            expected: num_pes,
                            found: 1,
                        }));
                    }
                }
                LocalComm::new().into()
            }
            Backend::Shmem => match self.topology {
                Some((pe, num_pes, job_id)) => ShmemComm::new(pe, num_pes, job_id)?.into(),
                None => ShmemComm::from_env()?.into(),
            },
        };
        let comm = Arc::new(comm);
        let reducer = SumReducer::new(comm.clone())?;
        let world = World {
            my_pe: comm.my_pe(),
            num_pes: comm.num_pes(),
            reducer,
            comm,
        };
        debug!(?world, "world built");
        Ok(world)
    }
}
