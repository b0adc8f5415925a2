//! Symwave is a distributed explicit solver for the one dimensional wave equation, built on a
//! PGAS style symmetric heap rather than message passing.
//!
//! Every processing element (pe) owns a contiguous slice of the global grid. The three time
//! levels of that slice live in [SymmetricBuffer]s, allocated collectively so that every pe
//! can read any other pe's instance with a one-sided get. Each timestep a pe reads the single
//! boundary value it lacks from each neighbor, updates its slice on a pool of worker threads,
//! and enters a global barrier. After one period the grid wide L2 error against the initial
//! wave is combined with a collective sum.
//!
//! Pes communicate through a fabric backend. Two exist, one used for single pe development
//! ("local") and one used for single node, multi process execution ("shmem") in which every
//! allocation is a POSIX shared memory object mapped by all pes of the job.
//!
//! EXAMPLES
//! --------
//!
//! # Constructing a world and running the solver
//! ```
//! use symwave::{Backend, SolverParams, WaveSolver, WorldBuilder};
//!
//! let world = WorldBuilder::new()
//!     .with_fabric(Backend::Local) // defaults to SYMWAVE_BACKEND
//!     .build()
//!     .expect("unable to build world");
//! let report = WaveSolver::new(&world, SolverParams::from_config())
//!     .run()
//!     .expect("run failed");
//! println!("Error = {}", report.global_error);
//! world.finalize();
//! ```
//!
//! # Using the symmetric heap directly
//! ```
//! use symwave::WorldBuilder;
//!
//! let world = WorldBuilder::new().build().expect("world");
//! let buf = world.alloc_symmetric::<f64>(10).expect("alloc");
//! let next = (world.my_pe() + 1) % world.num_pes();
//! world.barrier();
//! let _val = buf.get(next, 0).expect("get");
//! buf.free(&world);
//! world.finalize();
//! ```
//!
//! Launch several pes on one node with `symwave_run.sh -N=4 -T=2 ./target/release/symwave`.

mod barrier;
mod collective;
mod env_var;
mod fabric;
mod warnings;

pub mod arch;
pub mod device;
pub mod memregion;
pub mod pool;
pub mod solver;
pub mod world;

pub(crate) use env_var::config;
pub use env_var::{Config, ReductionOrder};

pub use crate::arch::{Partition, PartitionError, Topology};
pub use crate::fabric::{AllocError, Backend, MismatchKind, RdmaCounts, RdmaError};
pub use crate::memregion::{Dist, SymmetricBuffer};
pub use crate::pool::{AtomicF64, WorkPool};
pub use crate::solver::{SolverError, SolverParams, WaveReport, WaveSolver};
pub use crate::world::{World, WorldBuilder};
