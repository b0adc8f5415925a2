//! The distributed explicit solver for the 1D wave equation `u_tt = u_xx` on `[0, 1]`.
//!
//! Each pe owns one contiguous slice of the grid, stored in three symmetric buffers so that
//! neighbors can read the single halo value they lack straight out of its memory.
//!
//! # Examples
//!
//!```
//! use symwave::{SolverParams, WaveSolver, WorldBuilder};
//!
//! let world = WorldBuilder::new().build().expect("world");
//! let params = SolverParams { num_points: 1024, ..SolverParams::from_config() };
//! let report = WaveSolver::new(&world, params).run().expect("run");
//! println!("Error = {}", report.global_error);
//! world.finalize();
//!```
pub mod boundary;
pub mod grid;
pub mod reduce;
pub mod stencil;
pub mod time_loop;

use crate::arch::{Partition, PartitionError};
use crate::env_var::{config, ReductionOrder};
use crate::fabric::{AllocError, RdmaError};
use crate::pool::WorkPool;
use crate::warnings::RuntimeWarning;
use crate::world::World;
use boundary::BoundaryResolver;
use grid::{sine_pattern, FieldBuffer, GridBuffer, GridState};
use stencil::StencilStepper;
use time_loop::TimeLoop;

use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    AllocationFailure(AllocError),
    TopologyMismatch(String),
    Rdma(RdmaError),
    InvalidParameter(String),
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SolverError::AllocationFailure(e) => write!(f, "allocation failure: {}", e),
            SolverError::TopologyMismatch(msg) => write!(f, "topology mismatch: {}", msg),
            SolverError::Rdma(e) => write!(f, "remote access failed: {}", e),
            SolverError::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
        }
    }
}

impl std::error::Error for SolverError {}

impl From<AllocError> for SolverError {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::TopologyMismatch(kind) => SolverError::TopologyMismatch(kind.to_string()),
            e => SolverError::AllocationFailure(e),
        }
    }
}

impl From<PartitionError> for SolverError {
    fn from(e: PartitionError) -> Self {
        SolverError::TopologyMismatch(e.to_string())
    }
}

impl From<RdmaError> for SolverError {
    fn from(e: RdmaError) -> Self {
        SolverError::Rdma(e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverParams {
    pub num_points: usize,
    pub threads: usize,
    pub threads_per_block: usize,
    /// dt / dx
    pub stability_factor: f64,
    pub safety_factor: f64,
    pub period: f64,
    pub progress_interval: usize,
    pub reduction: ReductionOrder,
    pub bind_cores: bool,
}

impl SolverParams {
    pub fn from_config() -> SolverParams {
        let config = config();
        SolverParams {
            num_points: config.num_points,
            threads: config.threads,
            threads_per_block: config.threads_per_block,
            stability_factor: config.stability_factor,
            safety_factor: config.safety_factor,
            period: config.period,
            progress_interval: config.progress_interval,
            reduction: config.reduction,
            bind_cores: config.bind_cores.unwrap_or(false),
        }
    }

    pub fn dx(&self) -> f64 {
        1.0 / (self.num_points as f64 - 1.0)
    }

    pub fn dt(&self) -> f64 {
        self.stability_factor * self.dx()
    }

    /// the CFL number, the scheme is stable only up to 1
    pub fn courant(&self) -> f64 {
        self.dt() / self.dx()
    }

    pub fn validate(&self) -> Result<(), SolverError> {
        if self.num_points < 2 {
            return Err(SolverError::InvalidParameter(format!(
                "need at least 2 grid points, got {}",
                self.num_points
            )));
        }
        if !(self.stability_factor.is_finite() && self.stability_factor > 0.0) {
            return Err(SolverError::InvalidParameter(format!(
                "stability factor must be positive, got {}",
                self.stability_factor
            )));
        }
        if !(self.safety_factor > 0.0 && self.safety_factor < 1.0) {
            return Err(SolverError::InvalidParameter(format!(
                "safety factor must lie in (0, 1), got {}",
                self.safety_factor
            )));
        }
        if !(self.period.is_finite() && self.period > 0.0) {
            return Err(SolverError::InvalidParameter(format!(
                "period must be positive, got {}",
                self.period
            )));
        }
        if self.threads == 0 || self.threads_per_block == 0 {
            return Err(SolverError::InvalidParameter(format!(
                "need at least one thread and one point per block, got {} threads of {} points",
                self.threads, self.threads_per_block
            )));
        }
        Ok(())
    }
}

/// The outcome of a run as seen by one pe
#[derive(Debug, Clone, PartialEq)]
pub struct WaveReport {
    pub my_pe: usize,
    pub num_pes: usize,
    pub steps: usize,
    pub final_time: f64,
    /// RMS error over this pe's points
    pub local_error: f64,
    /// identical on every pe
    pub global_error: f64,
    /// this pe's slice at `final_time`
    pub field: Vec<f64>,
}

/// Runs one period of the standing sine wave on one pe, collective over the world
pub struct WaveSolver<'a> {
    world: &'a World,
    params: SolverParams,
}

impl<'a> WaveSolver<'a> {
    pub fn new(world: &'a World, params: SolverParams) -> WaveSolver<'a> {
        WaveSolver { world, params }
    }

    #[tracing::instrument(skip_all, fields(my_pe = self.world.my_pe()))]
    pub fn run(&self) -> Result<WaveReport, SolverError> {
        let params = &self.params;
        let world = self.world;
        params.validate()?;
        RuntimeWarning::UnstableCourant(params.courant()).print();
        let cores = if params.bind_cores {
            crate::device::bind_pe(world.my_pe(), world.num_pes()).unwrap_or_default()
        } else {
            vec![]
        };

        let partition = Partition::new(params.num_points, world.topology())?;
        let slice_len = partition.slice_len();
        let buffers = [
            GridBuffer::new(world.alloc_symmetric_named::<f64>("wave_u", slice_len)?),
            GridBuffer::new(world.alloc_symmetric_named::<f64>("wave_u_old", slice_len)?),
            GridBuffer::new(world.alloc_symmetric_named::<f64>("wave_u_older", slice_len)?),
        ];
        let mut grid = GridState::new(buffers);
        grid.initialize(&partition, sine_pattern(params.num_points));
        // no pe reads a halo before its neighbor has initialized
        world.barrier();

        let pool = WorkPool::with_cores(params.threads, params.threads_per_block, &cores);
        let stepper = StencilStepper::new(BoundaryResolver::new(world.topology(), slice_len), pool);
        let dx = params.dx();
        let time_loop = TimeLoop {
            start_time: 0.0,
            stop_time: params.period,
            dt: params.dt(),
            safety_factor: params.safety_factor,
            progress_interval: params.progress_interval,
            my_pe: world.my_pe(),
        };
        debug!(
            slice_len,
            dx,
            dt = params.dt(),
            threads = stepper.pool().threads(),
            "starting time loop"
        );
        let summary = time_loop.run(world, |_, dt| -> Result<(), SolverError> {
            stepper.step(&mut grid, dt, dx)?;
            grid.advance();
            Ok(())
        })?;

        let reference = sine_pattern(params.num_points);
        let sum_sq =
            reduce::local_sum_sq(stepper.pool(), grid.latest().values(), &partition, reference);
        let global_error = reduce::global_error(world, sum_sq, params.num_points, params.reduction)?;
        let local_error = reduce::local_error(sum_sq, slice_len);
        let field = grid.latest().values().to_vec();
        info!(
            steps = summary.steps,
            final_time = summary.final_time,
            local_error,
            global_error,
            "run complete"
        );

        for buffer in grid.into_buffers() {
            buffer.free(world);
        }
        Ok(WaveReport {
            my_pe: world.my_pe(),
            num_pes: world.num_pes(),
            steps: summary.steps,
            final_time: summary.final_time,
            local_error,
            global_error,
            field,
        })
    }
}
