use std::sync::OnceLock;

use serde::Deserialize;

fn default_deadlock_timeout() -> f64 {
    600.0
}

fn default_backend() -> String {
    "local".to_owned()
}

fn default_threads() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.into(),
        Err(_) => 4,
    }
}

fn default_threads_per_block() -> usize {
    256
}

fn default_num_points() -> usize {
    1048576
}

fn default_stability_factor() -> f64 {
    0.5
}

fn default_safety_factor() -> f64 {
    1.0 - 1.0e-5
}

fn default_period() -> f64 {
    1.0
}

fn default_progress_interval() -> usize {
    100000
}

fn default_shmem_open_retries() -> usize {
    200
}

/// Order in which the per-PE error contributions are combined into the global norm
#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ReductionOrder {
    /// sum the squared errors across PEs, then take a single square root
    Standard,
    /// normalize and root on every PE, then sum the roots
    Legacy,
}

fn default_reduction() -> ReductionOrder {
    ReductionOrder::Standard
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// A general timeout in seconds after which a waiting barrier reports a potential deadlock, default: 600.0 seconds
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// flag used to print warnings when a barrier exceeds the deadlock timeout. Default: true
    pub barrier_warning: Option<bool>,

    /// The fabric backend to use
    /// local -- single pe execution, default
    /// shmem -- multi pe single node execution
    #[serde(default = "default_backend")]
    pub backend: String, //local,shmem

    /// number of pes in the job, read by the shmem backend
    pub num_pes: Option<usize>,
    /// id of this pe, read by the shmem backend
    pub pe_id: Option<usize>,
    /// a per launch identifier used to name the shared memory segments
    pub job_id: Option<usize>,

    /// worker threads per pe
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// number of grid points handed to a worker at a time
    #[serde(default = "default_threads_per_block")]
    pub threads_per_block: usize,

    /// total number of points in the global grid
    #[serde(default = "default_num_points")]
    pub num_points: usize,
    /// dt = stability_factor * dx, must be <= 1 for a stable run
    #[serde(default = "default_stability_factor")]
    pub stability_factor: f64,
    /// the loop exits once t >= safety_factor * stop_time
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,
    /// simulated time span
    #[serde(default = "default_period")]
    pub period: f64,
    /// steps between progress reports, 0 disables them
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
    #[serde(default = "default_reduction")]
    pub reduction: ReductionOrder,

    /// pin each pe to the core matching its id
    pub bind_cores: Option<bool>,
    #[serde(default = "default_shmem_open_retries")]
    pub shmem_open_retries: usize,
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("SYMWAVE_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}
