use anyhow::{Context, Result};
use symwave::{SolverParams, WaveSolver, WorldBuilder};
use tracing_subscriber::EnvFilter;

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let world = WorldBuilder::new()
        .build()
        .context("unable to join the symwave job")?;
    let params = SolverParams::from_config();
    tracing::info!(
        my_pe = world.my_pe(),
        num_pes = world.num_pes(),
        backend = ?world.backend(),
        num_points = params.num_points,
        threads = params.threads,
        "starting wave solver"
    );

    let report = match WaveSolver::new(&world, params).run() {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(my_pe = world.my_pe(), error = %e, "solver failed");
            return Err(e).context("wave solver failed");
        }
    };
    println!("Error = {}", report.global_error);

    world.finalize();
    Ok(())
}
