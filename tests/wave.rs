mod common;

use common::{params, run_pes};
use serial_test::serial;
use symwave::solver::grid::sine_pattern;
use symwave::{
    Backend, RdmaCounts, ReductionOrder, SolverError, SolverParams, WaveReport, WaveSolver,
    WorldBuilder,
};

const NUM_POINTS: usize = 1024;

fn single_pe_run(params: SolverParams) -> WaveReport {
    let world = WorldBuilder::new()
        .with_fabric(Backend::Local)
        .build()
        .unwrap();
    let report = WaveSolver::new(&world, params).run().unwrap();
    world.finalize();
    report
}

fn multi_pe_run(num_pes: usize, params: SolverParams) -> Vec<(WaveReport, RdmaCounts)> {
    run_pes(num_pes, move |world| {
        let report = WaveSolver::new(&world, params.clone()).run().unwrap();
        let counts = world.rdma_stats();
        world.finalize();
        (report, counts)
    })
}

fn max_abs(field: &[f64]) -> f64 {
    field.iter().fold(0.0, |m: f64, u| m.max(u.abs()))
}

macro_rules! create_test {
    ($name:ident, $num_pes:expr) => {
        paste::paste! {
            #[test]
            #[serial]
            fn [<$name _ $num_pes _pes>]() {
                $name($num_pes);
            }
        }
    };
}

macro_rules! iter_num_pes {
    ($name:ident, ($($num_pes:expr),*)) => {
        $(
            create_test!($name, $num_pes);
        )*
    };
}

fn matches_single_pe_field(num_pes: usize) {
    let single = single_pe_run(params(NUM_POINTS));
    assert!(single.global_error < 1.0e-2, "error {}", single.global_error);

    let reports = multi_pe_run(num_pes, params(NUM_POINTS));
    let field: Vec<f64> = reports.iter().flat_map(|(r, _)| r.field.clone()).collect();
    assert_eq!(field, single.field);

    let global = reports[0].0.global_error;
    for (pe, (report, _)) in reports.iter().enumerate() {
        assert_eq!(report.my_pe, pe);
        assert_eq!(report.steps, single.steps);
        assert_eq!(report.global_error.to_bits(), global.to_bits());
    }
    assert!((global - single.global_error).abs() < 1.0e-12);
}

fn one_get_per_bordering_side(num_pes: usize) {
    let reports = multi_pe_run(num_pes, params(NUM_POINTS));
    for (report, counts) in reports {
        let sides = if num_pes == 1 {
            0
        } else if report.my_pe == 0 || report.my_pe + 1 == num_pes {
            1
        } else {
            2
        };
        assert_eq!(counts.remote_gets, sides * report.steps);
    }
}

fn only_the_reduction_writes_remotely(num_pes: usize) {
    let reports = multi_pe_run(num_pes, params(NUM_POINTS));
    for (_, counts) in reports {
        // the error reduction publishes one f64 to every other pe, grid levels are never written
        assert_eq!(counts.remote_puts, num_pes - 1);
        assert_eq!(counts.bytes_put, 8 * (num_pes - 1));
    }
}

fn global_edges_stay_fixed(num_pes: usize) {
    let reports = multi_pe_run(num_pes, params(NUM_POINTS));
    let first = &reports[0].0;
    let last = &reports[num_pes - 1].0;
    assert_eq!(first.field[0], 0.0);
    let end = sine_pattern(NUM_POINTS)(NUM_POINTS - 1);
    assert_eq!(*last.field.last().unwrap(), end);
}

fn legacy_order_sums_roots(num_pes: usize) {
    let legacy = SolverParams {
        reduction: ReductionOrder::Legacy,
        ..params(NUM_POINTS)
    };
    let reports = multi_pe_run(num_pes, legacy);
    // each pe contributes sqrt(sum_sq / num_points) = local_error * sqrt(slice / num_points)
    let scale = (1.0 / num_pes as f64).sqrt();
    let expected: f64 = reports.iter().map(|(r, _)| r.local_error * scale).sum();
    for (report, _) in &reports {
        assert!((report.global_error - expected).abs() < 1.0e-12);
    }
}

iter_num_pes!(matches_single_pe_field, (2, 4));
iter_num_pes!(one_get_per_bordering_side, (1, 2, 4));
iter_num_pes!(global_edges_stay_fixed, (2, 4));
iter_num_pes!(legacy_order_sums_roots, (2, 4));
iter_num_pes!(only_the_reduction_writes_remotely, (1, 2, 4));

#[test]
#[serial]
fn stable_run_stays_bounded() {
    let report = single_pe_run(params(NUM_POINTS));
    assert!(max_abs(&report.field) <= 1.01, "max {}", max_abs(&report.field));
}

#[test]
#[serial]
fn courant_above_one_runs_to_completion_and_blows_up() {
    let unstable = SolverParams {
        stability_factor: 1.5,
        ..params(256)
    };
    let report = single_pe_run(unstable);
    // one period at dt = 1.5 dx
    assert!(report.steps >= 150 && report.steps <= 200, "steps {}", report.steps);
    assert!(
        report.field.iter().any(|u| !u.is_finite() || u.abs() > 1.0e3),
        "max {}",
        max_abs(&report.field)
    );
    // inf and NaN both fail the comparison
    assert!(!(report.global_error < 1.0), "error {}", report.global_error);
}

#[test]
#[serial]
fn indivisible_grid_fails_on_every_pe() {
    let results = run_pes(3, |world| {
        let res = WaveSolver::new(&world, params(1000)).run().map(|_| ());
        world.finalize();
        res
    });
    for res in results {
        assert!(matches!(res, Err(SolverError::TopologyMismatch(_))));
    }
}
