use crate::world::World;

use tracing::info;

/// The global synchronization separating timesteps
pub trait Rendezvous {
    fn rendezvous(&self);
}

impl Rendezvous for World {
    fn rendezvous(&self) {
        self.barrier();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSummary {
    pub steps: usize,
    pub final_time: f64,
}

/// Drives the solution from `start_time` to `stop_time`.
///
/// The last step is shortened so the loop lands on `stop_time`, and the loop exits once
/// `t` reaches `safety_factor * stop_time` so that rounding cannot add an extra sliver step.
#[derive(Debug, Clone, Copy)]
pub struct TimeLoop {
    pub start_time: f64,
    pub stop_time: f64,
    pub dt: f64,
    pub safety_factor: f64,
    /// steps between progress records, 0 disables them
    pub progress_interval: usize,
    pub my_pe: usize,
}

impl TimeLoop {
    /// `step(n, dt)` must advance the solution by one step of `dt`.
    pub fn run<R, F, E>(&self, sync: &R, mut step: F) -> Result<LoopSummary, E>
    where
        R: Rendezvous + ?Sized,
        F: FnMut(usize, f64) -> Result<(), E>,
    {
        let mut t = self.start_time;
        let mut dt = self.dt;
        let mut steps = 0;
        while t < self.safety_factor * self.stop_time {
            if t + dt >= self.stop_time {
                dt = self.stop_time - t;
            }
            step(steps, dt)?;
            sync.rendezvous();
            if self.progress_interval > 0 && steps % self.progress_interval == 0 {
                info!(pe = self.my_pe, step = steps, "Current integration time = {}", t);
            }
            t += dt;
            steps += 1;
        }
        Ok(LoopSummary {
            steps,
            final_time: t,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Count(Cell<usize>);

    impl Rendezvous for Count {
        fn rendezvous(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn time_loop(dt: f64) -> TimeLoop {
        TimeLoop {
            start_time: 0.0,
            stop_time: 1.0,
            dt,
            safety_factor: 1.0 - 1.0e-5,
            progress_interval: 2,
            my_pe: 0,
        }
    }

    #[test]
    fn last_step_is_clamped() {
        let sync = Count::default();
        let mut dts = vec![];
        let summary = time_loop(0.3)
            .run(&sync, |_, dt| {
                dts.push(dt);
                Ok::<(), ()>(())
            })
            .unwrap();
        assert_eq!(summary.steps, 4);
        assert_eq!(sync.0.get(), 4);
        assert!((summary.final_time - 1.0).abs() < 1e-12);
        assert_eq!(&dts[..3], &[0.3, 0.3, 0.3]);
        assert!((dts[3] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn exact_division_takes_no_sliver_step() {
        let sync = Count::default();
        let summary = time_loop(0.125).run(&sync, |_, _| Ok::<(), ()>(())).unwrap();
        assert_eq!(summary.steps, 8);
        assert_eq!(summary.final_time, 1.0);
    }

    #[test]
    fn step_errors_stop_the_loop() {
        let sync = Count::default();
        let err = time_loop(0.1)
            .run(&sync, |n, _| if n == 3 { Err(n) } else { Ok(()) })
            .unwrap_err();
        assert_eq!(err, 3);
        assert_eq!(sync.0.get(), 3);
    }
}
