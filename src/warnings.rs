use tracing::warn;

use crate::config;

pub(crate) enum RuntimeWarning {
    BarrierTimeout(f64),
    UnstableCourant(f64),
}

impl RuntimeWarning {
    fn print_warning(&self) -> bool {
        match self {
            RuntimeWarning::BarrierTimeout(elapsed) => {
                let enabled = match config().barrier_warning {
                    Some(true) => true,
                    Some(false) => false,
                    None => true,
                };
                enabled && *elapsed > config().deadlock_timeout
            }
            RuntimeWarning::UnstableCourant(courant) => *courant > 1.0,
        }
    }

    pub(crate) fn print(self) {
        if self.print_warning() {
            match self {
                RuntimeWarning::BarrierTimeout(elapsed) => {
                    warn!(
                        elapsed,
                        timeout = config().deadlock_timeout,
                        "potential deadlock detected: barrier is a collective operation requiring every pe to enter it. \
                        Symmetric allocations and frees call it internally. \
                        The timeout can be set via SYMWAVE_DEADLOCK_TIMEOUT, set SYMWAVE_BARRIER_WARNING=false to silence this warning."
                    )
                }
                RuntimeWarning::UnstableCourant(courant) => {
                    warn!(
                        courant,
                        "courant number exceeds 1, the explicit update is unstable for this time step"
                    )
                }
            }
        }
    }
}
