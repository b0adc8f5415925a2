use core_affinity::CoreId;
use tracing::{debug, warn};

/// The cores reserved for `my_pe`: an even share of `cores`, at least one, wrapping
/// around when there are more pes than cores.
pub fn pe_cores(my_pe: usize, num_pes: usize, cores: &[CoreId]) -> Vec<CoreId> {
    if cores.is_empty() {
        return vec![];
    }
    let share = (cores.len() / num_pes.max(1)).max(1);
    let start = my_pe * share;
    (0..share).map(|i| cores[(start + i) % cores.len()]).collect()
}

/// Pin the calling thread to the first core of `my_pe`'s share and return the share,
/// for the worker pool to spread its threads over.
pub fn bind_pe(my_pe: usize, num_pes: usize) -> Option<Vec<CoreId>> {
    let cores = match core_affinity::get_core_ids() {
        Some(cores) if !cores.is_empty() => cores,
        _ => {
            warn!(my_pe, "unable to query cores, pe left unbound");
            return None;
        }
    };
    let mine = pe_cores(my_pe, num_pes, &cores);
    core_affinity::set_for_current(mine[0]);
    debug!(
        my_pe,
        cores = ?mine.iter().map(|c| c.id).collect::<Vec<_>>(),
        "pe bound to cores"
    );
    Some(mine)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(cores: &[CoreId]) -> Vec<usize> {
        cores.iter().map(|c| c.id).collect()
    }

    #[test]
    fn pes_split_the_node() {
        let cores: Vec<CoreId> = (0..8).map(|id| CoreId { id }).collect();
        assert_eq!(ids(&pe_cores(0, 2, &cores)), vec![0, 1, 2, 3]);
        assert_eq!(ids(&pe_cores(1, 2, &cores)), vec![4, 5, 6, 7]);
        assert_eq!(ids(&pe_cores(2, 3, &cores)), vec![4, 5]);
        assert_eq!(ids(&pe_cores(0, 1, &cores)).len(), 8);
    }

    #[test]
    fn more_pes_than_cores_wrap_around() {
        let cores: Vec<CoreId> = (0..2).map(|id| CoreId { id }).collect();
        assert_eq!(ids(&pe_cores(3, 4, &cores)), vec![1]);
        assert_eq!(ids(&pe_cores(4, 4, &cores)), vec![0]);
        assert!(pe_cores(0, 1, &[]).is_empty());
    }

    #[test]
    fn binding_returns_the_pe_share() {
        let num_cores = core_affinity::get_core_ids().map(|c| c.len()).unwrap_or(0);
        if num_cores == 0 {
            return;
        }
        let handle = std::thread::spawn(move || bind_pe(num_cores, num_cores).map(|c| ids(&c)));
        let all = core_affinity::get_core_ids().unwrap();
        assert_eq!(handle.join().unwrap(), Some(vec![all[0].id]));
    }
}
