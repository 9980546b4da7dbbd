//! Wall-clock measurement with growing repeat counts.

use std::time::{Duration, Instant};

/// Initial number of runs of a timed operation.
pub const MIN_RUNS: usize = 8;

/// Runs `f` at least [`MIN_RUNS`] times, doubling the run count until the
/// total time reaches `t_measure`, and returns the mean time per run in
/// seconds.
pub fn measure<F, E>(t_measure: Duration, mut f: F) -> Result<f64, E>
where
    F: FnMut() -> Result<(), E>,
{
    measure_from(MIN_RUNS, t_measure, &mut f)
}

/// Runs `f` once, returning its duration in seconds.
pub fn measure_once<F, E>(mut f: F) -> Result<f64, E>
where
    F: FnMut() -> Result<(), E>,
{
    measure_from(1, Duration::ZERO, &mut f)
}

fn measure_from<F, E>(n_start: usize, t_measure: Duration, f: &mut F) -> Result<f64, E>
where
    F: FnMut() -> Result<(), E>,
{
    let start = Instant::now();
    let mut elapsed = Duration::ZERO;
    let mut n_runs = n_start.max(1);
    let mut run_id = 0;
    while run_id < n_runs {
        while run_id < n_runs {
            f()?;
            run_id += 1;
        }
        elapsed = start.elapsed();
        if elapsed < t_measure {
            n_runs *= 2;
        }
    }
    Ok(elapsed.as_secs_f64() / n_runs as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_runs_at_least_min_runs() {
        let mut count = 0usize;
        let t = measure::<_, ()>(Duration::ZERO, || {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, MIN_RUNS);
        assert!(t >= 0.0);
    }

    #[test]
    fn test_measure_doubles_until_time_reached() {
        let mut count = 0usize;
        measure::<_, ()>(Duration::from_millis(5), || {
            count += 1;
            std::thread::sleep(Duration::from_micros(200));
            Ok(())
        })
        .unwrap();
        assert!(count >= MIN_RUNS);
        assert!(count.is_power_of_two());
    }

    #[test]
    fn test_measure_propagates_errors() {
        let r = measure(Duration::from_secs(1), || Err("failed"));
        assert_eq!(r, Err("failed"));
        assert_eq!(measure_once::<_, ()>(|| Ok(())).map(|t| t >= 0.0), Ok(true));
    }
}
