use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vxio_core::config::LoaderConfig;
use vxio_core::error::ConfigError;

/// Chooses which sample indices each producer assembles next.
///
/// Random mode draws with replacement from a per-thread RNG. Sequential mode gives every
/// thread its own cursor; thread `t` starts at `start + t * batch_per_step` and strides by
/// `num_threads * batch_per_step`, so the threads jointly sweep the store in order.
#[derive(Debug)]
pub struct IndexScheduler {
    num_entries: usize,
    num_threads: usize,
    batch_per_step: usize,
    mode: Mode,
}

#[derive(Debug)]
enum Mode {
    Random(Vec<Mutex<StdRng>>),
    Sequential(Vec<AtomicUsize>),
}

impl IndexScheduler {
    pub fn new(config: &LoaderConfig, num_entries: usize) -> Result<Self, ConfigError> {
        if num_entries == 0 {
            return Err(ConfigError::EmptyStore);
        }
        if config.num_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        let mode = if config.shuffle {
            Mode::Random(
                (0..config.num_threads)
                    .map(|t| {
                        let rng = match config.seed {
                            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(t as u64)),
                            None => StdRng::from_entropy(),
                        };
                        Mutex::new(rng)
                    })
                    .collect(),
            )
        } else {
            Mode::Sequential((0..config.num_threads).map(|_| AtomicUsize::new(0)).collect())
        };
        let scheduler = Self {
            num_entries,
            num_threads: config.num_threads,
            batch_per_step: config.batch_per_step,
            mode,
        };
        scheduler.reset_cursors(config.start_index);
        Ok(scheduler)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self.mode, Mode::Sequential(_))
    }

    /// Next `batch_per_step` indices for `thread_id`. Only the owning producer calls this.
    pub fn next_indices(&self, thread_id: usize) -> Vec<usize> {
        let n = self.num_entries;
        match &self.mode {
            Mode::Random(rngs) => {
                let mut rng = rngs[thread_id]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                (0..self.batch_per_step)
                    .map(|_| rng.gen_range(0..n))
                    .collect()
            }
            Mode::Sequential(cursors) => {
                let start = cursors[thread_id].load(Ordering::Acquire);
                let indices = (0..self.batch_per_step).map(|k| (start + k) % n).collect();
                let stride = (self.num_threads * self.batch_per_step) % n;
                cursors[thread_id].store((start + stride) % n, Ordering::Release);
                indices
            }
        }
    }

    /// Current sequential cursor of `thread_id`; `None` in random mode.
    pub fn cursor(&self, thread_id: usize) -> Option<usize> {
        match &self.mode {
            Mode::Random(_) => None,
            Mode::Sequential(cursors) => Some(cursors[thread_id].load(Ordering::Acquire)),
        }
    }

    /// Rewinds every cursor to `start_index + t * batch_per_step`. Callers pause producers first.
    pub fn reset_cursors(&self, start_index: usize) {
        if let Mode::Sequential(cursors) = &self.mode {
            let n = self.num_entries;
            for (t, cursor) in cursors.iter().enumerate() {
                let first = (start_index % n + (t * self.batch_per_step) % n) % n;
                cursor.store(first, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_threads: usize, batch_per_step: usize, shuffle: bool) -> LoaderConfig {
        LoaderConfig {
            num_threads,
            batch_per_step,
            shuffle,
            seed: Some(7),
            ..LoaderConfig::default()
        }
    }

    #[test]
    fn sequential_wraps_from_start_index() {
        let mut cfg = config(1, 4, false);
        cfg.start_index = 8;
        let s = IndexScheduler::new(&cfg, 10).unwrap();
        assert_eq!(s.next_indices(0), vec![8, 9, 0, 1]);
        assert_eq!(s.cursor(0), Some(2));
        assert_eq!(s.next_indices(0), vec![2, 3, 4, 5]);
    }

    #[test]
    fn sequential_threads_interleave() {
        let s = IndexScheduler::new(&config(2, 3, false), 12).unwrap();
        assert_eq!(s.next_indices(0), vec![0, 1, 2]);
        assert_eq!(s.next_indices(1), vec![3, 4, 5]);
        assert_eq!(s.next_indices(0), vec![6, 7, 8]);
        assert_eq!(s.next_indices(1), vec![9, 10, 11]);
        assert_eq!(s.next_indices(0), vec![0, 1, 2]);

        s.reset_cursors(5);
        assert_eq!(s.cursor(0), Some(5));
        assert_eq!(s.cursor(1), Some(8));
    }

    #[test]
    fn random_draws_stay_in_range_and_are_seeded() {
        let a = IndexScheduler::new(&config(2, 64, true), 9).unwrap();
        let b = IndexScheduler::new(&config(2, 64, true), 9).unwrap();
        let draws = a.next_indices(1);
        assert_eq!(draws.len(), 64);
        assert!(draws.iter().all(|&i| i < 9));
        assert_eq!(draws, b.next_indices(1));
        assert!(a.cursor(0).is_none());
    }

    #[test]
    fn empty_store_is_rejected() {
        assert_eq!(
            IndexScheduler::new(&config(1, 1, false), 0).unwrap_err(),
            ConfigError::EmptyStore
        );
    }
}
