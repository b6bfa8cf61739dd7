use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schema::DataSchema;

/// How producers and the consumer wait on a slot.
///
/// Both strategies give identical ordering. `Poll` sleeps a fixed short interval between
/// checks and trades CPU for handoff latency; `Park` blocks on a per-slot condition variable,
/// waking at least every `timeout_us` to observe pause/shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitStrategy {
    Poll { interval_us: u64 },
    Park { timeout_us: u64 },
}

impl WaitStrategy {
    pub fn interval(&self) -> Duration {
        match *self {
            WaitStrategy::Poll { interval_us } => Duration::from_micros(interval_us.max(1)),
            WaitStrategy::Park { timeout_us } => Duration::from_micros(timeout_us.max(1)),
        }
    }
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Poll { interval_us: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub num_threads: usize,
    /// Total samples per batch across all GPUs.
    pub batch_per_step: usize,
    pub num_gpus: usize,
    /// Random draws with replacement when true, a sequential sweep otherwise.
    pub shuffle: bool,
    pub data_keys: Vec<String>,
    /// First index of the sequential sweep.
    pub start_index: usize,
    /// Seeds the per-thread RNGs (thread `t` uses `seed + t`); entropy when unset.
    pub seed: Option<u64>,
    pub wait: WaitStrategy,
    pub data_dim: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            batch_per_step: 1,
            num_gpus: 1,
            shuffle: true,
            data_keys: vec!["data".to_string()],
            start_index: 0,
            seed: None,
            wait: WaitStrategy::default(),
            data_dim: 3,
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<DataSchema, ConfigError> {
        if self.num_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.num_gpus == 0 {
            return Err(ConfigError::ZeroGpus);
        }
        if self.batch_per_step == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.batch_per_step % self.num_gpus != 0 {
            return Err(ConfigError::IndivisibleBatch {
                batch_per_step: self.batch_per_step,
                num_gpus: self.num_gpus,
            });
        }
        if !(2..=3).contains(&self.data_dim) {
            return Err(ConfigError::UnsupportedDim(self.data_dim));
        }
        DataSchema::new(self.data_keys.iter().cloned())
    }

    pub fn batch_per_gpu(&self) -> usize {
        self.batch_per_step / self.num_gpus.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoaderConfig {
        LoaderConfig {
            num_threads: 2,
            batch_per_step: 4,
            num_gpus: 2,
            shuffle: false,
            data_keys: vec!["wire".into(), "label".into()],
            data_dim: 2,
            ..LoaderConfig::default()
        }
    }

    #[test]
    fn valid_config_yields_schema() {
        let cfg = config();
        let schema = cfg.validate().unwrap();
        assert_eq!(schema.primary(), "wire");
        assert_eq!(cfg.batch_per_gpu(), 2);
    }

    #[test]
    fn batch_must_divide_across_gpus() {
        let cfg = LoaderConfig {
            batch_per_step: 5,
            ..config()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::IndivisibleBatch {
                batch_per_step: 5,
                num_gpus: 2
            })
        );
    }

    #[test]
    fn rejects_zero_sizes_and_bad_dim() {
        assert_eq!(
            LoaderConfig { num_threads: 0, ..config() }.validate(),
            Err(ConfigError::ZeroThreads)
        );
        assert_eq!(
            LoaderConfig { num_gpus: 0, ..config() }.validate(),
            Err(ConfigError::ZeroGpus)
        );
        assert_eq!(
            LoaderConfig { batch_per_step: 0, ..config() }.validate(),
            Err(ConfigError::ZeroBatch)
        );
        assert_eq!(
            LoaderConfig { data_dim: 4, ..config() }.validate(),
            Err(ConfigError::UnsupportedDim(4))
        );
    }

    #[test]
    fn wait_strategy_serializes_tagged() {
        let json = serde_json::to_string(&WaitStrategy::Park { timeout_us: 250 }).unwrap();
        assert_eq!(json, r#"{"kind":"park","timeout_us":250}"#);
        assert_eq!(
            WaitStrategy::Poll { interval_us: 0 }.interval(),
            Duration::from_micros(1)
        );
    }
}
