#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, info_span, warn, Instrument};

use vxio_core::config::{LoaderConfig, WaitStrategy};
use vxio_core::schema::DataSchema;
use vxio_core::store::FeatureWindow;
use vxio_runtime::loader::SparseLoader;
use vxio_runtime::sink::{drive, LabelEcho};
use vxio_store::input::{read_sample_file, LoadOptions, ShapePolicy};
use vxio_store::output::{FsOutputStore, OutputStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WaitKind {
    Poll,
    Park,
}

#[derive(Debug, Parser)]
#[command(name = "vxio-iotest")]
struct Args {
    /// Sample file to load (see `vxio-make-samples`).
    #[arg(long, env = "VXIO_INPUT")]
    input: PathBuf,

    /// Write label-echo predictions here (JSON lines). Nothing is written when unset.
    #[arg(long, env = "VXIO_OUTPUT")]
    output: Option<PathBuf>,

    /// Comma-separated data keys; the first is the primary key.
    #[arg(long, env = "VXIO_DATA_KEYS", default_value = "data,label")]
    data_keys: String,

    #[arg(long, env = "VXIO_DATA_DIM", default_value_t = 3)]
    data_dim: usize,

    #[arg(long, env = "VXIO_NUM_THREADS", default_value_t = 2)]
    num_threads: usize,

    #[arg(long, env = "VXIO_BATCH_SIZE", default_value_t = 8)]
    batch_size: usize,

    #[arg(long, env = "VXIO_NUM_GPUS", default_value_t = 1)]
    num_gpus: usize,

    #[arg(long, env = "VXIO_SHUFFLE", default_value_t = false)]
    shuffle: bool,

    #[arg(long, env = "VXIO_SEED")]
    seed: Option<u64>,

    #[arg(long, env = "VXIO_START_INDEX", default_value_t = 0)]
    start_index: usize,

    #[arg(long, env = "VXIO_ITERATIONS", default_value_t = 100)]
    iterations: u64,

    #[arg(long, env = "VXIO_REPORT_STEP", default_value_t = 10)]
    report_step: u64,

    /// Stop reading the input after this many entries (0 reads everything).
    #[arg(long, env = "VXIO_LIMIT_NUM_SAMPLE", default_value_t = 0)]
    limit_num_sample: usize,

    /// Fill the weight key with uniform weights instead of reading it.
    #[arg(long, env = "VXIO_COMPUTE_WEIGHT", default_value_t = false)]
    compute_weight: bool,

    /// Abort on the first malformed sample instead of skipping it.
    #[arg(long, env = "VXIO_STRICT", default_value_t = false)]
    strict: bool,

    /// Keep only voxels whose feature lies in `[threshold_min, threshold_max]`.
    #[arg(long, env = "VXIO_THRESHOLD_MIN", requires = "threshold_max")]
    threshold_min: Option<f32>,

    #[arg(long, env = "VXIO_THRESHOLD_MAX", requires = "threshold_min")]
    threshold_max: Option<f32>,

    #[arg(long, env = "VXIO_WAIT", value_enum, default_value_t = WaitKind::Poll)]
    wait: WaitKind,

    /// Poll interval or park timeout, in microseconds.
    #[arg(long, env = "VXIO_WAIT_US", default_value_t = 10)]
    wait_us: u64,

    /// Class count of the label-echo predictions.
    #[arg(long, env = "VXIO_NUM_CLASSES", default_value_t = 5)]
    num_classes: usize,

    /// Periodically emit a metrics snapshot (0 disables).
    #[arg(long, env = "VXIO_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 1000)]
    metrics_snapshot_interval_ms: u64,
}

impl Args {
    fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            num_threads: self.num_threads,
            batch_per_step: self.batch_size,
            num_gpus: self.num_gpus,
            shuffle: self.shuffle,
            data_keys: self
                .data_keys
                .split(',')
                .map(|k| k.trim().to_string())
                .collect(),
            start_index: self.start_index,
            seed: self.seed,
            wait: match self.wait {
                WaitKind::Poll => WaitStrategy::Poll {
                    interval_us: self.wait_us,
                },
                WaitKind::Park => WaitStrategy::Park {
                    timeout_us: self.wait_us,
                },
            },
            data_dim: self.data_dim,
        }
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            limit_num_sample: self.limit_num_sample,
            compute_weight: self.compute_weight,
            shape_policy: if self.strict {
                ShapePolicy::Reject
            } else {
                ShapePolicy::Skip
            },
            feature_window: match (self.threshold_min, self.threshold_max) {
                (Some(min), Some(max)) => Some(FeatureWindow { min, max }),
                _ => None,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    vxio_observe::logging::init_tracing();
    let args = Args::parse();

    let span = info_span!(
        "vxio-iotest",
        input = %args.input.display(),
        num_threads = args.num_threads,
        batch_size = args.batch_size,
        num_gpus = args.num_gpus,
        shuffle = args.shuffle,
        iterations = args.iterations,
    );

    async move {
        let config = args.loader_config();
        let schema: DataSchema = config.validate().context("invalid loader configuration")?;

        let load_started = Instant::now();
        let report = {
            let input = args.input.clone();
            let schema = schema.clone();
            let opts = args.load_options();
            tokio::task::spawn_blocking(move || read_sample_file(&input, &schema, &opts))
                .await
                .context("sample loader task failed")?
                .with_context(|| format!("reading {}", args.input.display()))?
        };
        info!(
            samples = report.store.num_entries() as u64,
            voxels = report.store.total_voxels() as u64,
            elapsed_ms = load_started.elapsed().as_millis() as u64,
            "input loaded"
        );

        let output: Option<Box<dyn OutputStore>> = match &args.output {
            Some(path) => Some(Box::new(
                FsOutputStore::open(path).with_context(|| format!("opening {}", path.display()))?,
            )),
            None => None,
        };
        let mut loader = SparseLoader::new(config, Arc::new(report.store), output)?;
        let metrics = loader.metrics();
        loader.start()?;

        let metrics_task = if args.metrics_snapshot_interval_ms > 0 {
            let interval_ms = std::cmp::max(1, args.metrics_snapshot_interval_ms);
            let metrics = metrics.clone();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    metrics.log_snapshot();
                }
            }))
        } else {
            None
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let started = Instant::now();
        let consumer = {
            let cancel = Arc::clone(&cancel);
            let mut sink = LabelEcho::new(schema.label_field(), args.num_classes);
            let iterations = args.iterations;
            let report_step = args.report_step;
            tokio::task::spawn_blocking(move || -> Result<_> {
                let summary = drive(&mut loader, &mut sink, iterations, report_step, &cancel)?;
                loader.stop();
                loader.finalize()?;
                Ok(summary)
            })
        };
        tokio::pin!(consumer);

        let summary = tokio::select! {
            res = &mut consumer => res.context("consumer task failed")??,
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received; finishing current batch");
                cancel.store(true, Ordering::Relaxed);
                consumer.await.context("consumer task failed")??
            }
        };

        if let Some(task) = metrics_task {
            task.abort();
        }
        metrics.log_snapshot();

        let elapsed = started.elapsed();
        let secs = elapsed.as_secs_f64();
        let per_sec = |n: u64| if secs > 0.0 { n as f64 / secs } else { 0.0 };
        let wait = metrics.consumer_wait.snapshot();
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            batches = summary.batches,
            samples = summary.samples,
            voxels = summary.voxels,
            records = summary.records,
            cancelled = summary.cancelled,
            batches_per_sec = per_sec(summary.batches),
            samples_per_sec = per_sec(summary.samples),
            consumer_wait_avg_us = wait.avg_ns() / 1_000,
            "iotest complete"
        );
        Ok(())
    }
    .instrument(span)
    .await
}
