use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::info;

use crate::loader::SparseLoader;
use crate::types::{Batch, ExtraOutput, ScoreMatrix};

/// Per-shard predictions a sink hands back for writing.
#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    pub per_shard: Vec<ScoreMatrix>,
    pub extras: Vec<ExtraOutput>,
}

/// Consumer side of the loader: the training or inference step.
///
/// Delivery is synchronous. A slow sink leaves slots READY, which holds the producers back.
pub trait Sink: Send + 'static {
    /// Consumes one batch. Returned predictions are routed to the loader's result writer.
    fn deliver(&mut self, batch: &Batch) -> Result<Option<Predictions>>;
}

/// Predicts each voxel's own label with full confidence; exercises the write path end to end.
#[derive(Debug, Clone)]
pub struct LabelEcho {
    label_field: Option<usize>,
    num_classes: usize,
}

impl LabelEcho {
    pub fn new(label_field: Option<usize>, num_classes: usize) -> Self {
        Self {
            label_field,
            num_classes: num_classes.max(1),
        }
    }
}

impl Sink for LabelEcho {
    fn deliver(&mut self, batch: &Batch) -> Result<Option<Predictions>> {
        let top = self.num_classes - 1;
        let per_shard = batch
            .shards
            .iter()
            .map(|shard| {
                let classes: Vec<usize> = match self.label_field {
                    Some(k) => shard.fields[k]
                        .iter()
                        .map(|&label| (label.max(0.0) as usize).min(top))
                        .collect(),
                    None => vec![0; shard.rows()],
                };
                ScoreMatrix::one_hot(&classes, self.num_classes)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Predictions {
            per_shard,
            extras: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveSummary {
    pub batches: u64,
    pub samples: u64,
    pub voxels: u64,
    pub records: u64,
    pub cancelled: bool,
}

/// Pulls up to `iterations` batches round robin, hands each to `sink`, and writes whatever
/// predictions come back. Checks `cancel` between batches.
pub fn drive<S: Sink + ?Sized>(
    loader: &mut SparseLoader,
    sink: &mut S,
    iterations: u64,
    report_every: u64,
    cancel: &AtomicBool,
) -> Result<DriveSummary> {
    let mut summary = DriveSummary::default();
    for iteration in 0..iterations {
        if cancel.load(Ordering::Relaxed) {
            summary.cancelled = true;
            break;
        }
        let batch = loader
            .next_batch()
            .with_context(|| format!("pulling batch {iteration}"))?;
        summary.batches += 1;
        summary.samples += batch.sample_count() as u64;
        summary.voxels += batch.total_rows() as u64;

        if let Some(predictions) = sink.deliver(&batch)? {
            if loader.has_output() {
                let written = loader
                    .store_batch(&batch.sample_indices(), &predictions.per_shard, &predictions.extras)
                    .with_context(|| format!("storing predictions for batch {iteration}"))?;
                summary.records += written as u64;
            }
        }

        if report_every > 0 && (iteration + 1) % report_every == 0 {
            info!(
                iteration = iteration + 1,
                producer = batch.producer as u64,
                samples = summary.samples,
                voxels = summary.voxels,
                "consumed batches"
            );
        }
    }
    Ok(summary)
}
