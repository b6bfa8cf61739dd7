use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use vxio_core::error::{ConfigError, DataShapeError};
use vxio_core::schema::{DataSchema, RESERVED_OUTPUT_NAMES};
use vxio_core::store::{SampleStore, SampleView};
use vxio_store::output::{OutputStore, SparseTensor, TensorKind};

use crate::error::LoaderError;
use crate::types::{ExtraOutput, ScoreMatrix};

pub const SOFTMAX_TENSOR: &str = "softmax";
pub const PREDICTION_TENSOR: &str = "prediction";
pub const LABEL_TENSOR: &str = "label";

/// Splits per-shard predictions back into samples and writes one record per sample.
pub struct ResultWriter {
    store: Arc<SampleStore>,
    output: Option<Box<dyn OutputStore>>,
    kind: TensorKind,
    records_written: u64,
}

impl std::fmt::Debug for ResultWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultWriter")
            .field("has_output", &self.output.is_some())
            .field("kind", &self.kind)
            .field("records_written", &self.records_written)
            .finish()
    }
}

impl ResultWriter {
    pub fn new(
        store: Arc<SampleStore>,
        output: Option<Box<dyn OutputStore>>,
    ) -> Result<Self, ConfigError> {
        let kind = TensorKind::for_dim(store.dim())?;
        Ok(Self {
            store,
            output,
            kind,
            records_written: 0,
        })
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Writes one record per contributing sample; returns the number of records written.
    ///
    /// Shapes, indices and voxel geometry are checked for every shard before the first record
    /// goes out, so a failed batch leaves the destination untouched.
    pub fn store_batch<I: AsRef<[usize]>>(
        &mut self,
        sample_indices: &[I],
        predictions: &[ScoreMatrix],
        extras: &[ExtraOutput],
    ) -> Result<usize, LoaderError> {
        let Some(output) = self.output.as_mut() else {
            return Ok(0);
        };
        let store = &self.store;
        let schema = store.schema();
        check_shard_counts(sample_indices.len(), predictions.len(), extras)?;
        check_extra_names(schema, extras)?;

        let mut plan: Vec<Vec<(SampleView<'_>, Vec<u64>)>> =
            Vec::with_capacity(sample_indices.len());
        for (shard, indices) in sample_indices.iter().enumerate() {
            let views = indices
                .as_ref()
                .iter()
                .map(|&i| store.sample(i))
                .collect::<Result<Vec<_>, _>>()?;
            let rows: usize = views.iter().map(SampleView::num_voxels).sum();
            check_rows(format!("predictions[{shard}]"), predictions[shard].rows(), rows)?;
            for extra in extras {
                check_rows(
                    format!("{}[{shard}]", extra.name),
                    extra.per_shard[shard].len(),
                    rows,
                )?;
            }
            let planned = views
                .into_iter()
                .map(|view| voxel_ids(&view).map(|ids| (view, ids)))
                .collect::<Result<Vec<_>, _>>()?;
            plan.push(planned);
        }

        let mut written = 0usize;
        for (shard, views) in plan.into_iter().enumerate() {
            let mut start = 0usize;
            for (view, ids) in views {
                let end = start + view.num_voxels();
                write_sample(
                    &mut **output,
                    self.kind,
                    schema,
                    &view,
                    ids,
                    &predictions[shard],
                    start..end,
                    extras.iter().map(|e| (e.name.as_str(), &e.per_shard[shard][start..end])),
                )?;
                start = end;
                written += 1;
            }
        }
        self.records_written += written as u64;
        info!(
            target: "vxio_proof",
            event = "records_stored",
            shards = sample_indices.len() as u64,
            records = written as u64,
            "stored batch predictions"
        );
        Ok(written)
    }

    /// Flushes and closes the output destination, if any.
    pub fn close(&mut self) -> Result<(), LoaderError> {
        if let Some(output) = self.output.as_mut() {
            output.close()?;
            debug!(records = self.records_written, "output closed");
        }
        Ok(())
    }
}

fn check_shard_counts(
    shards: usize,
    predictions: usize,
    extras: &[ExtraOutput],
) -> Result<(), ConfigError> {
    if predictions != shards {
        return Err(ConfigError::ShardCount {
            expected: shards,
            got: predictions,
        });
    }
    for extra in extras {
        if extra.per_shard.len() != shards {
            return Err(ConfigError::ShardCount {
                expected: shards,
                got: extra.per_shard.len(),
            });
        }
    }
    Ok(())
}

/// Extra output names must differ from the primary key, the writer's own tensor names and each
/// other. Reusing a field key name such as `weight` is allowed; field keys are never written
/// under their own name.
fn check_extra_names(schema: &DataSchema, extras: &[ExtraOutput]) -> Result<(), ConfigError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for extra in extras {
        let name = extra.name.as_str();
        if name == schema.primary() || RESERVED_OUTPUT_NAMES.contains(&name) || !seen.insert(name)
        {
            return Err(ConfigError::DuplicateOutputName(extra.name.clone()));
        }
    }
    Ok(())
}

fn check_rows(what: String, got: usize, expected: usize) -> Result<(), DataShapeError> {
    if got != expected {
        return Err(DataShapeError::RowCount { what, got, expected });
    }
    Ok(())
}

fn voxel_ids(view: &SampleView<'_>) -> Result<Vec<u64>, DataShapeError> {
    let geometry = view.geometry();
    (0..view.num_voxels())
        .map(|v| {
            let coord = view.coord(v);
            geometry
                .voxel_id(coord)
                .ok_or_else(|| DataShapeError::OutsideGeometry {
                    coord: coord.to_vec(),
                    shape: geometry.shape.clone(),
                })
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn write_sample<'e>(
    output: &mut dyn OutputStore,
    kind: TensorKind,
    schema: &DataSchema,
    view: &SampleView<'_>,
    voxel_ids: Vec<u64>,
    scores: &ScoreMatrix,
    rows: std::ops::Range<usize>,
    extras: impl Iterator<Item = (&'e str, &'e [f32])>,
) -> Result<(), LoaderError> {
    let geometry = view.geometry();
    let (prediction, softmax): (Vec<f32>, Vec<f32>) = rows
        .map(|row| {
            let (class, score) = scores.argmax(row);
            (class as f32, score)
        })
        .unzip();

    let mut tensors: Vec<(&str, Vec<f32>)> = vec![
        (schema.primary(), view.feature().to_vec()),
        (SOFTMAX_TENSOR, softmax),
        (PREDICTION_TENSOR, prediction),
    ];
    tensors.extend(extras.map(|(name, values)| (name, values.to_vec())));
    if let Some(label) = schema.label_field() {
        tensors.push((LABEL_TENSOR, view.field(label).to_vec()));
    }

    for (name, values) in tensors {
        let slot = output.get_slot(kind, name)?;
        output.set(
            slot,
            SparseTensor {
                voxel_ids: voxel_ids.clone(),
                values,
            },
            geometry,
        )?;
    }
    output.set_identity(view.index(), view.identity())?;
    output.commit_record()?;
    Ok(())
}
