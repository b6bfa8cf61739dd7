//! JSON-lines sample files.
//!
//! Line 1 is a [`SampleFileHeader`]; every following non-empty line is one
//! [`Sample`] whose `fields` are aligned with `header.keys[1..]`.

use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vxio_core::error::DataShapeError;
use vxio_core::schema::DataSchema;
use vxio_core::store::{FeatureWindow, Sample, SampleStore};

use crate::{write_atomic, StoreError};

pub const SAMPLE_FILE_SCHEMA_VERSION: u32 = 1;

const PROGRESS_EVERY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFileHeader {
    pub schema_version: u32,
    pub dim: usize,
    pub keys: Vec<String>,
}

/// What to do with a sample whose per-voxel arrays do not line up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapePolicy {
    /// Drop the sample, log a warning, keep reading.
    #[default]
    Skip,
    /// Abort the whole load.
    Reject,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Stop after this many entries have been read (0 = no limit).
    pub limit_num_sample: usize,
    /// Fill the weight key (data key 2) with uniform weights instead of reading it.
    pub compute_weight: bool,
    pub shape_policy: ShapePolicy,
    /// One-time quality filter applied after loading.
    pub feature_window: Option<FeatureWindow>,
}

#[derive(Debug)]
pub struct LoadReport {
    pub store: SampleStore,
    pub entries_read: usize,
    pub skipped_empty: usize,
    pub skipped_malformed: usize,
    pub filtered_voxels: usize,
}

/// Reads a sample file into a [`SampleStore`] laid out per `schema`.
///
/// The file may carry more keys than the schema asks for; columns are picked by name.
pub fn read_sample_file(
    path: impl AsRef<Path>,
    schema: &DataSchema,
    opts: &LoadOptions,
) -> Result<LoadReport, StoreError> {
    let path = path.as_ref();
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut lines = reader.lines();

    let header_line = lines
        .next()
        .ok_or_else(|| StoreError::Header("empty sample file".to_string()))??;
    let header: SampleFileHeader =
        serde_json::from_str(&header_line).map_err(|source| StoreError::Json { line: 1, source })?;
    if header.schema_version != SAMPLE_FILE_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion(header.schema_version));
    }
    if !(2..=3).contains(&header.dim) {
        return Err(StoreError::Header(format!("unsupported dim {}", header.dim)));
    }
    let column_map = resolve_columns(&header, schema, opts.compute_weight)?;

    let mut builder = SampleStore::builder(schema.clone(), header.dim);
    let mut entries_read = 0usize;
    let mut skipped_empty = 0usize;
    let mut skipped_malformed = 0usize;

    for (idx, line) in lines.enumerate() {
        let line_no = idx + 2;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if opts.limit_num_sample > 0 && entries_read >= opts.limit_num_sample {
            break;
        }
        entries_read += 1;

        let raw: Sample = serde_json::from_str(&line)
            .map_err(|source| StoreError::Json { line: line_no, source })?;
        if raw.voxels.is_empty() && raw.feature.is_empty() {
            skipped_empty += 1;
            continue;
        }

        let pushed = select_columns(raw, &header, &column_map).and_then(|s| builder.push(s));
        if let Err(source) = pushed {
            match opts.shape_policy {
                ShapePolicy::Skip => {
                    skipped_malformed += 1;
                    warn!(line = line_no, error = %source, "skipping malformed sample");
                }
                ShapePolicy::Reject => {
                    return Err(StoreError::Shape {
                        line: line_no,
                        source,
                    })
                }
            }
        }

        if entries_read % PROGRESS_EVERY == 0 {
            info!(entries_read, samples = builder.len(), "loading samples");
        }
    }

    let mut store = builder.finish();
    let mut filtered_voxels = 0;
    if let Some(window) = opts.feature_window {
        (store, filtered_voxels) = store.retain_feature_window(window);
    }

    info!(
        target: "vxio_proof",
        event = "samples_loaded",
        path = %path.display(),
        samples = store.num_entries() as u64,
        voxels = store.total_voxels() as u64,
        skipped_empty = skipped_empty as u64,
        skipped_malformed = skipped_malformed as u64,
        filtered_voxels = filtered_voxels as u64,
        "loaded sample file"
    );

    Ok(LoadReport {
        store,
        entries_read,
        skipped_empty,
        skipped_malformed,
        filtered_voxels,
    })
}

/// Writes `samples` (fields aligned with `header.keys[1..]`) as a sample file.
pub fn write_sample_file<'a>(
    path: impl AsRef<Path>,
    header: &SampleFileHeader,
    samples: impl IntoIterator<Item = &'a Sample>,
) -> Result<(), StoreError> {
    let mut out = serde_json::to_vec(header).map_err(|source| StoreError::Json { line: 1, source })?;
    out.push(b'\n');
    for (idx, sample) in samples.into_iter().enumerate() {
        serde_json::to_writer(&mut out, sample).map_err(|source| StoreError::Json {
            line: idx + 2,
            source,
        })?;
        out.push(b'\n');
    }
    write_atomic(path.as_ref(), &out)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    File(usize),
    UniformWeight,
}

fn resolve_columns(
    header: &SampleFileHeader,
    schema: &DataSchema,
    compute_weight: bool,
) -> Result<Vec<Column>, StoreError> {
    if header.keys.first().map(String::as_str) != Some(schema.primary()) {
        return Err(StoreError::MissingKey(schema.primary().to_string()));
    }
    let file_fields = &header.keys[1..];
    schema
        .field_keys()
        .iter()
        .enumerate()
        .map(|(i, key)| {
            if compute_weight && schema.weight_field() == Some(i) {
                return Ok(Column::UniformWeight);
            }
            file_fields
                .iter()
                .position(|k| k == key)
                .map(Column::File)
                .ok_or_else(|| StoreError::MissingKey(key.clone()))
        })
        .collect()
}

fn select_columns(
    mut raw: Sample,
    header: &SampleFileHeader,
    columns: &[Column],
) -> Result<Sample, DataShapeError> {
    let expected = header.keys.len() - 1;
    if raw.fields.len() != expected {
        return Err(DataShapeError::FieldCount {
            got: raw.fields.len(),
            expected,
        });
    }
    let voxels = raw.feature.len();
    let mut file_fields: Vec<Option<Vec<f32>>> = raw.fields.drain(..).map(Some).collect();
    raw.fields = columns
        .iter()
        .map(|column| match *column {
            Column::File(i) => file_fields[i].take().unwrap_or_default(),
            Column::UniformWeight => vec![1.0; voxels],
        })
        .collect();
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(keys: &[&str]) -> SampleFileHeader {
        SampleFileHeader {
            schema_version: SAMPLE_FILE_SCHEMA_VERSION,
            dim: 2,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn columns_are_picked_by_name() {
        let schema = DataSchema::parse("wire,label,weight").unwrap();
        let cols = resolve_columns(&header(&["wire", "weight", "x", "label"]), &schema, false)
            .unwrap();
        assert_eq!(cols, vec![Column::File(2), Column::File(0)]);

        let cols = resolve_columns(&header(&["wire", "label"]), &schema, true).unwrap();
        assert_eq!(cols, vec![Column::File(0), Column::UniformWeight]);
    }

    #[test]
    fn missing_keys_are_reported() {
        let schema = DataSchema::parse("wire,label").unwrap();
        assert!(matches!(
            resolve_columns(&header(&["wire"]), &schema, false),
            Err(StoreError::MissingKey(k)) if k == "label"
        ));
        assert!(matches!(
            resolve_columns(&header(&["adc", "label"]), &schema, false),
            Err(StoreError::MissingKey(k)) if k == "wire"
        ));
    }
}
