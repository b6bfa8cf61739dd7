use std::ops::Range;
use std::sync::Arc;

use vxio_core::error::DataShapeError;
use vxio_core::particle::ParticleRecord;

/// Particle metadata of one contributing sample, tagged with its position in the shard.
#[derive(Debug, Clone)]
pub struct TaggedParticles {
    pub batch_id: usize,
    pub sample_index: usize,
    pub records: Arc<[ParticleRecord]>,
}

/// The part of a batch assigned to one GPU.
///
/// Invariants:
/// - `offsets.len() == sample_indices.len() + 1`, `offsets[0] == 0`, non-decreasing
/// - `offsets.last() == rows()`; every stacked array holds exactly `rows()` rows
/// - sample `k` occupies rows `offsets[k]..offsets[k + 1]` in every stacked array
#[derive(Debug, Clone, Default)]
pub struct GpuShard {
    pub sample_indices: Vec<usize>,
    pub offsets: Vec<usize>,
    /// Row-major `(rows, dim + 1)`; the last column is the batch id.
    pub coords: Vec<i32>,
    pub feature: Vec<f32>,
    /// One stack per `DataSchema::field_keys` entry.
    pub fields: Vec<Vec<f32>>,
    /// Primary data array, row-major `(rows, dim + 2)`: coordinates, batch id, feature.
    pub data: Vec<f32>,
    pub particles: Vec<TaggedParticles>,
}

impl GpuShard {
    pub fn rows(&self) -> usize {
        self.feature.len()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_indices.len()
    }

    pub fn sample_rows(&self, k: usize) -> Range<usize> {
        self.offsets[k]..self.offsets[k + 1]
    }

    pub fn voxel_counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets.windows(2).map(|w| w[1] - w[0])
    }

    /// Batch-id column, one entry per row.
    pub fn batch_ids(&self) -> Vec<i32> {
        let width = self.coord_width();
        if width == 0 {
            return Vec::new();
        }
        self.coords
            .chunks_exact(width)
            .map(|row| row[width - 1])
            .collect()
    }

    pub fn coord_width(&self) -> usize {
        if self.rows() == 0 {
            0
        } else {
            self.coords.len() / self.rows()
        }
    }
}

/// A unit of delivery to the consumer: one shard per GPU.
#[derive(Debug, Clone)]
pub struct Batch {
    pub shards: Arc<[GpuShard]>,
    /// Worker thread (and therefore slot) that assembled the batch.
    pub producer: usize,
    /// Per-producer sequence number, starting at 0.
    pub sequence: u64,
}

impl Batch {
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn total_rows(&self) -> usize {
        self.shards.iter().map(GpuShard::rows).sum()
    }

    pub fn sample_count(&self) -> usize {
        self.shards.iter().map(GpuShard::sample_count).sum()
    }

    pub fn sample_indices(&self) -> Vec<&[usize]> {
        self.shards
            .iter()
            .map(|s| s.sample_indices.as_slice())
            .collect()
    }
}

/// Row-major `(rows, cols)` per-voxel class scores for one shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix {
    cols: usize,
    values: Vec<f32>,
}

impl ScoreMatrix {
    pub fn new(cols: usize, values: Vec<f32>) -> Result<Self, DataShapeError> {
        if cols == 0 || values.len() % cols != 0 {
            return Err(DataShapeError::RaggedMatrix {
                what: "score matrix".to_string(),
                len: values.len(),
                width: cols,
            });
        }
        Ok(Self { cols, values })
    }

    /// One-hot scores, e.g. for echoing known labels back through the writer.
    pub fn one_hot(classes: &[usize], cols: usize) -> Result<Self, DataShapeError> {
        let mut values = vec![0.0; classes.len() * cols];
        for (row, &class) in classes.iter().enumerate() {
            if class >= cols {
                return Err(DataShapeError::RaggedMatrix {
                    what: format!("one-hot class {class}"),
                    len: class,
                    width: cols,
                });
            }
            values[row * cols + class] = 1.0;
        }
        Self::new(cols, values)
    }

    pub fn rows(&self) -> usize {
        self.values.len() / self.cols
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    /// Arg-max class and its score for `row`; ties go to the lowest class.
    pub fn argmax(&self, row: usize) -> (usize, f32) {
        let mut best = (0usize, f32::NEG_INFINITY);
        for (class, &score) in self.row(row).iter().enumerate() {
            if score > best.1 {
                best = (class, score);
            }
        }
        best
    }
}

/// An auxiliary per-voxel output written next to the predictions, one stack per shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraOutput {
    pub name: String,
    pub per_shard: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_first_of_equal_scores() {
        let m = ScoreMatrix::new(3, vec![0.2, 0.5, 0.3, 0.4, 0.4, 0.2]).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.argmax(0), (1, 0.5));
        assert_eq!(m.argmax(1), (0, 0.4));
    }

    #[test]
    fn score_matrix_rejects_ragged_values() {
        assert!(ScoreMatrix::new(3, vec![0.0; 4]).is_err());
        assert!(ScoreMatrix::new(0, Vec::new()).is_err());
        assert!(ScoreMatrix::one_hot(&[0, 3], 3).is_err());
        let m = ScoreMatrix::one_hot(&[2, 0], 3).unwrap();
        assert_eq!(m.row(0), &[0.0, 0.0, 1.0]);
    }
}
