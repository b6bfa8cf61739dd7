use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DataShapeError, RangeError};
use crate::particle::ParticleRecord;
use crate::schema::DataSchema;
use crate::types::{GeometryDescriptor, IdentityKey};

/// One voxelized image as handed over by an input reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub identity: IdentityKey,
    pub geometry: GeometryDescriptor,
    /// Row-major `(num_voxels, dim)` integer coordinates.
    pub voxels: Vec<i32>,
    pub feature: Vec<f32>,
    /// One column per `DataSchema::field_keys` entry.
    #[serde(default)]
    pub fields: Vec<Vec<f32>>,
    #[serde(default)]
    pub particles: Option<Vec<ParticleRecord>>,
}

impl Sample {
    pub fn dim(&self) -> usize {
        self.geometry.dim()
    }

    pub fn num_voxels(&self) -> usize {
        self.feature.len()
    }

    pub fn validate(&self, schema: &DataSchema) -> Result<(), DataShapeError> {
        self.geometry.validate()?;
        let dim = self.dim();
        if dim == 0 || self.voxels.len() % dim != 0 {
            return Err(DataShapeError::RaggedCoords {
                len: self.voxels.len(),
                dim,
            });
        }
        let voxels = self.voxels.len() / dim;
        if self.feature.len() != voxels {
            return Err(DataShapeError::FieldLength {
                field: "feature".to_string(),
                got: self.feature.len(),
                voxels,
            });
        }
        if self.fields.len() != schema.num_fields() {
            return Err(DataShapeError::FieldCount {
                got: self.fields.len(),
                expected: schema.num_fields(),
            });
        }
        for (key, column) in schema.field_keys().iter().zip(&self.fields) {
            if column.len() != voxels {
                return Err(DataShapeError::FieldLength {
                    field: key.clone(),
                    got: column.len(),
                    voxels,
                });
            }
        }
        Ok(())
    }
}

/// Inclusive feature window used by the one-time quality filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureWindow {
    pub min: f32,
    pub max: f32,
}

impl FeatureWindow {
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Columnar table of every loaded sample, addressed by dense index.
///
/// Per-voxel columns are concatenated across samples; `offsets` holds prefix sums of voxel
/// counts (`offsets[0] == 0`, `offsets.len() == num_entries + 1`).
#[derive(Debug, Clone)]
pub struct SampleStore {
    schema: DataSchema,
    dim: usize,
    offsets: Vec<usize>,
    coords: Vec<i32>,
    feature: Vec<f32>,
    fields: Vec<Vec<f32>>,
    particles: Vec<Option<Arc<[ParticleRecord]>>>,
    geometry: Vec<GeometryDescriptor>,
    identity: Vec<IdentityKey>,
}

impl SampleStore {
    pub fn builder(schema: DataSchema, dim: usize) -> SampleStoreBuilder {
        SampleStoreBuilder {
            store: SampleStore {
                fields: vec![Vec::new(); schema.num_fields()],
                schema,
                dim,
                offsets: vec![0],
                coords: Vec::new(),
                feature: Vec::new(),
                particles: Vec::new(),
                geometry: Vec::new(),
                identity: Vec::new(),
            },
        }
    }

    pub fn schema(&self) -> &DataSchema {
        &self.schema
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_entries(&self) -> usize {
        self.identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_empty()
    }

    pub fn total_voxels(&self) -> usize {
        self.feature.len()
    }

    pub fn has_particles(&self) -> bool {
        self.particles.iter().any(Option::is_some)
    }

    pub fn check_index(&self, index: usize) -> Result<(), RangeError> {
        if index >= self.num_entries() {
            return Err(RangeError {
                index,
                num_entries: self.num_entries(),
            });
        }
        Ok(())
    }

    pub fn sample(&self, index: usize) -> Result<SampleView<'_>, RangeError> {
        self.check_index(index)?;
        Ok(SampleView {
            store: self,
            index,
            rows: self.offsets[index]..self.offsets[index + 1],
        })
    }

    /// Keeps only voxels whose feature lies inside `window`. Samples left without voxels stay
    /// in the table (with zero voxels) so indices and identity keys do not shift.
    ///
    /// Returns the filtered store and the number of voxels removed.
    pub fn retain_feature_window(self, window: FeatureWindow) -> (Self, usize) {
        let dim = self.dim;
        let mut out = SampleStore {
            fields: vec![Vec::new(); self.schema.num_fields()],
            schema: self.schema.clone(),
            dim,
            offsets: Vec::with_capacity(self.offsets.len()),
            coords: Vec::with_capacity(self.coords.len()),
            feature: Vec::with_capacity(self.feature.len()),
            particles: self.particles,
            geometry: self.geometry,
            identity: self.identity,
        };
        out.offsets.push(0);
        for bounds in self.offsets.windows(2) {
            for row in bounds[0]..bounds[1] {
                if !window.contains(self.feature[row]) {
                    continue;
                }
                out.coords
                    .extend_from_slice(&self.coords[row * dim..(row + 1) * dim]);
                out.feature.push(self.feature[row]);
                for (dst, src) in out.fields.iter_mut().zip(&self.fields) {
                    dst.push(src[row]);
                }
            }
            out.offsets.push(out.feature.len());
        }
        let removed = self.feature.len() - out.feature.len();
        (out, removed)
    }
}

pub struct SampleStoreBuilder {
    store: SampleStore,
}

impl SampleStoreBuilder {
    /// Appends a sample and returns its index. A malformed sample leaves the store untouched.
    pub fn push(&mut self, sample: Sample) -> Result<usize, DataShapeError> {
        sample.validate(&self.store.schema)?;
        if sample.dim() != self.store.dim {
            return Err(DataShapeError::DimMismatch {
                got: sample.dim(),
                expected: self.store.dim,
            });
        }
        let store = &mut self.store;
        store.coords.extend_from_slice(&sample.voxels);
        store.feature.extend_from_slice(&sample.feature);
        for (dst, src) in store.fields.iter_mut().zip(&sample.fields) {
            dst.extend_from_slice(src);
        }
        store.offsets.push(store.feature.len());
        store.particles.push(sample.particles.map(Arc::from));
        store.geometry.push(sample.geometry);
        store.identity.push(sample.identity);
        Ok(store.identity.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.store.num_entries()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn finish(self) -> SampleStore {
        self.store
    }
}

/// Borrowed view of one stored sample.
#[derive(Debug, Clone)]
pub struct SampleView<'a> {
    store: &'a SampleStore,
    index: usize,
    rows: Range<usize>,
}

impl<'a> SampleView<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn num_voxels(&self) -> usize {
        self.rows.len()
    }

    pub fn coords(&self) -> &'a [i32] {
        let dim = self.store.dim;
        &self.store.coords[self.rows.start * dim..self.rows.end * dim]
    }

    pub fn coord(&self, voxel: usize) -> &'a [i32] {
        let dim = self.store.dim;
        let row = self.rows.start + voxel;
        &self.store.coords[row * dim..(row + 1) * dim]
    }

    pub fn feature(&self) -> &'a [f32] {
        &self.store.feature[self.rows.clone()]
    }

    /// Column for `DataSchema::field_keys()[field]`.
    pub fn field(&self, field: usize) -> &'a [f32] {
        &self.store.fields[field][self.rows.clone()]
    }

    pub fn particles(&self) -> Option<&'a Arc<[ParticleRecord]>> {
        self.store.particles[self.index].as_ref()
    }

    pub fn geometry(&self) -> &'a GeometryDescriptor {
        &self.store.geometry[self.index]
    }

    pub fn identity(&self) -> IdentityKey {
        self.store.identity[self.index]
    }
}
