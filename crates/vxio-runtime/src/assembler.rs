use std::sync::Arc;

use vxio_core::config::LoaderConfig;
use vxio_core::error::ConfigError;
use vxio_core::store::{SampleStore, SampleView};

use crate::error::BatchError;
use crate::types::{Batch, GpuShard, TaggedParticles};

/// Turns a list of sample indices into one stacked shard per GPU.
///
/// Position `p` in the index list goes to shard `p / batch_per_gpu` with batch id
/// `p % batch_per_gpu`. Samples keep their order and stay contiguous inside a shard.
#[derive(Debug, Clone)]
pub struct BatchAssembler {
    store: Arc<SampleStore>,
    batch_per_step: usize,
    batch_per_gpu: usize,
    num_gpus: usize,
}

impl BatchAssembler {
    pub fn new(store: Arc<SampleStore>, config: &LoaderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            batch_per_step: config.batch_per_step,
            batch_per_gpu: config.batch_per_gpu(),
            num_gpus: config.num_gpus,
        })
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    pub fn assemble(&self, indices: &[usize]) -> Result<Batch, BatchError> {
        if indices.len() != self.batch_per_step {
            return Err(ConfigError::BatchLength {
                got: indices.len(),
                expected: self.batch_per_step,
            }
            .into());
        }
        // Resolve every index before touching any shard so a bad index fails the whole batch.
        let views = indices
            .iter()
            .map(|&i| self.store.sample(i))
            .collect::<Result<Vec<_>, _>>()?;

        let dim = self.store.dim();
        let num_fields = self.store.schema().num_fields();
        let shards: Vec<GpuShard> = views
            .chunks(self.batch_per_gpu)
            .map(|chunk| stack_shard(chunk, dim, num_fields))
            .collect();
        debug_assert_eq!(shards.len(), self.num_gpus);

        Ok(Batch {
            shards: shards.into(),
            producer: 0,
            sequence: 0,
        })
    }
}

fn stack_shard(views: &[SampleView<'_>], dim: usize, num_fields: usize) -> GpuShard {
    let rows: usize = views.iter().map(SampleView::num_voxels).sum();
    let mut shard = GpuShard {
        sample_indices: Vec::with_capacity(views.len()),
        offsets: Vec::with_capacity(views.len() + 1),
        coords: Vec::with_capacity(rows * (dim + 1)),
        feature: Vec::with_capacity(rows),
        fields: vec![Vec::with_capacity(rows); num_fields],
        data: Vec::with_capacity(rows * (dim + 2)),
        particles: Vec::new(),
    };
    shard.offsets.push(0);

    for (batch_id, view) in views.iter().enumerate() {
        let feature = view.feature();
        for (v, &value) in feature.iter().enumerate() {
            let coord = view.coord(v);
            shard.coords.extend_from_slice(coord);
            shard.coords.push(batch_id as i32);
            shard.data.extend(coord.iter().map(|&c| c as f32));
            shard.data.push(batch_id as f32);
            shard.data.push(value);
        }
        shard.feature.extend_from_slice(feature);
        for (k, stack) in shard.fields.iter_mut().enumerate() {
            stack.extend_from_slice(view.field(k));
        }
        if let Some(records) = view.particles() {
            shard.particles.push(TaggedParticles {
                batch_id,
                sample_index: view.index(),
                records: Arc::clone(records),
            });
        }
        shard.sample_indices.push(view.index());
        shard.offsets.push(shard.feature.len());
    }
    shard
}

#[cfg(test)]
mod tests {
    use super::*;
    use vxio_core::error::RangeError;
    use vxio_core::schema::DataSchema;
    use vxio_core::store::Sample;
    use vxio_core::types::{GeometryDescriptor, IdentityKey};

    /// Sample `i` has `i % 4` voxels at `(i, v)` with feature `i * 100 + v`.
    fn store(entries: usize) -> Arc<SampleStore> {
        let schema = DataSchema::parse("wire,label").unwrap();
        let mut builder = SampleStore::builder(schema, 2);
        for i in 0..entries {
            let n = i % 4;
            builder
                .push(Sample {
                    identity: IdentityKey::new(1, 0, i as u32),
                    geometry: GeometryDescriptor::unit(vec![64, 64]),
                    voxels: (0..n).flat_map(|v| [i as i32, v as i32]).collect(),
                    feature: (0..n).map(|v| (i * 100 + v) as f32).collect(),
                    fields: vec![vec![(i % 3) as f32; n]],
                    particles: None,
                })
                .unwrap();
        }
        Arc::new(builder.finish())
    }

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
    fn indices_split_across_gpus_with_local_batch_ids() {
        let assembler = BatchAssembler::new(store(12), &config()).unwrap();
        let batch = assembler.assemble(&[5, 1, 9, 3]).unwrap();
        assert_eq!(batch.num_shards(), 2);

        let s0 = &batch.shards[0];
        assert_eq!(s0.sample_indices, vec![5, 1]);
        assert_eq!(s0.offsets, vec![0, 1, 2]);
        assert_eq!(s0.batch_ids(), vec![0, 1]);
        assert_eq!(s0.coords, vec![5, 0, 0, 1, 0, 1]);
        assert_eq!(s0.data, vec![5.0, 0.0, 0.0, 500.0, 1.0, 0.0, 1.0, 100.0]);

        let s1 = &batch.shards[1];
        assert_eq!(s1.sample_indices, vec![9, 3]);
        assert_eq!(s1.offsets, vec![0, 1, 4]);
        assert_eq!(s1.batch_ids(), vec![0, 1, 1, 1]);
        assert_eq!(s1.fields[0], vec![0.0, 0.0, 0.0, 0.0]);
        assert_eq!(s1.feature, vec![900.0, 300.0, 301.0, 302.0]);
    }

    #[test]
    fn duplicates_are_independent_draws() {
        let assembler = BatchAssembler::new(store(12), &config()).unwrap();
        let batch = assembler.assemble(&[3, 3, 3, 2]).unwrap();
        assert_eq!(batch.total_rows(), 3 + 3 + 3 + 2);
        assert_eq!(batch.shards[1].batch_ids(), vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn zero_voxel_samples_keep_an_empty_span() {
        let assembler = BatchAssembler::new(store(12), &config()).unwrap();
        let batch = assembler.assemble(&[0, 4, 8, 0]).unwrap();
        for shard in batch.shards.iter() {
            assert_eq!(shard.rows(), 0);
            assert_eq!(shard.sample_count(), 2);
            assert_eq!(shard.offsets, vec![0, 0, 0]);
            assert!(shard.data.is_empty());
        }
    }

    #[test]
    fn particles_are_tagged_with_shard_position() {
        use vxio_core::particle::{ParticleCategory, ParticleRecord};

        let schema = DataSchema::parse("wire").unwrap();
        let mut builder = SampleStore::builder(schema, 2);
        for i in 0..3u32 {
            let particles = (i == 1).then(|| {
                vec![ParticleRecord {
                    particle_idx: 7,
                    primary: true,
                    pdg_code: 13,
                    mass: 105.7,
                    creation: [0.0; 3],
                    direction: [1.0, 0.0, 0.0],
                    start: [0.0; 3],
                    end: [4.0, 0.0, 0.0],
                    creation_energy: 300.0,
                    creation_momentum: 280.0,
                    deposited_energy: 120.0,
                    npx: 1,
                    creation_process: "primary".into(),
                    category: ParticleCategory::classify(13, "primary").unwrap(),
                }]
            });
            builder
                .push(Sample {
                    identity: IdentityKey::new(1, 0, i),
                    geometry: GeometryDescriptor::unit(vec![8, 8]),
                    voxels: vec![i as i32, 0],
                    feature: vec![1.0],
                    fields: Vec::new(),
                    particles,
                })
                .unwrap();
        }
        let cfg = LoaderConfig {
            batch_per_step: 3,
            data_keys: vec!["wire".into()],
            data_dim: 2,
            ..LoaderConfig::default()
        };
        let assembler = BatchAssembler::new(Arc::new(builder.finish()), &cfg).unwrap();
        let batch = assembler.assemble(&[0, 2, 1]).unwrap();
        let tagged = &batch.shards[0].particles;
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].batch_id, 2);
        assert_eq!(tagged[0].sample_index, 1);
        assert_eq!(tagged[0].records[0].category, ParticleCategory::Track);
    }

    #[test]
    fn bad_index_or_length_fails_whole_batch() {
        let assembler = BatchAssembler::new(store(12), &config()).unwrap();
        assert_eq!(
            assembler.assemble(&[1, 2, 12, 3]).unwrap_err(),
            BatchError::Range(RangeError {
                index: 12,
                num_entries: 12
            })
        );
        assert!(matches!(
            assembler.assemble(&[1, 2]).unwrap_err(),
            BatchError::Config(ConfigError::BatchLength {
                got: 2,
                expected: 4
            })
        ));
    }
}
