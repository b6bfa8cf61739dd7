use std::path::PathBuf;

use anyhow::Result;

use vxio_core::schema::DataSchema;
use vxio_core::store::{FeatureWindow, Sample};
use vxio_core::types::{GeometryDescriptor, IdentityKey};
use vxio_store::input::{
    read_sample_file, write_sample_file, LoadOptions, SampleFileHeader, ShapePolicy,
    SAMPLE_FILE_SCHEMA_VERSION,
};
use vxio_store::output::{
    read_output_file, FsOutputStore, OutputStore, SparseTensor, TensorKind,
};
use vxio_store::StoreError;

fn temp_dir(test_name: &str) -> Result<PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "vxio-store-{test_name}-{}-{}",
        std::process::id(),
        vxio_observe::time::unix_time_ms()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

fn header() -> SampleFileHeader {
    SampleFileHeader {
        schema_version: SAMPLE_FILE_SCHEMA_VERSION,
        dim: 2,
        keys: vec!["wire".into(), "label".into(), "weight".into()],
    }
}

fn sample(event: u32, voxels: usize) -> Sample {
    Sample {
        identity: IdentityKey::new(5, 1, event),
        geometry: GeometryDescriptor::unit(vec![32, 32]),
        voxels: (0..voxels as i32).flat_map(|i| [i, i]).collect(),
        feature: (0..voxels).map(|i| 10.0 * (i as f32 + 1.0)).collect(),
        fields: vec![
            (0..voxels).map(|i| (i % 3) as f32).collect(),
            vec![0.5; voxels],
        ],
        particles: None,
    }
}

#[test]
fn sample_file_roundtrip_skips_empty_entries() -> Result<()> {
    let root = temp_dir("roundtrip")?;
    let path = root.join("samples.jsonl");
    let samples = vec![sample(0, 3), sample(1, 0), sample(2, 5)];
    write_sample_file(&path, &header(), &samples)?;

    let schema = DataSchema::parse("wire,label,weight")?;
    let report = read_sample_file(&path, &schema, &LoadOptions::default())?;

    assert_eq!(report.entries_read, 3);
    assert_eq!(report.skipped_empty, 1);
    assert_eq!(report.store.num_entries(), 2);
    let second = report.store.sample(1)?;
    assert_eq!(second.identity().event, 2);
    assert_eq!(second.num_voxels(), 5);
    assert_eq!(second.field(1), &[0.5; 5]);
    Ok(())
}

#[test]
fn limit_weight_fill_and_threshold_apply() -> Result<()> {
    let root = temp_dir("options")?;
    let path = root.join("samples.jsonl");
    let samples: Vec<Sample> = (0..6).map(|e| sample(e, 4)).collect();
    write_sample_file(&path, &header(), &samples)?;

    let schema = DataSchema::parse("wire,label,weight")?;
    let opts = LoadOptions {
        limit_num_sample: 4,
        compute_weight: true,
        feature_window: Some(FeatureWindow {
            min: 15.0,
            max: 30.0,
        }),
        ..LoadOptions::default()
    };
    let report = read_sample_file(&path, &schema, &opts)?;

    assert_eq!(report.entries_read, 4);
    assert_eq!(report.store.num_entries(), 4);
    // features 10,20,30,40 -> 20,30 survive
    assert_eq!(report.filtered_voxels, 4 * 2);
    let view = report.store.sample(0)?;
    assert_eq!(view.feature(), &[20.0, 30.0]);
    assert_eq!(view.field(1), &[1.0, 1.0]);
    Ok(())
}

#[test]
fn malformed_sample_policy() -> Result<()> {
    let root = temp_dir("malformed")?;
    let path = root.join("samples.jsonl");
    let mut bad = sample(1, 3);
    bad.fields[0].pop();
    write_sample_file(&path, &header(), &[sample(0, 2), bad, sample(2, 2)])?;

    let schema = DataSchema::parse("wire,label")?;
    let report = read_sample_file(&path, &schema, &LoadOptions::default())?;
    assert_eq!(report.skipped_malformed, 1);
    assert_eq!(report.store.num_entries(), 2);

    let strict = LoadOptions {
        shape_policy: ShapePolicy::Reject,
        ..LoadOptions::default()
    };
    let err = read_sample_file(&path, &schema, &strict).unwrap_err();
    assert!(matches!(err, StoreError::Shape { line: 3, .. }), "{err}");
    Ok(())
}

#[test]
fn fs_output_store_writes_records_in_entry_order() -> Result<()> {
    let root = temp_dir("output")?;
    let path = root.join("out").join("predictions.jsonl");
    let geometry = GeometryDescriptor::unit(vec![8, 8]);

    let mut store = FsOutputStore::open(&path)?;
    let slot = store.get_slot(TensorKind::Sparse2d, "prediction")?;
    for entry in [4usize, 0, 4] {
        store.set(
            slot,
            SparseTensor {
                voxel_ids: vec![entry as u64],
                values: vec![entry as f32],
            },
            &geometry,
        )?;
        store.set_identity(entry, IdentityKey::new(1, 0, entry as u32))?;
        store.commit_record()?;
    }
    assert_eq!(store.pending_records(), 2);
    store.close()?;
    store.close()?;
    assert!(matches!(store.commit_record(), Err(StoreError::Closed)));

    let records = read_output_file(&path)?;
    let entries: Vec<usize> = records.iter().map(|r| r.entry).collect();
    assert_eq!(entries, vec![0, 4]);
    assert_eq!(records[1].identity.event, 4);
    Ok(())
}
