use vxio_core::error::{DataShapeError, RangeError};
use vxio_core::schema::DataSchema;
use vxio_core::store::{FeatureWindow, Sample, SampleStore};
use vxio_core::types::{GeometryDescriptor, IdentityKey};

fn sample(event: u32, coords: &[[i32; 2]], feature: &[f32], label: &[f32]) -> Sample {
    Sample {
        identity: IdentityKey::new(1, 0, event),
        geometry: GeometryDescriptor::unit(vec![16, 16]),
        voxels: coords.iter().flatten().copied().collect(),
        feature: feature.to_vec(),
        fields: vec![label.to_vec()],
        particles: None,
    }
}

fn schema() -> DataSchema {
    DataSchema::parse("wire,label").unwrap()
}

#[test]
fn store_keeps_per_sample_columns_aligned() {
    let mut builder = SampleStore::builder(schema(), 2);
    builder
        .push(sample(7, &[[0, 0], [1, 2]], &[10.0, 20.0], &[0.0, 1.0]))
        .unwrap();
    builder.push(sample(8, &[], &[], &[])).unwrap();
    builder
        .push(sample(9, &[[3, 3]], &[30.0], &[2.0]))
        .unwrap();
    let store = builder.finish();

    assert_eq!(store.num_entries(), 3);
    assert_eq!(store.total_voxels(), 3);

    let first = store.sample(0).unwrap();
    assert_eq!(first.num_voxels(), 2);
    assert_eq!(first.coords(), &[0, 0, 1, 2]);
    assert_eq!(first.coord(1), &[1, 2]);
    assert_eq!(first.field(0), &[0.0, 1.0]);
    assert_eq!(first.identity(), IdentityKey::new(1, 0, 7));

    assert_eq!(store.sample(1).unwrap().num_voxels(), 0);

    let last = store.sample(2).unwrap();
    assert_eq!(last.feature(), &[30.0]);
    assert_eq!(last.coords(), &[3, 3]);

    assert_eq!(
        store.sample(3).unwrap_err(),
        RangeError {
            index: 3,
            num_entries: 3
        }
    );
}

#[test]
fn malformed_sample_is_rejected_without_side_effects() {
    let mut builder = SampleStore::builder(schema(), 2);
    let err = builder
        .push(sample(1, &[[0, 0], [1, 1]], &[1.0, 2.0], &[0.0]))
        .unwrap_err();
    assert_eq!(
        err,
        DataShapeError::FieldLength {
            field: "label".to_string(),
            got: 1,
            voxels: 2
        }
    );

    let mut ragged = sample(2, &[[0, 0]], &[1.0], &[0.0]);
    ragged.voxels.push(5);
    assert!(matches!(
        builder.push(ragged),
        Err(DataShapeError::RaggedCoords { len: 3, dim: 2 })
    ));

    let mut three_d = sample(3, &[], &[], &[]);
    three_d.geometry = GeometryDescriptor::unit(vec![4, 4, 4]);
    assert_eq!(
        builder.push(three_d),
        Err(DataShapeError::DimMismatch {
            got: 3,
            expected: 2
        })
    );
    assert!(builder.is_empty());
}

#[test]
fn feature_window_filters_voxels_but_keeps_indices() {
    let mut builder = SampleStore::builder(schema(), 2);
    builder
        .push(sample(
            1,
            &[[0, 0], [1, 1], [2, 2]],
            &[5.0, 10.0, 301.0],
            &[0.0, 1.0, 2.0],
        ))
        .unwrap();
    builder
        .push(sample(2, &[[4, 4]], &[400.0], &[1.0]))
        .unwrap();
    builder
        .push(sample(3, &[[5, 5], [6, 6]], &[300.0, 150.0], &[2.0, 0.0]))
        .unwrap();

    let (store, removed) = builder
        .finish()
        .retain_feature_window(FeatureWindow {
            min: 10.0,
            max: 300.0,
        });

    assert_eq!(removed, 3);
    assert_eq!(store.num_entries(), 3);

    let first = store.sample(0).unwrap();
    assert_eq!(first.coords(), &[1, 1]);
    assert_eq!(first.field(0), &[1.0]);

    assert_eq!(store.sample(1).unwrap().num_voxels(), 0);
    assert_eq!(store.sample(1).unwrap().identity().event, 2);

    let last = store.sample(2).unwrap();
    assert_eq!(last.feature(), &[300.0, 150.0]);
    assert_eq!(last.coords(), &[5, 5, 6, 6]);
}
