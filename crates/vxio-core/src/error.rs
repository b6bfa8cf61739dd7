use thiserror::Error;

/// Invalid configuration or API misuse. Raised synchronously; the affected operation aborts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("num_threads must be >= 1")]
    ZeroThreads,
    #[error("num_gpus must be >= 1")]
    ZeroGpus,
    #[error("batch_per_step must be >= 1")]
    ZeroBatch,
    #[error("batch_per_step {batch_per_step} is not divisible by num_gpus {num_gpus}")]
    IndivisibleBatch {
        batch_per_step: usize,
        num_gpus: usize,
    },
    #[error("data_keys must name at least the primary data key")]
    EmptyDataKeys,
    #[error("data keys must be non-empty strings")]
    EmptyDataKey,
    #[error("duplicate data key {0:?}")]
    DuplicateDataKey(String),
    #[error("data key {0:?} is reserved for output tensors")]
    ReservedDataKey(String),
    #[error("unsupported data dimension {0} (expected 2 or 3)")]
    UnsupportedDim(usize),
    #[error("sample store has dim {store}, configuration requests {config}")]
    DimMismatch { store: usize, config: usize },
    #[error("sample store keys {store:?} do not match configured keys {config:?}")]
    SchemaMismatch {
        store: Vec<String>,
        config: Vec<String>,
    },
    #[error("sample store is empty")]
    EmptyStore,
    #[error("invalid slot id {slot} (num_threads = {num_threads})")]
    InvalidSlot { slot: usize, num_threads: usize },
    #[error("producer for slot {slot} was never started (call start first)")]
    NotStarted { slot: usize },
    #[error("index list has {got} entries, expected batch_per_step = {expected}")]
    BatchLength { got: usize, expected: usize },
    #[error("expected {expected} shards, got {got}")]
    ShardCount { expected: usize, got: usize },
    #[error("output tensor name {0:?} is used twice in one record")]
    DuplicateOutputName(String),
}

/// A sample index beyond the known sample count.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("sample index {index} out of range (num_entries = {num_entries})")]
pub struct RangeError {
    pub index: usize,
    pub num_entries: usize,
}

/// Per-voxel arrays that do not line up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataShapeError {
    #[error("coordinate array length {len} is not a multiple of dim {dim}")]
    RaggedCoords { len: usize, dim: usize },
    #[error("{field} has {got} values but the sample has {voxels} voxels")]
    FieldLength {
        field: String,
        got: usize,
        voxels: usize,
    },
    #[error("sample carries {got} extra fields, schema declares {expected}")]
    FieldCount { got: usize, expected: usize },
    #[error("sample dim {got} does not match store dim {expected}")]
    DimMismatch { got: usize, expected: usize },
    #[error(
        "geometry axes disagree (origin {origin}, voxel_size {voxel_size}, shape {shape})"
    )]
    GeometryAxes {
        origin: usize,
        voxel_size: usize,
        shape: usize,
    },
    #[error("geometry axis {axis} has a non-positive extent or voxel size")]
    GeometryExtent { axis: usize },
    #[error("voxel {coord:?} lies outside geometry shape {shape:?}")]
    OutsideGeometry { coord: Vec<i32>, shape: Vec<u32> },
    #[error("{what} has {got} rows, expected {expected}")]
    RowCount {
        what: String,
        got: usize,
        expected: usize,
    },
    #[error("{what} has {len} values, not divisible into rows of width {width}")]
    RaggedMatrix {
        what: String,
        len: usize,
        width: usize,
    },
}
