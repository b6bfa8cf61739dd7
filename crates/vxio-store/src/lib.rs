#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod input;
pub mod output;

use std::path::Path;

use thiserror::Error;
use vxio_core::error::{ConfigError, DataShapeError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: invalid json: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid sample file header: {0}")]
    Header(String),
    #[error("unsupported sample file schema_version {0}")]
    UnsupportedSchemaVersion(u32),
    #[error("data key {0:?} is not present in the sample file")]
    MissingKey(String),
    #[error("line {line}: {source}")]
    Shape {
        line: usize,
        #[source]
        source: DataShapeError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tensor slot {0} is not registered")]
    UnknownSlot(usize),
    #[error("tensor {name:?} already registered as {existing:?}")]
    SlotKindMismatch {
        name: String,
        existing: output::TensorKind,
    },
    #[error("{values} values for {voxels} voxel ids")]
    TensorLength { voxels: usize, values: usize },
    #[error("commit_record called before set_identity")]
    MissingIdentity,
    #[error("output store is closed")]
    Closed,
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    use std::io::Write;

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path must have parent")
    })?;
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp = path.to_path_buf();
    let suffix = format!(
        "tmp.{}.{}",
        std::process::id(),
        vxio_observe::time::unix_time_ms()
    );
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad filename"))?;
    tmp.set_file_name(format!("{file_name}.{suffix}"));

    {
        let mut f = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }

    std::fs::rename(tmp, path)?;
    Ok(())
}
