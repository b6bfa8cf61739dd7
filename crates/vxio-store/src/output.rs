use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use vxio_core::error::ConfigError;
use vxio_core::types::{GeometryDescriptor, IdentityKey};

use crate::{write_atomic, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorKind {
    Sparse2d,
    Sparse3d,
}

impl TensorKind {
    pub fn for_dim(dim: usize) -> Result<Self, ConfigError> {
        match dim {
            2 => Ok(TensorKind::Sparse2d),
            3 => Ok(TensorKind::Sparse3d),
            other => Err(ConfigError::UnsupportedDim(other)),
        }
    }
}

/// Handle to a named tensor of the record currently being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorSlot(usize);

/// Values re-embedded into a geometry: one value per linear voxel id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseTensor {
    pub voxel_ids: Vec<u64>,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTensor {
    pub name: String,
    pub kind: TensorKind,
    pub geometry: GeometryDescriptor,
    pub voxel_ids: Vec<u64>,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Index of the sample in the input store; records are emitted in this order.
    pub entry: usize,
    pub identity: IdentityKey,
    pub tensors: Vec<StoredTensor>,
}

impl OutputRecord {
    pub fn tensor(&self, name: &str) -> Option<&StoredTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }
}

/// Destination for per-sample prediction records.
///
/// Usage per record: `get_slot`/`set` for each tensor, `set_identity`, `commit_record`.
/// Committing a second record for the same entry replaces the first.
pub trait OutputStore: Send + 'static {
    fn get_slot(&mut self, kind: TensorKind, name: &str) -> Result<TensorSlot, StoreError>;
    fn set(
        &mut self,
        slot: TensorSlot,
        tensor: SparseTensor,
        geometry: &GeometryDescriptor,
    ) -> Result<(), StoreError>;
    fn set_identity(&mut self, entry: usize, identity: IdentityKey) -> Result<(), StoreError>;
    fn commit_record(&mut self) -> Result<(), StoreError>;
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Slot registry and staging area shared by the concrete stores.
#[derive(Debug, Default)]
struct RecordBook {
    slots: Vec<(TensorKind, String)>,
    staged: Vec<Option<(SparseTensor, GeometryDescriptor)>>,
    identity: Option<(usize, IdentityKey)>,
}

impl RecordBook {
    fn get_slot(&mut self, kind: TensorKind, name: &str) -> Result<TensorSlot, StoreError> {
        if let Some(pos) = self.slots.iter().position(|(_, n)| n == name) {
            let existing = self.slots[pos].0;
            if existing != kind {
                return Err(StoreError::SlotKindMismatch {
                    name: name.to_string(),
                    existing,
                });
            }
            return Ok(TensorSlot(pos));
        }
        self.slots.push((kind, name.to_string()));
        self.staged.push(None);
        Ok(TensorSlot(self.slots.len() - 1))
    }

    fn set(
        &mut self,
        slot: TensorSlot,
        tensor: SparseTensor,
        geometry: &GeometryDescriptor,
    ) -> Result<(), StoreError> {
        if tensor.voxel_ids.len() != tensor.values.len() {
            return Err(StoreError::TensorLength {
                voxels: tensor.voxel_ids.len(),
                values: tensor.values.len(),
            });
        }
        let staged = self
            .staged
            .get_mut(slot.0)
            .ok_or(StoreError::UnknownSlot(slot.0))?;
        *staged = Some((tensor, geometry.clone()));
        Ok(())
    }

    fn commit(&mut self) -> Result<OutputRecord, StoreError> {
        let (entry, identity) = self.identity.take().ok_or(StoreError::MissingIdentity)?;
        let tensors = self
            .slots
            .iter()
            .zip(self.staged.iter_mut())
            .filter_map(|((kind, name), staged)| {
                staged.take().map(|(tensor, geometry)| StoredTensor {
                    name: name.clone(),
                    kind: *kind,
                    geometry,
                    voxel_ids: tensor.voxel_ids,
                    values: tensor.values,
                })
            })
            .collect();
        Ok(OutputRecord {
            entry,
            identity,
            tensors,
        })
    }
}

fn insert_record(records: &mut BTreeMap<usize, OutputRecord>, record: OutputRecord) {
    let entry = record.entry;
    if let Some(prev) = records.insert(entry, record) {
        debug!(
            entry,
            identity = %prev.identity,
            "replacing previously committed record (last write wins)"
        );
    }
}

/// Writes JSON lines, one record per line sorted by entry, when closed.
#[derive(Debug)]
pub struct FsOutputStore {
    path: PathBuf,
    book: RecordBook,
    records: BTreeMap<usize, OutputRecord>,
    closed: bool,
}

impl FsOutputStore {
    pub fn open(destination: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = destination.into();
        if path.file_name().is_none() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "output destination must name a file",
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            book: RecordBook::default(),
            records: BTreeMap::new(),
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pending_records(&self) -> usize {
        self.records.len()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl OutputStore for FsOutputStore {
    fn get_slot(&mut self, kind: TensorKind, name: &str) -> Result<TensorSlot, StoreError> {
        self.ensure_open()?;
        self.book.get_slot(kind, name)
    }

    fn set(
        &mut self,
        slot: TensorSlot,
        tensor: SparseTensor,
        geometry: &GeometryDescriptor,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.book.set(slot, tensor, geometry)
    }

    fn set_identity(&mut self, entry: usize, identity: IdentityKey) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.book.identity = Some((entry, identity));
        Ok(())
    }

    fn commit_record(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let record = self.book.commit()?;
        insert_record(&mut self.records, record);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        let mut out = Vec::new();
        for (idx, record) in self.records.values().enumerate() {
            serde_json::to_writer(&mut out, record).map_err(|source| StoreError::Json {
                line: idx + 1,
                source,
            })?;
            out.push(b'\n');
        }
        write_atomic(&self.path, &out)?;
        self.closed = true;
        debug!(path = %self.path.display(), records = self.records.len(), "output store closed");
        Ok(())
    }
}

/// Reads back a file written by [`FsOutputStore`].
pub fn read_output_file(path: impl AsRef<Path>) -> Result<Vec<OutputRecord>, StoreError> {
    let reader = std::io::BufReader::new(std::fs::File::open(path.as_ref())?);
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| StoreError::Json {
            line: idx + 1,
            source,
        })?;
        out.push(record);
    }
    Ok(out)
}

/// Keeps committed records in memory; [`MemoryRecords`] handles observe them.
#[derive(Debug, Default)]
pub struct MemoryOutputStore {
    book: RecordBook,
    records: Arc<Mutex<BTreeMap<usize, OutputRecord>>>,
}

#[derive(Debug, Clone)]
pub struct MemoryRecords(Arc<Mutex<BTreeMap<usize, OutputRecord>>>);

impl MemoryRecords {
    /// Records sorted by entry.
    pub fn snapshot(&self) -> Vec<OutputRecord> {
        self.0
            .lock()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl MemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> MemoryRecords {
        MemoryRecords(self.records.clone())
    }
}

impl OutputStore for MemoryOutputStore {
    fn get_slot(&mut self, kind: TensorKind, name: &str) -> Result<TensorSlot, StoreError> {
        self.book.get_slot(kind, name)
    }

    fn set(
        &mut self,
        slot: TensorSlot,
        tensor: SparseTensor,
        geometry: &GeometryDescriptor,
    ) -> Result<(), StoreError> {
        self.book.set(slot, tensor, geometry)
    }

    fn set_identity(&mut self, entry: usize, identity: IdentityKey) -> Result<(), StoreError> {
        self.book.identity = Some((entry, identity));
        Ok(())
    }

    fn commit_record(&mut self) -> Result<(), StoreError> {
        let record = self.book.commit()?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| std::io::Error::other("memory output store mutex poisoned"))?;
        insert_record(&mut records, record);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
