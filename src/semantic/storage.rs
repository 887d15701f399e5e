//! Binary persistence of the index snapshot.
//!
//! Blob format (key `semantic.index`):
//!
//! Header (107 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - signature: [u8; 64] (hex signature of the live set the blob was built from)
//!
//! Entries (repeated):
//! - item_len: u32 (little-endian)
//! - item: [u8; item_len] (JSON)
//! - content_hash: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)
//!
//! Trailer:
//! - checksum: u32 (CRC32 of every preceding byte)
//!
//! The signature is additionally stored on its own under `semantic.signature`,
//! written after the blob. A blob whose embedded signature disagrees with that
//! key is treated as unreadable.

use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::items::Item;
use crate::semantic::index::{VectorEntry, VectorStore};
use crate::storage::SnapshotStore;

pub const SIGNATURE_KEY: &str = "semantic.signature";
pub const INDEX_KEY: &str = "semantic.index";

/// Current blob format version
const FORMAT_VERSION: u8 = 1;

const SIGNATURE_LEN: usize = 64;

/// version(1) + model_id(32) + dimensions(2) + entry_count(8) + signature(64)
const HEADER_SIZE: usize = 107;

const CHECKSUM_SIZE: usize = 4;

/// The persisted artifact: a vector store plus the signature it corresponds to.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub signature: String,
    pub store: VectorStore,
}

/// Reasons a persisted snapshot cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: snapshot version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: snapshot uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: snapshot may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, snapshot has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Signature mismatch: snapshot and signature key disagree")]
    SignatureMismatch,

    #[error("Snapshot is incomplete: {0} is missing")]
    Missing(&'static str),
}

/// Reads and writes snapshots through a key/value store.
#[derive(Clone)]
pub struct SnapshotRepository {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotRepository {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Load the persisted snapshot.
    ///
    /// `Ok(None)` when nothing was ever persisted; an error when something was
    /// persisted but cannot be used. Callers treat both as a cache miss.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<Option<IndexSnapshot>, SnapshotError> {
        let signature = self.store.get(SIGNATURE_KEY)?;
        let blob = self.store.get(INDEX_KEY)?;

        let (signature, blob) = match (signature, blob) {
            (None, None) => return Ok(None),
            (None, Some(_)) => return Err(SnapshotError::Missing("signature")),
            (Some(_), None) => return Err(SnapshotError::Missing("index")),
            (Some(signature), Some(blob)) => (signature, blob),
        };

        let signature = String::from_utf8(signature)
            .map_err(|_| SnapshotError::InvalidFormat("signature is not utf8".to_string()))?;

        let snapshot = decode_snapshot(&blob, expected_model_id, expected_dimensions)?;
        if snapshot.signature != signature {
            return Err(SnapshotError::SignatureMismatch);
        }

        Ok(Some(snapshot))
    }

    /// Persist blob first, signature last, so a later hit check never sees a
    /// signature without the matching blob.
    pub fn save(&self, snapshot: &IndexSnapshot, model_id: &[u8; 32]) -> Result<(), SnapshotError> {
        let blob = encode_snapshot(snapshot, model_id)?;
        self.store.put(INDEX_KEY, &blob)?;
        self.store.put(SIGNATURE_KEY, snapshot.signature.as_bytes())?;
        Ok(())
    }

    /// Delete both keys. The signature goes first so a half-cleared state is a miss.
    pub fn clear(&self) -> Result<(), SnapshotError> {
        self.store.delete(SIGNATURE_KEY)?;
        self.store.delete(INDEX_KEY)?;
        Ok(())
    }
}

/// Serialize a snapshot into the blob format.
pub fn encode_snapshot(
    snapshot: &IndexSnapshot,
    model_id: &[u8; 32],
) -> Result<Vec<u8>, SnapshotError> {
    if snapshot.signature.len() != SIGNATURE_LEN {
        return Err(SnapshotError::InvalidFormat(format!(
            "signature must be {SIGNATURE_LEN} bytes, got {}",
            snapshot.signature.len()
        )));
    }

    let dimensions = u16::try_from(snapshot.store.dimensions()).map_err(|_| {
        SnapshotError::InvalidFormat(format!(
            "{} dimensions do not fit the header",
            snapshot.store.dimensions()
        ))
    })?;

    let entry_size = 64 + 4 * dimensions as usize;
    let mut buf = Vec::with_capacity(HEADER_SIZE + snapshot.store.len() * entry_size);

    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(model_id);
    buf.extend_from_slice(&dimensions.to_le_bytes());
    buf.extend_from_slice(&(snapshot.store.len() as u64).to_le_bytes());
    buf.extend_from_slice(snapshot.signature.as_bytes());

    for entry in snapshot.store.sorted_entries() {
        write_entry(&mut buf, entry)?;
    }

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    Ok(buf)
}

/// Parse and validate a blob.
pub fn decode_snapshot(
    blob: &[u8],
    expected_model_id: &[u8; 32],
    expected_dimensions: usize,
) -> Result<IndexSnapshot, SnapshotError> {
    if blob.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(SnapshotError::InvalidFormat(format!(
            "snapshot too short ({} bytes)",
            blob.len()
        )));
    }

    let (payload, trailer) = blob.split_at(blob.len() - CHECKSUM_SIZE);
    let stored_checksum = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(payload) != stored_checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let mut reader = Cursor::new(payload);

    let version = read_array::<1>(&mut reader)?[0];
    if version > FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch(version, FORMAT_VERSION));
    }

    let model_id = read_array::<32>(&mut reader)?;
    if model_id != *expected_model_id {
        return Err(SnapshotError::ModelMismatch);
    }

    let dimensions = u16::from_le_bytes(read_array::<2>(&mut reader)?) as usize;
    if dimensions != expected_dimensions {
        return Err(SnapshotError::DimensionMismatch {
            expected: expected_dimensions,
            got: dimensions,
        });
    }

    let entry_count = u64::from_le_bytes(read_array::<8>(&mut reader)?) as usize;
    let signature = String::from_utf8(read_array::<SIGNATURE_LEN>(&mut reader)?.to_vec())
        .map_err(|_| SnapshotError::InvalidFormat("signature is not utf8".to_string()))?;

    // each entry takes at least 16 bytes, so a bogus count fails before allocating
    let capacity = entry_count.min(payload.len() / 16);
    let mut store = VectorStore::with_capacity(dimensions, capacity);

    for _ in 0..entry_count {
        let (item, content_hash, embedding) = read_entry(&mut reader, dimensions)?;
        store
            .insert(item, content_hash, embedding)
            .map_err(|e| SnapshotError::InvalidFormat(e.to_string()))?;
    }

    if reader.position() as usize != payload.len() {
        return Err(SnapshotError::InvalidFormat("trailing bytes after entries".to_string()));
    }

    Ok(IndexSnapshot { signature, store })
}

fn write_entry(buf: &mut Vec<u8>, entry: &VectorEntry) -> Result<(), SnapshotError> {
    let item = serde_json::to_vec(&entry.item)
        .map_err(|e| SnapshotError::InvalidFormat(e.to_string()))?;

    buf.extend_from_slice(&(item.len() as u32).to_le_bytes());
    buf.extend_from_slice(&item);
    buf.extend_from_slice(&entry.content_hash.to_le_bytes());

    for &value in &entry.embedding {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    Ok(())
}

fn read_entry(
    reader: &mut Cursor<&[u8]>,
    dimensions: usize,
) -> Result<(Item, u64, Vec<f32>), SnapshotError> {
    let item_len = u32::from_le_bytes(read_array::<4>(reader)?) as usize;
    let remaining = reader.get_ref().len() - reader.position() as usize;
    if item_len > remaining {
        return Err(SnapshotError::InvalidFormat("item length out of bounds".to_string()));
    }

    let mut item_bytes = vec![0u8; item_len];
    reader.read_exact(&mut item_bytes)?;
    let item: Item = serde_json::from_slice(&item_bytes)
        .map_err(|e| SnapshotError::InvalidFormat(e.to_string()))?;

    let content_hash = u64::from_le_bytes(read_array::<8>(reader)?);

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        embedding.push(f32::from_le_bytes(read_array::<4>(reader)?));
    }

    Ok((item, content_hash, embedding))
}

fn read_array<const N: usize>(reader: &mut Cursor<&[u8]>) -> Result<[u8; N], SnapshotError> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}
