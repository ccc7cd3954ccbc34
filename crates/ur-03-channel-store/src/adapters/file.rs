//! # File-Backed Store
//!
//! The whole key space lives in memory; the file is an append-only log of
//! write batches. Each batch is one checksummed record followed by
//! `fdatasync`, so a commit costs the size of the batch, not of the state.
//!
//! ## Layout
//!
//! ```text
//! MAGIC || record*
//! record = [payload_len:u32][payload][crc32(payload):u32]
//! payload = op*
//! op     = [1][key_len:u32][key][value_len:u32][value]   put
//!        | [0][key_len:u32][key]                         delete
//! ```
//!
//! Lengths are little-endian. A record cut short by a crash was never
//! acknowledged and is dropped on open; a complete record with a bad
//! checksum is corruption.
//!
//! ## Compaction
//!
//! Once the log is several times larger than the live data it is rewritten
//! as a single record (temp file + fsync + rename).

use super::memory::scan;
use crate::domain::errors::StoreError;
use crate::ports::outbound::{BatchOperation, KeyValueStore, ScanResult};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAGIC: &[u8; 4] = b"URKV";

const OP_DELETE: u8 = 0;
const OP_PUT: u8 = 1;

/// Log size below which compaction never runs.
pub const DEFAULT_COMPACTION_THRESHOLD: u64 = 1024 * 1024;

/// Compact once the log exceeds this multiple of the live data.
const COMPACTION_RATIO: u64 = 4;

/// Durable key-value store persisted as a single append-only file.
#[derive(Debug)]
pub struct FileBackedKVStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    path: PathBuf,
    /// Opened on the first write
    log: Option<File>,
    log_len: u64,
    /// Size of `data` encoded as one compacted record
    live_len: u64,
    compaction_threshold: u64,
}

impl FileBackedKVStore {
    /// Open (or create on first write) the store at `path`.
    ///
    /// Refuses files other users can read or write, and logs with a
    /// corrupted record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let (data, log_len) = match File::open(&path) {
            Ok(mut file) => {
                check_permissions(&path, &file)?;
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                let replay = replay_log(&bytes)?;
                if replay.valid_len < bytes.len() {
                    warn!(
                        "[ur-03] Dropping {} bytes of unfinished write at the end of {}",
                        bytes.len() - replay.valid_len,
                        path.display()
                    );
                    let file = OpenOptions::new().write(true).open(&path)?;
                    file.set_len(replay.valid_len as u64)?;
                    file.sync_all()?;
                }
                info!(
                    "[ur-03] Loaded {} keys from {} ({} records, {} bytes)",
                    replay.data.len(),
                    path.display(),
                    replay.records,
                    replay.valid_len
                );
                (replay.data, replay.valid_len as u64)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("[ur-03] No existing state file at {}", path.display());
                (BTreeMap::new(), 0)
            }
            Err(e) => return Err(e.into()),
        };

        let live_len = compacted_len(&data);
        Ok(Self {
            data,
            path,
            log: None,
            log_len,
            live_len,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        })
    }

    /// Override the log size below which compaction never runs.
    pub fn with_compaction_threshold(mut self, bytes: u64) -> Self {
        self.compaction_threshold = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the log on disk.
    pub fn log_len(&self) -> u64 {
        self.log_len
    }

    fn log_file(&mut self) -> Result<&mut File, StoreError> {
        let file = match self.log.take() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                open_private(&self.path, OpenOptions::new().create(true).append(true))?
            }
        };
        Ok(self.log.insert(file))
    }

    /// Append one record and sync it.
    fn append(&mut self, payload: &[u8]) -> Result<(), StoreError> {
        let mut bytes = Vec::with_capacity(payload.len() + MAGIC.len() + 8);
        if self.log_len == 0 {
            bytes.extend_from_slice(MAGIC);
        }
        encode_record(&mut bytes, payload);

        let start = self.log_len;
        let file = self.log_file()?;
        if let Err(e) = file.write_all(&bytes).and_then(|_| file.sync_data()) {
            // A partial record must not stay in front of later appends
            if let Err(trunc) = file.set_len(start) {
                warn!("[ur-03] Could not roll back failed append: {}", trunc);
            }
            return Err(e.into());
        }
        self.log_len += bytes.len() as u64;
        Ok(())
    }

    fn apply(&mut self, op: BatchOperation) {
        match op {
            BatchOperation::Put { key, value } => {
                self.live_len += entry_len(&key, &value);
                if let Some(old) = self.data.insert(key.clone(), value) {
                    self.live_len -= entry_len(&key, &old);
                }
            }
            BatchOperation::Delete { key } => {
                if let Some(old) = self.data.remove(&key) {
                    self.live_len -= entry_len(&key, &old);
                }
            }
        }
    }

    fn needs_compaction(&self) -> bool {
        self.log_len > self.compaction_threshold && self.log_len > COMPACTION_RATIO * self.live_len
    }

    /// Rewrite the log as a single record holding the live data.
    pub fn compact(&mut self) -> Result<(), StoreError> {
        let mut payload = Vec::new();
        for (key, value) in &self.data {
            encode_put(&mut payload, key, value);
        }
        let mut bytes = MAGIC.to_vec();
        encode_record(&mut bytes, &payload);

        let temp_path = self.path.with_extension("tmp");
        let mut file = open_private(&temp_path, OpenOptions::new().create(true).write(true).truncate(true))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, &self.path)?;

        debug!(
            "[ur-03] Compacted {} from {} to {} bytes",
            self.path.display(),
            self.log_len,
            bytes.len()
        );
        // The old handle points at the replaced file
        self.log = None;
        self.log_len = bytes.len() as u64;
        Ok(())
    }
}

#[cfg(unix)]
fn check_permissions(path: &Path, file: &File) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = file.metadata()?.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(StoreError::InsecureStateFile {
            path: path.to_path_buf(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path, _file: &File) -> Result<(), StoreError> {
    Ok(())
}

fn open_private(path: &Path, options: &mut OpenOptions) -> std::io::Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

// =============================================================================
// ENCODING
// =============================================================================

fn push_chunk(out: &mut Vec<u8>, chunk: &[u8]) {
    out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(chunk);
}

fn encode_put(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    out.push(OP_PUT);
    push_chunk(out, key);
    push_chunk(out, value);
}

fn encode_op(out: &mut Vec<u8>, op: &BatchOperation) {
    match op {
        BatchOperation::Put { key, value } => encode_put(out, key, value),
        BatchOperation::Delete { key } => {
            out.push(OP_DELETE);
            push_chunk(out, key);
        }
    }
}

fn encode_record(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
}

/// Encoded size of one put inside a record payload.
fn entry_len(key: &[u8], value: &[u8]) -> u64 {
    (1 + 4 + key.len() + 4 + value.len()) as u64
}

fn compacted_len(data: &BTreeMap<Vec<u8>, Vec<u8>>) -> u64 {
    let entries: u64 = data.iter().map(|(k, v)| entry_len(k, v)).sum();
    (MAGIC.len() + 8) as u64 + entries
}

struct Replay {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Bytes up to the end of the last complete record
    valid_len: usize,
    records: usize,
}

fn replay_log(bytes: &[u8]) -> Result<Replay, StoreError> {
    let mut replay = Replay {
        data: BTreeMap::new(),
        valid_len: 0,
        records: 0,
    };
    // Crashed while writing the header of a new file
    if bytes.len() < MAGIC.len() && MAGIC.starts_with(bytes) {
        return Ok(replay);
    }
    if bytes.get(..MAGIC.len()) != Some(MAGIC.as_slice()) {
        return Err(StoreError::Corrupted("missing header".into()));
    }

    let mut cursor = MAGIC.len();
    while let Some(len_bytes) = bytes.get(cursor..cursor + 4) {
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        let payload_start = cursor + 4;
        let Some(record) = bytes.get(payload_start..payload_start + len + 4) else {
            break;
        };
        let (payload, trailer) = record.split_at(len);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(StoreError::Corrupted(format!(
                "checksum mismatch in record at offset {cursor}: expected {expected:08x}, got {actual:08x}"
            )));
        }
        apply_payload(&mut replay.data, payload, payload_start)?;
        cursor = payload_start + len + 4;
        replay.records += 1;
    }
    replay.valid_len = cursor;
    Ok(replay)
}

fn apply_payload(data: &mut BTreeMap<Vec<u8>, Vec<u8>>, payload: &[u8], offset: usize) -> Result<(), StoreError> {
    let mut cursor = 0;
    while cursor < payload.len() {
        let tag = payload[cursor];
        cursor += 1;
        let key = read_chunk(payload, &mut cursor, offset)?;
        match tag {
            OP_PUT => {
                let value = read_chunk(payload, &mut cursor, offset)?;
                data.insert(key, value);
            }
            OP_DELETE => {
                data.remove(&key);
            }
            other => {
                return Err(StoreError::Corrupted(format!(
                    "unknown operation {other} at offset {}",
                    offset + cursor - 1
                )))
            }
        }
    }
    Ok(())
}

fn read_chunk(payload: &[u8], cursor: &mut usize, offset: usize) -> Result<Vec<u8>, StoreError> {
    let truncated = || StoreError::Corrupted(format!("truncated entry at offset {}", offset + *cursor));
    let len_bytes = payload.get(*cursor..*cursor + 4).ok_or_else(truncated)?;
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    let start = *cursor + 4;
    let chunk = payload.get(start..start + len).ok_or_else(truncated)?;
    *cursor = start + len;
    Ok(chunk.to_vec())
}

impl KeyValueStore for FileBackedKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.atomic_batch_write(vec![BatchOperation::put(key, value)])
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.atomic_batch_write(vec![BatchOperation::delete(key)])
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), StoreError> {
        if operations.is_empty() {
            return Ok(());
        }
        let mut payload = Vec::new();
        for op in &operations {
            encode_op(&mut payload, op);
        }
        self.append(&payload)?;
        for op in operations {
            self.apply(op);
        }

        if self.needs_compaction() {
            // The batch is already durable in the log
            if let Err(e) = self.compact() {
                warn!("[ur-03] Compaction of {} failed: {}", self.path.display(), e);
            }
        }
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.data.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        Ok(scan(&self.data, prefix))
    }
}
