//! Journal writer: append-only commit log with checksums
//!
//! Every market commit is written here before it becomes visible in memory.
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len:  u32]
//! [sequence:  u64]
//! [timestamp: i64]   // commit time, unix milliseconds
//! [payload_len: u32][payload: bytes]   // bincode CommitRecord
//! [checksum:  u32]   // CRC32C over sequence+timestamp+payload
//! ```
//!
//! All integers are little-endian.

use crc32c::crc32c;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};
use types::commit::{CommitRecord, CommitSink};

/// Bodies larger than this are treated as corruption rather than allocated
pub(crate) const MAX_BODY_LEN: usize = 256 * 1024 * 1024;

/// sequence + timestamp + payload_len + checksum
const MIN_BODY_LEN: usize = 8 + 8 + 4 + 4;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Incomplete entry: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    #[error("Journal is poisoned after an unrecoverable write failure")]
    Poisoned,
}

// ── Journal Entry ───────────────────────────────────────────────────

/// One framed, checksummed journal entry
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Gapless position in the journal, starting at 1
    pub sequence: u64,
    pub timestamp: i64,
    /// Bincode-encoded `CommitRecord`
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl JournalEntry {
    pub fn new(sequence: u64, timestamp: i64, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(sequence, timestamp, &payload);
        Self {
            sequence,
            timestamp,
            payload,
            checksum,
        }
    }

    /// Frame a commit record
    pub fn encode(sequence: u64, record: &CommitRecord) -> Result<Self, JournalError> {
        let payload = bincode::serialize(record).map_err(|e| JournalError::Serialization(e.to_string()))?;
        Ok(Self::new(sequence, record.committed_at.timestamp_millis(), payload))
    }

    /// Decode the commit record carried by this entry
    pub fn record(&self) -> Result<CommitRecord, JournalError> {
        bincode::deserialize(&self.payload).map_err(|e| JournalError::Serialization(e.to_string()))
    }

    pub fn compute_checksum(sequence: u64, timestamp: i64, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == Self::compute_checksum(self.sequence, self.timestamp, &self.payload)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_len = self.payload.len() as u32;
        let body_len = (MIN_BODY_LEN + self.payload.len()) as u32;

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parse one entry from the front of `data`
    ///
    /// Returns `(entry, bytes_consumed)`. The checksum is not verified here.
    /// `Incomplete` means the data ends mid-entry, which is what a torn
    /// final write looks like.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        let mut cursor = Cursor::new(data);
        let body_len = cursor.u32()? as usize;
        if body_len > MAX_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "implausible body length {} (likely corruption)",
                body_len
            )));
        }
        if body_len < MIN_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "body too small: {} bytes, minimum is {}",
                body_len, MIN_BODY_LEN
            )));
        }
        let total = 4 + body_len;
        if data.len() < total {
            return Err(JournalError::Incomplete {
                needed: total,
                available: data.len(),
            });
        }

        let mut body = Cursor::new(&data[4..total]);
        let sequence = body.u64()?;
        let timestamp = body.i64()?;
        let payload_len = body.u32()? as usize;
        if payload_len + MIN_BODY_LEN != body_len {
            return Err(JournalError::Serialization(format!(
                "payload length {} does not match body length {}",
                payload_len, body_len
            )));
        }
        let payload = body.take(payload_len)?.to_vec();
        let checksum = body.u32()?;

        Ok((
            Self {
                sequence,
                timestamp,
                payload,
                checksum,
            },
            total,
        ))
    }
}

/// Little-endian reader over a byte slice
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], JournalError> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(JournalError::Incomplete {
                needed: end,
                available: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], JournalError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, JournalError> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, JournalError> {
        self.array().map(u64::from_le_bytes)
    }

    fn i64(&mut self) -> Result<i64, JournalError> {
        self.array().map(i64::from_le_bytes)
    }
}

// ── Fsync Policy ────────────────────────────────────────────────────

/// Controls when `fsync` is called
///
/// Entries are always flushed to the OS before `append` returns; the policy
/// only decides how often they are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    EveryWrite,
    EveryN(usize),
    /// Only when a file is rotated or the journal is synced explicitly
    OnRotation,
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory for journal files
    pub dir: PathBuf,
    /// Maximum file size in bytes before rotation (default 64 MiB)
    pub max_file_size: u64,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Storage the writer appends frames to
///
/// `truncate` must shrink the underlying file so that the next write lands
/// at the new end.
pub trait JournalFile: Write + Send {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl JournalFile for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

fn open_segment(path: &Path) -> io::Result<Box<dyn JournalFile>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Append-only journal writer with checksums, rotation and fsync control
///
/// A writer never appends to an existing file: `open` starts a fresh one
/// after the highest index on disk, so a torn tail left by a crash stays
/// at the end of its own file.
///
/// An append either leaves a whole frame in the file or none of it. A
/// failed write is cut back off the file; if that is impossible, or an
/// fsync fails, the writer is poisoned and refuses every later append.
pub struct JournalWriter {
    config: JournalConfig,
    file: Box<dyn JournalFile>,
    current_file: PathBuf,
    current_file_size: u64,
    next_sequence: u64,
    writes_since_fsync: usize,
    file_index: u64,
    poisoned: bool,
}

impl JournalWriter {
    /// Open a writer whose first entry will carry `next_sequence`
    pub fn open(config: JournalConfig, next_sequence: u64) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;
        let file_index = journal_files(&config.dir)?
            .last()
            .map_or(0, |(index, _)| index + 1);
        let current_file = journal_path(&config.dir, file_index);
        let file = open_segment(&current_file)?;
        info!(file = %current_file.display(), next_sequence, "Journal opened");
        Ok(Self::with_file(config, file, current_file, file_index, next_sequence))
    }

    fn with_file(
        config: JournalConfig,
        file: Box<dyn JournalFile>,
        current_file: PathBuf,
        file_index: u64,
        next_sequence: u64,
    ) -> Self {
        Self {
            config,
            file,
            current_file,
            current_file_size: 0,
            next_sequence: next_sequence.max(1),
            writes_since_fsync: 0,
            file_index,
            poisoned: false,
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Append an entry; its sequence must be the next one
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        if self.poisoned {
            return Err(JournalError::Poisoned);
        }
        if entry.sequence != self.next_sequence {
            return Err(JournalError::SequenceError {
                expected: self.next_sequence,
                got: entry.sequence,
            });
        }
        if self.current_file_size >= self.config.max_file_size {
            if let Err(err) = self.rotate() {
                self.poison(&err);
                return Err(err);
            }
        }

        let start = self.current_file_size;
        let bytes = entry.to_bytes();
        if let Err(err) = self.file.write_all(&bytes).and_then(|()| self.file.flush()) {
            self.roll_back(start);
            return Err(err.into());
        }
        self.writes_since_fsync += 1;
        if let Err(err) = self.apply_fsync_policy() {
            // The frame may or may not have reached the disk
            self.roll_back(start);
            self.poison(&err);
            return Err(err);
        }

        self.current_file_size = start + bytes.len() as u64;
        self.next_sequence = entry.sequence + 1;
        Ok(())
    }

    /// Frame and append a commit record, returning its sequence
    pub fn append_record(&mut self, record: &CommitRecord) -> Result<u64, JournalError> {
        let entry = JournalEntry::encode(self.next_sequence, record)?;
        self.append(&entry)?;
        Ok(entry.sequence)
    }

    /// Flush and fsync the current file
    pub fn sync(&mut self) -> Result<(), JournalError> {
        if self.poisoned {
            return Err(JournalError::Poisoned);
        }
        let result = self.file.flush().and_then(|()| self.file.sync());
        if let Err(err) = result {
            let err = JournalError::from(err);
            self.poison(&err);
            return Err(err);
        }
        self.writes_since_fsync = 0;
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), JournalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            self.file.sync()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }

    fn roll_back(&mut self, len: u64) {
        if let Err(err) = self.file.truncate(len) {
            self.poison(&JournalError::from(err));
        }
    }

    fn poison(&mut self, cause: &JournalError) {
        if self.poisoned {
            return;
        }
        error!(file = %self.current_file.display(), error = %cause, "Journal writer poisoned");
        self.poisoned = true;
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;
        self.file_index += 1;
        self.current_file = journal_path(&self.config.dir, self.file_index);
        self.file = open_segment(&self.current_file)?;
        self.current_file_size = 0;
        debug!(file = %self.current_file.display(), "Journal rotated");
        Ok(())
    }
}

pub(crate) fn journal_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("journal-{:06}.bin", index))
}

/// Journal files in `dir`, sorted by index
pub(crate) fn journal_files(dir: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let index = name
                .strip_prefix("journal-")?
                .strip_suffix(".bin")?
                .parse::<u64>()
                .ok()?;
            Some((index, e.path()))
        })
        .collect();
    files.sort_by_key(|(index, _)| *index);
    Ok(files)
}

// ── Commit Sink ─────────────────────────────────────────────────────

/// Thread-safe journal the market commits through
///
/// Appends are serialized by one mutex, so sequence order is the order in
/// which commits reached the journal.
pub struct Journal {
    writer: Mutex<JournalWriter>,
}

impl Journal {
    pub fn open(config: JournalConfig, next_sequence: u64) -> Result<Self, JournalError> {
        Ok(Self {
            writer: Mutex::new(JournalWriter::open(config, next_sequence)?),
        })
    }

    pub fn next_sequence(&self) -> u64 {
        self.writer.lock().next_sequence()
    }

    pub fn sync(&self) -> Result<(), JournalError> {
        self.writer.lock().sync()
    }
}

impl CommitSink for Journal {
    fn append(&self, record: &CommitRecord) -> Result<(), String> {
        let mut writer = self.writer.lock();
        match writer.append_record(record) {
            Ok(sequence) => {
                debug!(
                    sequence,
                    orders = record.orders.len(),
                    balances = record.balances.len(),
                    transactions = record.transactions.len(),
                    "Commit journaled"
                );
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Journal append failed");
                Err(err.to_string())
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
