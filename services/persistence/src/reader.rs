//! Journal reader: sequential reading with corruption detection
//!
//! Reads every journal file in index order and checks each entry's CRC32C
//! and that sequences are gapless. An entry cut short at the end of a file
//! is a torn write from a crash: the reader notes it and moves on to the
//! next file. Anything else that fails to parse, or parses with the wrong
//! checksum, is corruption and stops the read.

use crate::journal::{journal_files, JournalEntry, JournalError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Checksum mismatch in {file} at byte offset {offset}: entry seq={sequence}")]
    ChecksumMismatch { file: PathBuf, offset: u64, sequence: u64 },

    #[error("Corruption in {file} at byte offset {offset}: {detail}")]
    Corruption { file: PathBuf, offset: u64, detail: String },

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
}

/// Unreadable bytes at the end of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornTail {
    pub file: PathBuf,
    pub offset: u64,
    pub bytes: usize,
}

/// Sequential journal reader with checksum validation
pub struct JournalReader {
    files: Vec<PathBuf>,
    current_file_idx: usize,
    data: Vec<u8>,
    pos: usize,
    last_sequence: Option<u64>,
    torn_tails: Vec<TornTail>,
}

impl JournalReader {
    /// Open a reader over all journal files in `dir`
    ///
    /// A missing directory reads as an empty journal.
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let files = journal_files(dir)?.into_iter().map(|(_, path)| path).collect();
        let mut reader = Self {
            files,
            current_file_idx: 0,
            data: Vec::new(),
            pos: 0,
            last_sequence: None,
            torn_tails: Vec::new(),
        };
        reader.load_current_file()?;
        Ok(reader)
    }

    /// Read the next valid entry; `None` once every file is exhausted
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        loop {
            while self.pos >= self.data.len() {
                if !self.advance_file()? {
                    return Ok(None);
                }
            }

            let offset = self.pos as u64;
            match JournalEntry::from_bytes(&self.data[self.pos..]) {
                Ok((entry, consumed)) => {
                    if !entry.verify_checksum() {
                        return Err(ReaderError::ChecksumMismatch {
                            file: self.current_file(),
                            offset,
                            sequence: entry.sequence,
                        });
                    }
                    if let Some(last) = self.last_sequence {
                        if entry.sequence != last + 1 {
                            return Err(ReaderError::SequenceGap {
                                expected: last + 1,
                                got: entry.sequence,
                            });
                        }
                    }
                    self.pos += consumed;
                    self.last_sequence = Some(entry.sequence);
                    return Ok(Some(entry));
                }
                Err(JournalError::Incomplete { .. }) => {
                    let tail = TornTail {
                        file: self.current_file(),
                        offset,
                        bytes: self.data.len() - self.pos,
                    };
                    warn!(file = %tail.file.display(), offset, bytes = tail.bytes, "Skipping torn journal tail");
                    self.torn_tails.push(tail);
                    self.pos = self.data.len();
                }
                Err(err) => {
                    return Err(ReaderError::Corruption {
                        file: self.current_file(),
                        offset,
                        detail: err.to_string(),
                    });
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn torn_tails(&self) -> &[TornTail] {
        &self.torn_tails
    }

    fn current_file(&self) -> PathBuf {
        self.files.get(self.current_file_idx).cloned().unwrap_or_default()
    }

    fn load_current_file(&mut self) -> Result<(), ReaderError> {
        self.data = match self.files.get(self.current_file_idx) {
            Some(path) => fs::read(path)?,
            None => Vec::new(),
        };
        self.pos = 0;
        Ok(())
    }

    fn advance_file(&mut self) -> Result<bool, ReaderError> {
        if self.current_file_idx + 1 >= self.files.len() {
            return Ok(false);
        }
        self.current_file_idx += 1;
        self.load_current_file()?;
        Ok(true)
    }
}
