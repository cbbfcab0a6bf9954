//! Market persistence
//!
//! Append-only, checksummed journal of committed market changes, a reader
//! that detects corruption and torn writes, and crash recovery that rebuilds
//! the market's state image from the journal.

pub mod journal;
pub mod reader;
pub mod recovery;

pub use journal::{FsyncPolicy, Journal, JournalConfig, JournalEntry, JournalError, JournalFile, JournalWriter};
pub use reader::{JournalReader, ReaderError, TornTail};
pub use recovery::{recover, RecoveryError, RecoveryReport, StateBuilder};
