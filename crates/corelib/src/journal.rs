//! Append-only journal.
//!
//! Durable backing for per-process state. One bincode-encoded record per
//! statement, each prefixed with a u32 big-endian length and fsynced on
//! append. On open, intact records are replayed in order; a truncated tail
//! left by a crash mid-append is discarded.
//!
//! The journal is single-writer: callers serialize access (the worker
//! store and the client log both hold a lock for the duration of each
//! statement).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// A durable, ordered log of records of type `T`.
pub struct Journal<T> {
    file: File,
    path: PathBuf,
    _record: PhantomData<T>,
}

impl<T> Journal<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open or create a journal, replaying every intact record.
    ///
    /// A truncated final record is dropped and the file is cut back to the
    /// last intact boundary, so the next append lands on a clean frame.
    /// A malformed record elsewhere in the file is a hard error.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<T>)> {
        let path = path.as_ref().to_path_buf();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let (records, valid_len) = replay(&bytes)?;

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)?;
        if valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                dropped = bytes.len() - valid_len,
                "discarding truncated journal tail"
            );
            file.set_len(valid_len as u64)?;
        }

        Ok((
            Self {
                file,
                path,
                _record: PhantomData,
            },
            records,
        ))
    }

    /// Append one record and fsync it.
    pub fn append(&mut self, record: &T) -> Result<()> {
        let body = bincode::serialize(record)?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decode records up to the last intact frame boundary.
fn replay<T: DeserializeOwned>(bytes: &[u8]) -> Result<(Vec<T>, usize)> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    while bytes.len() - offset >= 4 {
        let len = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        if bytes.len() - offset - 4 < len {
            break;
        }
        let body = &bytes[offset + 4..offset + 4 + len];
        records.push(bincode::deserialize(body)?);
        offset += 4 + len;
    }
    Ok((records, offset))
}
