// kernel/src/memory/backing_file.rs
//
// The file-ops external collaborator of the VM core (spec §6): random
// access by byte offset, plus length and an independent handle via
// reopen. This is deliberately a narrower trait than
// process::file::FileHandle — that one models a process's file
// descriptor (sequential read/write, close, /dev drivers); this one
// models a page's backing store, which paging always addresses by
// (file, offset) and never through a cursor.
//
// Held behind Arc so a run of per-page SptEntry's (one FILE/MMAP entry
// per page, per spec §4.1) can share one open file without each owning
// a private copy.

use alloc::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingFileError {
    Io,
    OutOfRange,
}

pub type BackingFileResult<T> = Result<T, BackingFileError>;

/// A file usable as demand-paged backing store.
pub trait BackingFile: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes actually read (short reads are legal at EOF).
    fn read_at(&self, buf: &mut [u8], offset: u64) -> BackingFileResult<usize>;

    /// Write `buf.len()` bytes at `offset`.
    fn write_at(&self, buf: &[u8], offset: u64) -> BackingFileResult<usize>;

    /// Total length of the file in bytes.
    fn length(&self) -> u64;

    /// Open an independent handle onto the same underlying file.
    /// Independent in the sense that closing one does not affect the
    /// other, but both observe the same on-disk content.
    fn reopen(&self) -> Arc<dyn BackingFile>;

    /// Name for debugging.
    fn name(&self) -> &str {
        "<backing-file>"
    }
}

/// A read-only backing file over a `'static` byte slice — the
/// executable images this teaching kernel embeds directly in its own
/// binary (see init/processes.rs) rather than loading from a real
/// filesystem.
pub struct StaticFile {
    data: &'static [u8],
}

impl StaticFile {
    pub fn new(data: &'static [u8]) -> Self {
        Self { data }
    }
}

impl BackingFile for StaticFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> BackingFileResult<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, _buf: &[u8], _offset: u64) -> BackingFileResult<usize> {
        Err(BackingFileError::Io)
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn reopen(&self) -> Arc<dyn BackingFile> {
        Arc::new(StaticFile { data: self.data })
    }

    fn name(&self) -> &str {
        "<static>"
    }
}
