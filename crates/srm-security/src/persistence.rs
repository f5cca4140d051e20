// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent-storage collaborator.
//
// The store only needs open / read / write / close / unlink over opaque named
// blobs.  Platforms plug their own byte stream in through `PersistentStorage`;
// a directory-backed implementation and an in-memory one (with fault
// injection, for tests and RAM-only devices) are provided here.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};

/// How a blob is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate.
    Write,
}

/// An open blob. Dropping without `close` abandons buffered writes.
pub trait BlobHandle: Read + Write + Send {
    /// Flush and release the blob; a write is only durable once this returns `Ok`.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Opaque named-blob storage.
pub trait PersistentStorage: Send {
    /// Open `name`; `ErrorKind::NotFound` when reading a blob that does not exist.
    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Box<dyn BlobHandle>>;

    /// Delete `name`. Deleting a missing blob is not an error.
    fn unlink(&self, name: &str) -> io::Result<()>;
}

/// Read a whole blob; `None` if it does not exist.
pub fn read_blob(storage: &dyn PersistentStorage, name: &str) -> io::Result<Option<Vec<u8>>> {
    let mut handle = match storage.open(name, OpenMode::Read) {
        Ok(h) => h,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut data = Vec::new();
    handle.read_to_end(&mut data)?;
    handle.close()?;
    Ok(Some(data))
}

/// Replace a whole blob.
pub fn write_blob(storage: &dyn PersistentStorage, name: &str, data: &[u8]) -> io::Result<()> {
    let mut handle = storage.open(name, OpenMode::Write)?;
    handle.write_all(data)?;
    handle.close()
}

// ---------------------------------------------------------------------------
// Directory-backed storage
// ---------------------------------------------------------------------------

/// Blobs stored as files inside one directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir`, creating it if needed.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        debug!("file storage ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{name}` is not a plain blob name"),
            ));
        }
        Ok(self.dir.join(name))
    }
}

struct FileHandle {
    file: File,
    mode: OpenMode,
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl BlobHandle for FileHandle {
    fn close(mut self: Box<Self>) -> io::Result<()> {
        if self.mode == OpenMode::Write {
            self.file.flush()?;
            self.file.sync_all()?;
        }
        Ok(())
    }
}

impl PersistentStorage for FileStorage {
    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Box<dyn BlobHandle>> {
        let path = self.path(name)?;
        let file = match mode {
            OpenMode::Read => File::open(&path)?,
            OpenMode::Write => File::create(&path)?,
        };
        Ok(Box::new(FileHandle { file, mode }))
    }

    fn unlink(&self, name: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path(name)?) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory storage
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    blobs: HashMap<String, Vec<u8>>,
    fail_writes: bool,
}

/// Blobs held in memory. Clones share the same blobs.
///
/// With `set_fail_writes(true)` every write is torn: half the data lands and
/// `close` reports an error, as if power failed mid-write.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Current contents of `name`.
    pub fn blob(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.lock().blobs.get(name).cloned()
    }

    /// Overwrite `name` directly, bypassing fault injection.
    pub fn put(&self, name: &str, data: Vec<u8>) {
        self.inner.lock().blobs.insert(name.to_owned(), data);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.lock().blobs.keys().cloned().collect();
        names.sort();
        names
    }
}

struct MemoryHandle {
    inner: Arc<Mutex<MemoryInner>>,
    name: String,
    mode: OpenMode,
    data: Vec<u8>,
    pos: usize,
}

impl Read for MemoryHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for MemoryHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.mode != OpenMode::Write {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "blob opened for reading"));
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobHandle for MemoryHandle {
    fn close(self: Box<Self>) -> io::Result<()> {
        let MemoryHandle {
            inner,
            name,
            mode,
            mut data,
            ..
        } = *self;
        if mode == OpenMode::Read {
            return Ok(());
        }
        let mut inner = inner.lock();
        if inner.fail_writes {
            data.truncate(data.len() / 2);
            inner.blobs.insert(name, data);
            return Err(io::Error::other("injected write failure"));
        }
        inner.blobs.insert(name, data);
        Ok(())
    }
}

impl PersistentStorage for MemoryStorage {
    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Box<dyn BlobHandle>> {
        let data = match mode {
            OpenMode::Read => self
                .blob(name)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_owned()))?,
            OpenMode::Write => Vec::new(),
        };
        Ok(Box::new(MemoryHandle {
            inner: Arc::clone(&self.inner),
            name: name.to_owned(),
            mode,
            data,
            pos: 0,
        }))
    }

    fn unlink(&self, name: &str) -> io::Result<()> {
        self.inner.lock().blobs.remove(name);
        Ok(())
    }
}
