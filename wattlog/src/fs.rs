//! Filesystem backends for the log store.
//!
//! The store needs very little from its filesystem: stat-for-size, open in
//! append / read-write / read mode, seek, block read and write, and truncate.
//! [`Filesystem`] captures exactly that so the same rotation code runs on a
//! real mount ([`DiskFs`]) and on an in-memory map ([`MemFs`]) in tests and
//! on hosts without flash storage.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// A file handle the store can read, write, seek, and truncate.
pub trait LogFile: Read + Write + Seek {
    /// Truncates or extends the file to exactly `len` bytes.
    ///
    /// The cursor position is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

/// Byte-addressable file store consumed by [`LogStore`](crate::store::LogStore).
pub trait Filesystem {
    /// File handle type.
    type File: LogFile;

    /// Makes the filesystem holding `path` ready for use.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the mount point is unusable.
    fn mount(&self, path: &Path) -> io::Result<()>;

    /// Returns `true` if a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Returns the size of the file at `path` in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotFound`] if the file does not exist.
    fn size(&self, path: &Path) -> io::Result<u64>;

    /// Creates (or truncates) the file and opens it for writing.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn create(&self, path: &Path) -> io::Result<Self::File>;

    /// Opens an existing file with every write going to the end.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn open_append(&self, path: &Path) -> io::Result<Self::File>;

    /// Opens an existing file for positioned reads and writes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn open_rw(&self, path: &Path) -> io::Result<Self::File>;

    /// Opens an existing file read-only.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn open_read(&self, path: &Path) -> io::Result<Self::File>;
}

/// The host filesystem via `std::fs`.
///
/// Mounting creates the parent directory of the log path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFs;

impl Filesystem for DiskFs {
    type File = File;

    fn mount(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn create(&self, path: &Path) -> io::Result<File> {
        File::create(path)
    }

    fn open_append(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().append(true).open(path)
    }

    fn open_rw(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(path)
    }

    fn open_read(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }
}

/// Operations [`MemFs`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `mount` fails.
    Mount,
    /// Every `open_*` and `create` fails.
    Open,
    /// Writes fail once `n` more bytes have been written successfully.
    WriteAfter(u64),
    /// `set_len` fails.
    Truncate,
}

#[derive(Debug, Default)]
struct MemState {
    files: HashMap<PathBuf, Vec<u8>>,
    faults: Vec<Fault>,
    written: u64,
}

/// In-memory filesystem.
///
/// Clones share the same underlying files, so a test can keep one handle
/// for inspection while the store owns another. Faults can be injected to
/// exercise the error paths of append and rotation.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    state: Arc<Mutex<MemState>>,
}

impl MemFs {
    /// Creates an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the file contents, if the file exists.
    pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().files.get(path.as_ref()).cloned()
    }

    /// Replaces the contents of a file, creating it if needed.
    pub fn write(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.into(), contents.into());
    }

    /// Deletes a file, returning `true` if it existed.
    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        self.lock().files.remove(path.as_ref()).is_some()
    }

    /// Arms a fault. Faults stay armed until [`MemFs::clear_faults`].
    pub fn inject(&self, fault: Fault) {
        let mut state = self.lock();
        if let Fault::WriteAfter(_) = fault {
            state.written = 0;
        }
        state.faults.push(fault);
    }

    /// Disarms every fault.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        // A poisoned lock only means a test panicked mid-write; the bytes
        // are still the best description of the file.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.lock().faults.contains(&fault)
    }

    fn open_file(&self, path: &Path, append: bool) -> io::Result<MemFile> {
        if self.has_fault(Fault::Open) {
            return Err(injected("open"));
        }
        if !self.lock().files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ));
        }
        Ok(MemFile {
            fs: self.clone(),
            path: path.to_path_buf(),
            pos: 0,
            append,
        })
    }
}

impl Filesystem for MemFs {
    type File = MemFile;

    fn mount(&self, _path: &Path) -> io::Result<()> {
        if self.has_fault(Fault::Mount) {
            return Err(injected("mount"));
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        self.lock()
            .files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn create(&self, path: &Path) -> io::Result<MemFile> {
        if self.has_fault(Fault::Open) {
            return Err(injected("create"));
        }
        self.lock().files.insert(path.to_path_buf(), Vec::new());
        self.open_file(path, false)
    }

    fn open_append(&self, path: &Path) -> io::Result<MemFile> {
        self.open_file(path, true)
    }

    fn open_rw(&self, path: &Path) -> io::Result<MemFile> {
        self.open_file(path, false)
    }

    fn open_read(&self, path: &Path) -> io::Result<MemFile> {
        self.open_file(path, false)
    }
}

fn injected(op: &str) -> io::Error {
    io::Error::other(format!("injected {op} failure"))
}

/// Handle to a file inside a [`MemFs`].
#[derive(Debug)]
pub struct MemFile {
    fs: MemFs,
    path: PathBuf,
    pos: u64,
    append: bool,
}

impl Read for MemFile {
    #[allow(clippy::cast_possible_truncation)] // in-memory files fit in usize
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.fs.lock();
        let data = state
            .files
            .get(&self.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file removed"))?;

        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        drop(state);

        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    #[allow(clippy::cast_possible_truncation)] // in-memory files fit in usize
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.fs.lock();

        let mut allowed = buf.len();
        for fault in &state.faults {
            if let Fault::WriteAfter(limit) = *fault {
                let left = limit.saturating_sub(state.written);
                if left == 0 {
                    return Err(injected("write"));
                }
                allowed = allowed.min(left as usize);
            }
        }
        state.written += allowed as u64;

        let data = state
            .files
            .get_mut(&self.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file removed"))?;

        if self.append {
            self.pos = data.len() as u64;
        }
        let start = self.pos as usize;
        let end = start + allowed;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(&buf[..allowed]);

        self.pos = end as u64;
        Ok(allowed)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.fs.size(&self.path)?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        self.pos = target;
        Ok(target)
    }
}

impl LogFile for MemFile {
    #[allow(clippy::cast_possible_truncation)] // in-memory files fit in usize
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let mut state = self.fs.lock();
        if state.faults.contains(&Fault::Truncate) {
            return Err(injected("truncate"));
        }
        let data = state
            .files
            .get_mut(&self.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file removed"))?;
        data.resize(len as usize, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_fs_append_and_read() {
        let fs = MemFs::new();
        let path = Path::new("/log.csv");

        let mut file = fs.create(path).unwrap();
        file.write_all(b"head\n").unwrap();

        let mut file = fs.open_append(path).unwrap();
        file.write_all(b"row\n").unwrap();

        let mut contents = String::new();
        fs.open_read(path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "head\nrow\n");
        assert_eq!(fs.size(path).unwrap(), 9);
    }

    #[test]
    fn test_mem_fs_positioned_write_and_truncate() {
        let fs = MemFs::new();
        let path = Path::new("/log.csv");
        fs.write(path, b"0123456789".to_vec());

        let mut file = fs.open_rw(path).unwrap();
        file.seek(SeekFrom::Start(2)).unwrap();
        file.write_all(b"ab").unwrap();
        file.set_len(6).unwrap();

        assert_eq!(fs.read(path).unwrap(), b"01ab45");
        assert_eq!(file.seek(SeekFrom::End(0)).unwrap(), 6);
    }

    #[test]
    fn test_mem_fs_missing_file() {
        let fs = MemFs::new();
        let err = fs.open_rw(Path::new("/absent")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!fs.exists(Path::new("/absent")));
        assert!(fs.size(Path::new("/absent")).is_err());
    }

    #[test]
    fn test_mem_fs_write_fault_allows_prefix() {
        let fs = MemFs::new();
        let path = Path::new("/log.csv");
        fs.write(path, Vec::new());
        fs.inject(Fault::WriteAfter(3));

        let mut file = fs.open_append(path).unwrap();
        assert!(file.write_all(b"abcdef").is_err());
        assert_eq!(fs.read(path).unwrap(), b"abc");

        fs.clear_faults();
        file.write_all(b"def").unwrap();
        assert_eq!(fs.read(path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_disk_fs_mount_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/littlefs/datalog.csv");

        DiskFs.mount(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(!DiskFs.exists(&path));

        let mut file = DiskFs.create(&path).unwrap();
        file.write_all(b"hello\n").unwrap();
        assert_eq!(DiskFs.size(&path).unwrap(), 6);

        let mut file = DiskFs.open_rw(&path).unwrap();
        LogFile::set_len(&mut file, 2).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"he");
    }
}
