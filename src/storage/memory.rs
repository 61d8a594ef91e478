use super::traits::{FileLock, FileSystem, SequentialFile, WritableFile};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use std::cmp;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// --- In-Memory File System (For Testing) ---

#[derive(Clone, Default)]
pub struct MemFileSystem {
    // Path -> File Content
    files: Arc<RwLock<HashMap<PathBuf, Arc<RwLock<Vec<u8>>>>>>,
    locks: Arc<Mutex<HashSet<PathBuf>>>,
    faults: Arc<Faults>,
}

#[derive(Default)]
struct Faults {
    writes: AtomicBool,
    renames: AtomicBool,
    torn_writes: AtomicBool,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent open-for-write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent write land only half of its buffer, then fail
    /// as if the disk filled up.
    pub fn tear_writes(&self, tear: bool) {
        self.faults.torn_writes.store(tear, Ordering::SeqCst);
    }

    /// Makes every subsequent rename fail.
    pub fn fail_renames(&self, fail: bool) {
        self.faults.renames.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of a file's content, for assertions.
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.read().get(path).map(|data| data.read().clone())
    }

    /// Whether an owner currently holds the lock on `path`.
    pub fn is_locked(&self, path: &Path) -> bool {
        self.locks.lock().contains(path)
    }

    /// Overwrites (or creates) a file with raw bytes, for corruption tests.
    pub fn write_raw(&self, path: &Path, bytes: Vec<u8>) {
        self.files
            .write()
            .insert(path.to_path_buf(), Arc::new(RwLock::new(bytes)));
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.faults.writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected write failure"));
        }
        Ok(())
    }
}

fn not_found() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "File not found")
}

struct MemReader {
    data: Arc<RwLock<Vec<u8>>>,
    pos: usize,
}

impl Read for MemReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let guard = self.data.read();
        if self.pos >= guard.len() {
            return Ok(0);
        }
        let end = cmp::min(self.pos + buf.len(), guard.len());
        let n = end - self.pos;
        buf[..n].copy_from_slice(&guard[self.pos..end]);
        self.pos += n;
        Ok(n)
    }
}

// 追加写：所有写入都落在文件末尾
struct MemAppender {
    data: Arc<RwLock<Vec<u8>>>,
    faults: Arc<Faults>,
}

impl Write for MemAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.faults.torn_writes.load(Ordering::SeqCst) {
            // 只写进去一半，模拟磁盘写满
            self.data.write().extend_from_slice(&buf[..buf.len() / 2]);
            return Err(io::Error::other("disk full"));
        }
        self.data.write().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WritableFile for MemAppender {
    fn sync(&mut self) -> io::Result<()> {
        Ok(()) // 内存操作不需要 sync
    }
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.data.write().resize(len as usize, 0);
        Ok(())
    }
}

struct MemLock {
    path: PathBuf,
    locks: Arc<Mutex<HashSet<PathBuf>>>,
}

impl FileLock for MemLock {}

impl Drop for MemLock {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.path);
    }
}

impl FileSystem for MemFileSystem {
    fn open_reader(&self, path: &Path) -> io::Result<Box<dyn SequentialFile>> {
        let guard = self.files.read();
        let data = guard.get(path).ok_or_else(not_found)?;
        Ok(Box::new(MemReader {
            data: data.clone(),
            pos: 0,
        }))
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        self.check_writable()?;
        let guard = self.files.read();
        let data = guard.get(path).ok_or_else(not_found)?;
        Ok(Box::new(MemAppender {
            data: data.clone(),
            faults: self.faults.clone(),
        }))
    }

    fn create_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        self.check_writable()?;
        let data = Arc::new(RwLock::new(Vec::new()));
        self.files.write().insert(path.to_path_buf(), data.clone());
        Ok(Box::new(MemAppender {
            data,
            faults: self.faults.clone(),
        }))
    }

    fn create_new(&self, path: &Path) -> io::Result<()> {
        self.check_writable()?;
        let mut guard = self.files.write();
        if guard.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "File already exists",
            ));
        }
        guard.insert(path.to_path_buf(), Arc::new(RwLock::new(Vec::new())));
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.files.write().remove(path).map(|_| ()).ok_or_else(not_found)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.faults.renames.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected rename failure"));
        }
        let mut guard = self.files.write();
        let data = guard.remove(from).ok_or_else(not_found)?;
        guard.insert(to.to_path_buf(), data);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    fn len(&self, path: &Path) -> io::Result<u64> {
        let guard = self.files.read();
        let data = guard.get(path).ok_or_else(not_found)?;
        Ok(data.read().len() as u64)
    }

    fn lock(&self, path: &Path) -> io::Result<Box<dyn FileLock>> {
        let mut held = self.locks.lock();
        if !held.insert(path.to_path_buf()) {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "Lock held by another owner",
            ));
        }
        Ok(Box::new(MemLock {
            path: path.to_path_buf(),
            locks: self.locks.clone(),
        }))
    }
}
