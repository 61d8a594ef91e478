use super::traits::{FileLock, FileSystem, SequentialFile, WritableFile};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use std::os::unix::io::AsRawFd;

        fn lock_exclusive(file: &File) -> io::Result<()> {
            // SAFETY: the descriptor stays valid for as long as `file` is alive.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }

        // rename(2) 在 Unix 上原子地替换目标文件，无需先删除
        fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
            std::fs::rename(from, to)
        }
    } else {
        // 兜底逻辑：在不支持 flock 的平台上不做跨进程互斥
        fn lock_exclusive(_file: &File) -> io::Result<()> {
            Ok(())
        }

        // rename 在这些平台上不能覆盖已存在的文件：先删除原文件再重命名
        fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
            match std::fs::remove_file(to) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            std::fs::rename(from, to)
        }
    }
}

// 封装 std::fs::File，提供更好的扩展性（如未来添加 Metrics 或 Path 记录）
pub struct OsFile {
    inner: File,
}

impl Write for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl WritableFile for OsFile {
    fn sync(&mut self) -> io::Result<()> {
        self.inner.sync_all()
    }
    // 以 append 模式打开的文件截断后，下一次写入仍落在新的末尾
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.inner.set_len(len)
    }
}

struct OsFileLock {
    // 文件关闭时 flock 自动释放
    _file: File,
}

impl FileLock for OsFileLock {}

/// 默认的 OS 文件系统实现
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn open_reader(&self, path: &Path) -> io::Result<Box<dyn SequentialFile>> {
        let file = File::open(path)?;
        Ok(Box::new(file))
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let file = File::options().append(true).open(path)?;
        Ok(Box::new(OsFile { inner: file }))
    }

    fn create_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let file = File::options()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)?;
        Ok(Box::new(OsFile { inner: file }))
    }

    fn create_new(&self, path: &Path) -> io::Result<()> {
        File::options().write(true).create_new(true).open(path)?;

        // 创建文件后 sync 父目录，防止断电导致文件丢失 (Dentry loss)
        if let Some(parent) = path.parent() {
            // 忽略目录 sync 错误，因为某些环境（如只读挂载）可能不允许，但不应阻断流程
            let _ = File::open(parent).and_then(|f| f.sync_all());
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        replace_file(from, to)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn len(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn lock(&self, path: &Path) -> io::Result<Box<dyn FileLock>> {
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        lock_exclusive(&file)?;
        Ok(Box::new(OsFileLock { _file: file }))
    }
}
