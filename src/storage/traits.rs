use std::io;
use std::path::Path;

/// [Capability Trait] 顺序写入能力
///
/// 对应场景：追加写日志文件，或在压缩时写入临时文件。
/// 核心特性：
/// 1. 继承 `std::io::Write`，支持 `write`, `flush`。
/// 2. 提供 `sync` (fsync) 确保数据落盘。
/// 3. 提供 `set_len`，写入失败时把半条记录截掉。
pub trait WritableFile: io::Write + Send {
    fn sync(&mut self) -> io::Result<()>;
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

/// [Capability Trait] 顺序读取能力，回放日志时使用
pub trait SequentialFile: io::Read + Send {}

impl<T: io::Read + Send> SequentialFile for T {}

/// Advisory ownership of a log. Released when dropped.
pub trait FileLock: Send + Sync {}

impl WritableFile for Box<dyn WritableFile> {
    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }
}

/// [Factory Trait] 文件系统抽象
///
/// 职责：负责日志文件的生命周期管理 (创建、追加、替换、删除)。
/// 核心价值：
/// 1. **解耦**: 队列不再直接依赖 `std::fs`，而是依赖这个接口。
/// 2. **测试**: 可以注入 `MemFileSystem` 进行纯内存测试和故障注入。
pub trait FileSystem: Send + Sync {
    fn open_reader(&self, path: &Path) -> io::Result<Box<dyn SequentialFile>>;
    /// Opens an existing file positioned at its end.
    fn open_append(&self, path: &Path) -> io::Result<Box<dyn WritableFile>>;
    /// Creates or truncates `path`.
    fn create_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>>;
    /// Creates an empty file, failing if it already exists.
    fn create_new(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    /// Moves `from` onto `to`, replacing `to` if present.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn len(&self, path: &Path) -> io::Result<u64>;
    /// Takes an exclusive advisory lock on `path`, creating the file if
    /// needed. Fails with `ErrorKind::WouldBlock` when another owner holds it.
    fn lock(&self, path: &Path) -> io::Result<Box<dyn FileLock>>;
}
