mod memory;
mod os;
mod traits;

pub use memory::MemFileSystem;
pub use os::OsFileSystem;
pub use traits::{FileLock, FileSystem, SequentialFile, WritableFile};
