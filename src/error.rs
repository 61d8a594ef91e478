use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),

    #[error("Could not create new store {}: {source}", path.display())]
    Construction {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Durability Error: {0}")]
    Durability(#[source] io::Error),

    #[error("Unable to rename {} to {}: {source}", from.display(), to.display())]
    CompactionRename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Recovery Error at offset {offset}: {reason}")]
    Recovery { offset: u64, reason: String },

    #[error("Codec Error: {0}")]
    Codec(String),

    #[error("Store is locked by another owner: {}", .0.display())]
    Locked(PathBuf),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Queue is empty")]
    Empty,

    #[error("Varint Decode Error")]
    VarintDecodeError,
}

impl QueueError {
    /// 把写路径上的 I/O 错误统一归类为持久化失败
    pub(crate) fn durability(e: QueueError) -> QueueError {
        match e {
            QueueError::Io(io_e) => QueueError::Durability(io_e),
            other => other,
        }
    }
}
