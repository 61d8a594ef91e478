//! A durable FIFO queue backed by an append-only log.
//!
//! Elements are appended to a single log file as value records, removals
//! are recorded as tombstones, and the log is periodically compacted from
//! the in-memory contents. Opening an existing log replays it.
//!
//! ```no_run
//! use titanium_queue::PersistentQueue;
//!
//! let queue: PersistentQueue<String> = PersistentQueue::open("jobs.queue")?;
//! queue.add("first".to_string())?;
//! assert_eq!(queue.poll()?, Some("first".to_string()));
//! # Ok::<(), titanium_queue::QueueError>(())
//! ```

pub mod blocking;
pub mod codec;
pub mod compaction;
pub mod config;
pub mod error;
pub mod queue;
pub mod record;
pub mod recovery;
pub mod storage;
mod utils;
mod writer;

pub use blocking::BlockingQueue;
pub use codec::{BincodeCodec, BytesCodec, Codec, StringCodec};
pub use config::{QueueConfig, RemovalPolicy, WriteMode};
pub use error::QueueError;
pub use queue::PersistentQueue;
pub use storage::{FileSystem, MemFileSystem, OsFileSystem};
