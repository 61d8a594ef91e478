use std::collections::VecDeque;
use std::io::BufReader;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::compaction::temp_path;
use crate::error::QueueError;
use crate::record::{Decoder, RecordRef};
use crate::storage::FileSystem;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplayStats {
    pub values: usize,
    pub tombstones: usize,
    pub bytes: u64,
}

/// Brings the store at `path` into a replayable state.
///
/// Returns `true` when an existing log was found (possibly after promoting a
/// leftover compaction temp file), `false` when a new empty log was created.
pub fn prepare_store(fs: &dyn FileSystem, path: &Path) -> Result<bool, QueueError> {
    let tmp = temp_path(path);

    if fs.exists(path) {
        if fs.exists(&tmp) {
            // 压缩在删除原文件之前中断：原日志完整，临时文件可能只写了一半
            warn!(path = %tmp.display(), "Removing stale compaction file");
            fs.remove_file(&tmp)?;
        }
        return Ok(true);
    }

    if fs.exists(&tmp) {
        // 压缩在删除原文件之后、重命名之前中断：临时文件就是完整的新日志
        warn!(
            from = %tmp.display(),
            to = %path.display(),
            "Store missing, promoting compaction file"
        );
        fs.rename(&tmp, path)
            .map_err(|source| QueueError::CompactionRename {
                from: tmp.clone(),
                to: path.to_path_buf(),
                source,
            })?;
        return Ok(true);
    }

    fs.create_new(path)
        .map_err(|source| QueueError::Construction {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(false)
}

/// Replays the log into a fresh mirror.
///
/// Value records are decoded and pushed to the tail, tombstones pop the head.
/// Any framing or payload error, and any tombstone against an empty mirror,
/// aborts recovery.
pub fn replay<T, C>(
    fs: &dyn FileSystem,
    path: &Path,
    codec: &C,
    max_record_size: usize,
) -> Result<(VecDeque<T>, ReplayStats), QueueError>
where
    C: Codec<T> + ?Sized,
{
    let mut reader = BufReader::new(fs.open_reader(path)?);
    let mut decoder = Decoder::new(max_record_size);
    let mut items = VecDeque::new();
    let mut stats = ReplayStats::default();

    loop {
        let offset = decoder.position();
        let record = decoder
            .decode_from(&mut reader)
            .map_err(|e| QueueError::Recovery {
                offset,
                reason: e.to_string(),
            })?;

        match record {
            None => break,
            Some(RecordRef::Tombstone) => {
                if items.pop_front().is_none() {
                    return Err(QueueError::Recovery {
                        offset,
                        reason: "Tombstone found while the queue is empty".to_string(),
                    });
                }
                stats.tombstones += 1;
            }
            Some(RecordRef::Value(payload)) => {
                let item = codec.decode(payload).map_err(|e| QueueError::Recovery {
                    offset,
                    reason: e.to_string(),
                })?;
                items.push_back(item);
                stats.values += 1;
            }
        }
    }

    stats.bytes = decoder.position();
    debug!(
        path = %path.display(),
        values = stats.values,
        tombstones = stats.tombstones,
        bytes = stats.bytes,
        remaining = items.len(),
        "Replayed store"
    );
    Ok((items, stats))
}

/// Opens or creates the store and returns its recovered contents.
pub fn recover<T, C>(
    fs: &dyn FileSystem,
    path: &Path,
    codec: &C,
    max_record_size: usize,
) -> Result<(VecDeque<T>, ReplayStats), QueueError>
where
    C: Codec<T> + ?Sized,
{
    if prepare_store(fs, path)? {
        info!(path = %path.display(), "Reading existing store...");
        replay(fs, path, codec, max_record_size)
    } else {
        info!(path = %path.display(), "Creating new store...");
        Ok((VecDeque::new(), ReplayStats::default()))
    }
}
