use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec::Codec;
use crate::config::WriteMode;
use crate::error::QueueError;
use crate::storage::FileSystem;
use crate::writer::Writer;

pub const TEMPFILE_SUFFIX: &str = "tmp";

/// `<log>.tmp`, the file a compaction writes before it replaces the log.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TEMPFILE_SUFFIX);
    PathBuf::from(name)
}

pub struct Compactor;

// 用内存中的完整队列重写日志：先写临时文件，再替换原文件
// 原文件在替换完成前始终完整，替换失败时保留临时文件供恢复时提升
impl Compactor {
    /// Rewrites the log at `path` so that it holds exactly `items`, in order.
    /// Returns the size of the new log in bytes.
    pub fn compact<'a, T, C, I>(
        fs: &dyn FileSystem,
        path: &Path,
        items: I,
        codec: &C,
        mode: WriteMode,
    ) -> Result<u64, QueueError>
    where
        T: 'a,
        C: Codec<T> + ?Sized,
        I: IntoIterator<Item = &'a T>,
    {
        let tmp = temp_path(path);

        let (records, bytes) = match Self::write_temp(fs, &tmp, items, codec, mode) {
            Ok(written) => written,
            Err(e) => {
                // 临时文件不完整，删除它以免恢复时误用
                let _ = fs.remove_file(&tmp);
                return Err(QueueError::durability(e));
            }
        };

        fs.rename(&tmp, path)
            .map_err(|source| QueueError::CompactionRename {
                from: tmp.clone(),
                to: path.to_path_buf(),
                source,
            })?;

        debug!(path = %path.display(), records, bytes, "Compacted store");
        Ok(bytes)
    }

    fn write_temp<'a, T, C, I>(
        fs: &dyn FileSystem,
        tmp: &Path,
        items: I,
        codec: &C,
        mode: WriteMode,
    ) -> Result<(usize, u64), QueueError>
    where
        T: 'a,
        C: Codec<T> + ?Sized,
        I: IntoIterator<Item = &'a T>,
    {
        let mut writer = Writer::new(fs.create_file(tmp)?);
        for item in items {
            let payload = codec.encode(item)?;
            writer.write_value(&payload)?;
        }
        let written = (writer.records(), writer.bytes_written());
        writer.finish(mode)?;
        Ok(written)
    }
}
