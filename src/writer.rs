use crate::config::WriteMode;
use crate::error::QueueError;
use crate::record::{encode_tombstone_to, encode_value_to};
use crate::storage::WritableFile;
use std::io;
use std::io::Write;

/// Buffered record writer over one short-lived file handle.
///
/// Callers open a handle, push records, then call [`Writer::finish`], which
/// flushes (and syncs in [`WriteMode::Sync`]). If anything fails on the way,
/// [`Writer::discard`] cuts the file back to where the batch started.
pub struct Writer<W: WritableFile> {
    writer: io::BufWriter<W>,
    bytes_written: u64,
    records: usize,
}

impl<W: WritableFile> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: io::BufWriter::new(inner),
            bytes_written: 0,
            records: 0,
        }
    }

    pub fn write_value(&mut self, payload: &[u8]) -> Result<(), QueueError> {
        self.bytes_written += encode_value_to(payload, &mut self.writer)?;
        self.records += 1;
        Ok(())
    }

    pub fn write_tombstone(&mut self) -> Result<(), QueueError> {
        self.bytes_written += encode_tombstone_to(&mut self.writer)?;
        self.records += 1;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Flushes buffered records to the file.
    pub fn finish(&mut self, mode: WriteMode) -> Result<(), QueueError> {
        // 1. 先把 BufWriter 的数据推给内核
        self.writer.flush()?;
        // 2. 再命令内核推给磁盘
        if mode == WriteMode::Sync {
            self.writer.get_mut().sync()?;
        }
        Ok(())
    }

    /// Drops whatever is still buffered and truncates the file to `len`.
    ///
    /// `into_parts` hands back the handle without flushing, so a record that
    /// failed halfway is not written a second time when the writer goes away.
    pub fn discard(self, len: u64) -> io::Result<()> {
        let (mut inner, _unflushed) = self.writer.into_parts();
        inner.set_len(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Decoder, RecordRef};
    use crate::storage::{FileSystem, MemFileSystem};
    use std::path::Path;

    #[test]
    fn test_records_reach_file_only_after_finish() {
        let fs = MemFileSystem::new();
        let path = Path::new("queue.log");
        fs.create_new(path).unwrap();

        let mut writer = Writer::new(fs.open_append(path).unwrap());
        writer.write_value(b"a").unwrap();
        writer.write_tombstone().unwrap();
        assert_eq!(writer.records(), 2);
        assert_eq!(writer.bytes_written(), 4);
        assert_eq!(fs.len(path).unwrap(), 0);

        writer.finish(WriteMode::Sync).unwrap();
        let data = fs.contents(path).unwrap();
        assert_eq!(data.len(), 4);

        let mut reader = &data[..];
        let mut decoder = Decoder::new(64);
        assert_eq!(
            decoder.decode_from(&mut reader).unwrap(),
            Some(RecordRef::Value(b"a"))
        );
        assert_eq!(
            decoder.decode_from(&mut reader).unwrap(),
            Some(RecordRef::Tombstone)
        );
    }

    #[test]
    fn test_discard_drops_buffer_and_truncates() {
        let fs = MemFileSystem::new();
        let path = Path::new("queue.log");
        fs.create_new(path).unwrap();
        let mut writer = Writer::new(fs.open_append(path).unwrap());
        writer.write_value(b"kept").unwrap();
        writer.finish(WriteMode::Flush).unwrap();
        let base = fs.len(path).unwrap();

        let mut writer = Writer::new(fs.open_append(path).unwrap());
        writer.write_value(b"flushed").unwrap();
        writer.finish(WriteMode::Flush).unwrap();
        writer.write_value(b"buffered").unwrap();
        writer.discard(base).unwrap();

        assert_eq!(fs.len(path).unwrap(), base);
    }
}
