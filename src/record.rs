use crate::{
    error::QueueError,
    utils::{read_varint32, write_varint32},
};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

// On-disk layout, records back to back, no file header:
//   Tombstone: tag(1B) = 0x00
//   Value:     tag(1B) = 0x01 | payload_len(varint u32) | payload
pub const TAG_TOMBSTONE: u8 = 0x00;
pub const TAG_VALUE: u8 = 0x01;

/// One framed unit of the log, owned. Only test fixtures build logs
/// record by record; the write path goes through the encoders below.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Value(Vec<u8>),
    Tombstone,
}

/// Borrowed view of a decoded record. The payload lives in the decoder's
/// buffer and is only valid until the next `decode_from` call.
#[derive(Debug, PartialEq)]
pub enum RecordRef<'a> {
    Value(&'a [u8]),
    Tombstone,
}

#[cfg(test)]
impl Record {
    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<u64, QueueError> {
        match self {
            Record::Value(payload) => encode_value_to(payload, writer),
            Record::Tombstone => encode_tombstone_to(writer),
        }
    }
}

// zero allocation write
pub fn encode_value_to<W: Write>(payload: &[u8], writer: &mut W) -> Result<u64, QueueError> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        QueueError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Payload larger than u32::MAX bytes",
        ))
    })?;

    writer.write_u8(TAG_VALUE)?;
    let len_size = write_varint32(writer, len)?;
    writer.write_all(payload)?;

    // Return the total number of bytes written so callers can track the log length
    Ok((1 + len_size + payload.len()) as u64)
}

pub fn encode_tombstone_to<W: Write>(writer: &mut W) -> Result<u64, QueueError> {
    writer.write_u8(TAG_TOMBSTONE)?;
    Ok(1)
}

// zero allocation decoder
pub struct Decoder {
    buf: Vec<u8>,
    max_record_size: usize,
    // 已消费的字节数，用于在出错时报告记录的起始偏移
    position: u64,
}

impl Decoder {
    pub fn new(max_record_size: usize) -> Self {
        Decoder {
            buf: Vec::new(),
            max_record_size,
            position: 0,
        }
    }

    /// Offset of the next record relative to where decoding started.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Decodes the next record. Returns `Ok(None)` on a clean end of stream,
    /// i.e. when the stream ends exactly on a record boundary.
    pub fn decode_from<R: Read>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<RecordRef<'_>>, QueueError> {
        let mut tag = [0u8; 1];
        // 尝试读取第一个字节来判断 EOF
        loop {
            match reader.read(&mut tag) {
                Ok(0) => return Ok(None), // Clean EOF
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(QueueError::Io(e)),
            }
        }

        match tag[0] {
            TAG_TOMBSTONE => {
                self.position += 1;
                Ok(Some(RecordRef::Tombstone))
            }
            TAG_VALUE => {
                let mut counted = CountingReader {
                    inner: reader,
                    count: 0,
                };
                let len = read_varint32(&mut counted)? as usize;

                // Prevent attacks with excessively large entries
                if len > self.max_record_size {
                    return Err(QueueError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "Record too large: {} bytes (limit {})",
                            len, self.max_record_size
                        ),
                    )));
                }

                self.buf.resize(len, 0);
                counted.read_exact(&mut self.buf)?;

                self.position += 1 + counted.count;
                Ok(Some(RecordRef::Value(&self.buf)))
            }
            unknown => Err(QueueError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown record tag: {:#04x}", unknown),
            ))),
        }
    }
}

struct CountingReader<'a, R: Read> {
    inner: &'a mut R,
    count: u64,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_value_layout() {
        let mut buf = Vec::new();
        let written = encode_value_to(b"abc", &mut buf).unwrap();

        assert_eq!(written, 5);
        assert_eq!(buf, vec![TAG_VALUE, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_tombstone_layout() {
        let mut buf = Vec::new();
        let written = Record::Tombstone.encode_to(&mut buf).unwrap();

        assert_eq!(written, 1);
        assert_eq!(buf, vec![TAG_TOMBSTONE]);
    }

    #[test]
    fn test_back_to_back_records_share_one_stream() {
        let mut buf = Vec::new();
        Record::Value(b"first".to_vec()).encode_to(&mut buf).unwrap();
        Record::Tombstone.encode_to(&mut buf).unwrap();
        Record::Value(vec![7u8; 300]).encode_to(&mut buf).unwrap();
        Record::Value(Vec::new()).encode_to(&mut buf).unwrap();
        let total = buf.len() as u64;

        let mut cursor = Cursor::new(buf);
        let mut decoder = Decoder::new(1024);

        assert_eq!(
            decoder.decode_from(&mut cursor).unwrap(),
            Some(RecordRef::Value(b"first"))
        );
        assert_eq!(decoder.position(), 7);
        assert_eq!(
            decoder.decode_from(&mut cursor).unwrap(),
            Some(RecordRef::Tombstone)
        );
        match decoder.decode_from(&mut cursor).unwrap() {
            Some(RecordRef::Value(payload)) => assert_eq!(payload, &[7u8; 300][..]),
            other => panic!("Expected value, got {:?}", other),
        }
        assert_eq!(
            decoder.decode_from(&mut cursor).unwrap(),
            Some(RecordRef::Value(&[]))
        );
        assert_eq!(decoder.decode_from(&mut cursor).unwrap(), None);
        assert_eq!(decoder.position(), total);
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = Vec::new();
        encode_value_to(b"payload", &mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        let mut cursor = Cursor::new(buf);
        let mut decoder = Decoder::new(1024);
        match decoder.decode_from(&mut cursor) {
            Err(QueueError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected UnexpectedEof, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag() {
        let mut cursor = Cursor::new(vec![0x7Eu8]);
        let mut decoder = Decoder::new(1024);
        match decoder.decode_from(&mut cursor) {
            Err(QueueError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            other => panic!("Expected InvalidData, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_record_rejected() {
        let mut buf = Vec::new();
        encode_value_to(&[0u8; 64], &mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let mut decoder = Decoder::new(16);
        let err = decoder.decode_from(&mut cursor).unwrap_err();
        assert!(err.to_string().contains("Record too large"));
    }
}
