use std::io::{self, Read, Write};

use byteorder::ReadBytesExt;

use crate::error::QueueError;

/// Largest encoding of a u32 in LEB128 form.
pub const MAX_VARINT32_LEN: usize = 5;

/// Writes `n` as a LEB128 varint. Returns the number of bytes written.
pub fn write_varint32<W: Write>(writer: &mut W, n: u32) -> io::Result<usize> {
    let mut buf = [0u8; MAX_VARINT32_LEN];
    let len = encode_varint32(n, &mut buf);
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Encodes `n` into `buf`, returning the number of bytes used.
pub fn encode_varint32(n: u32, buf: &mut [u8; MAX_VARINT32_LEN]) -> usize {
    let mut n = n;
    let mut counter = 0;
    loop {
        let mut b = (n & 0x7F) as u8;
        n >>= 7;
        if n != 0 {
            b |= 0x80;
        }
        buf[counter] = b;
        counter += 1;
        if n == 0 {
            return counter;
        }
    }
}

/// Decodes a u32 varint. An encoding longer than five bytes, or one whose
/// value overflows u32, is rejected.
pub fn read_varint32<R: Read>(reader: &mut R) -> Result<u32, QueueError> {
    let mut result = 0u64;
    let mut shift = 0;
    loop {
        if shift > 28 {
            return Err(QueueError::VarintDecodeError);
        }
        let byte = reader.read_u8()?;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return u32::try_from(result).map_err(|_| QueueError::VarintDecodeError);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_varint_known_encodings() {
        let mut buf = [0u8; MAX_VARINT32_LEN];

        assert_eq!(encode_varint32(50, &mut buf), 1);
        assert_eq!(buf[0], 50);

        // 300 = 0b1_0010_1100 -> [0xAC, 0x02]
        assert_eq!(encode_varint32(300, &mut buf), 2);
        assert_eq!(&buf[..2], &[0xAC, 0x02]);

        assert_eq!(encode_varint32(u32::MAX, &mut buf), 5);
    }

    #[test]
    fn test_varint_read_back() {
        let mut out = Vec::new();
        write_varint32(&mut out, 300).unwrap();
        write_varint32(&mut out, u32::MAX).unwrap();

        let mut cursor = Cursor::new(out);
        assert_eq!(read_varint32(&mut cursor).unwrap(), 300);
        assert_eq!(read_varint32(&mut cursor).unwrap(), u32::MAX);
    }

    #[test]
    fn test_varint_overlong_rejected() {
        let mut cursor = Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        match read_varint32(&mut cursor) {
            Err(QueueError::VarintDecodeError) => (),
            other => panic!("Expected VarintDecodeError, got {:?}", other),
        }
    }

    #[test]
    fn test_varint_eof() {
        let mut cursor = Cursor::new(vec![0x80]);
        match read_varint32(&mut cursor) {
            Err(QueueError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected EOF error, got {:?}", other),
        }
    }
}
