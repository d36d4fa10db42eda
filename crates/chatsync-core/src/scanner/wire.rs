//! Low-level chatsync wire format parsing.
//!
//! ## Wire Format Overview
//!
//! A file starts with a 32-byte header:
//!
//! - the signature (`sCdB\x07` by default)
//! - a little-endian `u32` timestamp
//! - a little-endian `u32` size of the block area that follows
//! - 19 bytes of padding, normally all zero
//!
//! The block area is a sequence of blocks. Each block has a 16-byte header
//! (`u32` data size, `u32` unknown, `u32` type, 4 bytes of zero padding)
//! followed by its data. Depending on the type the data is a sequence of
//! records, fixed 16-byte entries, or messages. A message has a 20-byte
//! header (`u32` id, unknown, timestamp, unknown, data size) followed by
//! records.
//!
//! A record is the byte `A`, a non-zero byte when fields follow, then fields
//! up to and including an end-of-record field. A field is a type byte, a
//! varint code and a value whose encoding depends on the type.
//!
//! Varints carry 7 bits per byte, least significant group first.

use crate::error::ScanStop;
use bytes::BufMut;
use thiserror::Error;

/// Signature the client writes at the start of every file
pub const DEFAULT_SIGNATURE: &[u8] = b"sCdB\x07";

/// Header bytes following the signature: timestamp, data size, padding
pub const HEADER_TAIL_LEN: usize = 4 + 4 + HEADER_PADDING_LEN;

/// Padding at the end of the file header
pub const HEADER_PADDING_LEN: usize = 19;

/// Size of a block header
pub const BLOCK_HEADER_LEN: usize = 16;

/// Size of a message header
pub const MESSAGE_HEADER_LEN: usize = 20;

/// Size of one entry in an entry block
pub const ENTRY_LEN: usize = 16;

/// First byte of every record
pub const RECORD_MARKER: u8 = b'A';

/// Varints are at most 10 bytes for a 64-bit value
pub const MAX_VARINT_LEN: usize = 10;

/// Failure to decode a varint
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarintError {
    /// Input ended while the continuation bit was still set
    #[error("varint cut off after {0} bytes")]
    Incomplete(usize),
    /// More than ten bytes with the continuation bit set
    #[error("varint longer than {MAX_VARINT_LEN} bytes")]
    Overlong,
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(VarintError::Overlong);
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(VarintError::Incomplete(data.len()))
}

/// Decode a varint at `offset`, mapping failures to a [`ScanStop`]
pub fn read_varint(data: &[u8], offset: usize) -> Result<(u64, usize), ScanStop> {
    decode_varint(data).map_err(|e| match e {
        VarintError::Incomplete(read) => ScanStop::Truncated {
            offset,
            needed: read + 1,
            available: data.len(),
        },
        VarintError::Overlong => ScanStop::MalformedLength { offset },
    })
}

/// Encode a varint into the buffer
pub fn encode_varint(mut value: u64, buf: &mut impl BufMut) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Number of bytes [`encode_varint`] writes for the value
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

fn le_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Fixed-size file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Unix timestamp stored in the header
    pub timestamp: u32,
    /// Declared size of the block area
    pub data_size: u32,
    /// Whether the padding bytes were all zero
    pub padding_clean: bool,
}

impl FileHeader {
    /// Decode the header fields that follow the signature.
    ///
    /// Returns `None` if fewer than [`HEADER_TAIL_LEN`] bytes are available.
    pub fn decode(tail: &[u8]) -> Option<Self> {
        let tail = tail.get(..HEADER_TAIL_LEN)?;
        Some(Self {
            timestamp: le_u32(tail, 0)?,
            data_size: le_u32(tail, 4)?,
            padding_clean: tail[8..].iter().all(|&b| b == 0),
        })
    }

    /// Encode the header fields that follow the signature
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(self.data_size);
        buf.put_bytes(0, HEADER_PADDING_LEN);
    }
}

/// Header in front of every block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Size of the block data
    pub data_size: u32,
    /// Unknown word
    pub x: u32,
    /// Block type
    pub block_type: u32,
    /// Whether the padding bytes were all zero
    pub padding_clean: bool,
}

impl BlockHeader {
    /// Decode a block header; `None` if fewer than [`BLOCK_HEADER_LEN`] bytes
    pub fn decode(data: &[u8]) -> Option<Self> {
        let data = data.get(..BLOCK_HEADER_LEN)?;
        Some(Self {
            data_size: le_u32(data, 0)?,
            x: le_u32(data, 4)?,
            block_type: le_u32(data, 8)?,
            padding_clean: data[12..].iter().all(|&b| b == 0),
        })
    }

    /// Encode the header with zero padding
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.data_size);
        buf.put_u32_le(self.x);
        buf.put_u32_le(self.block_type);
        buf.put_bytes(0, 4);
    }
}

/// Header in front of every message of a message block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Message id
    pub id: u32,
    /// Unknown word
    pub x: u32,
    /// Unix timestamp of the message
    pub timestamp: u32,
    /// Unknown word
    pub y: u32,
    /// Size of the records that follow
    pub data_size: u32,
}

impl MessageHeader {
    /// Decode a message header; `None` if fewer than [`MESSAGE_HEADER_LEN`] bytes
    pub fn decode(data: &[u8]) -> Option<Self> {
        Some(Self {
            id: le_u32(data, 0)?,
            x: le_u32(data, 4)?,
            timestamp: le_u32(data, 8)?,
            y: le_u32(data, 12)?,
            data_size: le_u32(data, 16)?,
        })
    }

    /// Encode the header
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.id);
        buf.put_u32_le(self.x);
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(self.y);
        buf.put_u32_le(self.data_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_varint_single_byte() {
        let data = [0x08];
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, 8);
        assert_eq!(len, 1);
    }

    #[test]
    fn test_decode_varint_multi_byte() {
        let data = [0xAC, 0x02]; // 300
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, 300);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_decode_varint_errors() {
        assert_eq!(decode_varint(&[0x80, 0x80]), Err(VarintError::Incomplete(2)));
        assert_eq!(decode_varint(&[]), Err(VarintError::Incomplete(0)));
        assert_eq!(decode_varint(&[0xFF; 11]), Err(VarintError::Overlong));
    }

    #[test]
    fn test_read_varint_stops() {
        assert_eq!(read_varint(&[0x05, 0xFF], 9), Ok((5, 1)));
        assert!(matches!(
            read_varint(&[0x80], 9),
            Err(ScanStop::Truncated { offset: 9, .. })
        ));
        assert_eq!(
            read_varint(&[0xFF; 12], 3),
            Err(ScanStop::MalformedLength { offset: 3 })
        );
    }

    #[test]
    fn test_encode_varint_matches_decode() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            assert_eq!(buf.len(), varint_len(value), "length of {}", value);
            assert_eq!(decode_varint(&buf).unwrap(), (value, buf.len()));
        }
    }

    #[test]
    fn test_file_header_layout() {
        let header = FileHeader {
            timestamp: 1_400_000_000,
            data_size: 77,
            padding_clean: true,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_TAIL_LEN);
        assert_eq!(&buf[4..8], &[77, 0, 0, 0]);
        assert_eq!(FileHeader::decode(&buf), Some(header));
        assert_eq!(FileHeader::decode(&buf[..10]), None);
    }

    #[test]
    fn test_dirty_padding_detected() {
        let mut buf = vec![0u8; HEADER_TAIL_LEN];
        buf[HEADER_TAIL_LEN - 1] = 1;
        assert!(!FileHeader::decode(&buf).unwrap().padding_clean);

        let mut block = vec![0u8; BLOCK_HEADER_LEN];
        block[8] = 6;
        block[15] = 0xAA;
        let header = BlockHeader::decode(&block).unwrap();
        assert_eq!(header.block_type, 6);
        assert!(!header.padding_clean);
    }

    #[test]
    fn test_block_header_layout() {
        let bytes = [
            0x1B, 0, 0, 0, // data size 27
            0x02, 0, 0, 0, // x
            0x01, 0, 0, 0, // type 1
            0, 0, 0, 0,
        ];
        let header = BlockHeader::decode(&bytes).unwrap();
        assert_eq!(
            header,
            BlockHeader {
                data_size: 27,
                x: 2,
                block_type: 1,
                padding_clean: true
            }
        );
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf, bytes);
        assert_eq!(BlockHeader::decode(&bytes[..15]), None);
    }

    #[test]
    fn test_message_header_layout() {
        let header = MessageHeader {
            id: 1,
            x: 2,
            timestamp: 1_420_070_460,
            y: 4,
            data_size: 5,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), MESSAGE_HEADER_LEN);
        assert_eq!(&buf[8..12], &1_420_070_460u32.to_le_bytes());
        assert_eq!(MessageHeader::decode(&buf), Some(header));
        assert_eq!(MessageHeader::decode(&buf[..19]), None);
    }
}
