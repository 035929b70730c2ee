use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// Size of an on-disk index entry in bytes.
pub const SIZE: usize = 6;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("malformed index: expected {SIZE} bytes, got {0}")]
    Malformed(usize),
}

/// A 6-byte index entry: the size of a stored file and the number of the
/// first sector of its chain. Stored at offset `id * 6` in the index file
/// for its type. Both fields are unsigned 24-bit big-endian values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Index {
    pub size: u32,
    pub sector: u32,
}

impl Index {
    pub fn decode(buf: &[u8]) -> Result<Index, IndexError> {
        if buf.len() != SIZE {
            return Err(IndexError::Malformed(buf.len()));
        }

        Ok(Index {
            size: BigEndian::read_u24(&buf[0..3]),
            sector: BigEndian::read_u24(&buf[3..6]),
        })
    }

    pub fn encode(&self) -> [u8; SIZE] {
        let mut buf = [0; SIZE];
        BigEndian::write_u24(&mut buf[0..3], self.size & 0xff_ffff);
        BigEndian::write_u24(&mut buf[3..6], self.sector & 0xff_ffff);
        buf
    }
}
