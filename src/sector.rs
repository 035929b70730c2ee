use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// Size of the sector header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Size of the sector payload in bytes.
pub const DATA_SIZE: usize = 512;

/// Total size of an on-disk sector in bytes.
pub const SIZE: usize = HEADER_SIZE + DATA_SIZE;

#[derive(Error, Debug)]
pub enum SectorError {
    #[error("malformed sector: expected {SIZE} bytes, got {0}")]
    Malformed(usize),
}

/// One fixed 520-byte frame in the data file.
///
/// The header carries the owning file id, the 0-based position of this
/// sector within its chain, the number of the next sector (0 marks the end
/// of the chain) and the index type the file belongs to. Tail sectors are
/// zero-padded up to [`DATA_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector {
    pub id: u16,
    pub chunk: u16,
    pub next_sector: u32,
    pub typ: u8,
    pub data: [u8; DATA_SIZE],
}

impl Sector {
    pub fn decode(buf: &[u8]) -> Result<Sector, SectorError> {
        if buf.len() != SIZE {
            return Err(SectorError::Malformed(buf.len()));
        }

        let mut data = [0; DATA_SIZE];
        data.copy_from_slice(&buf[HEADER_SIZE..]);

        Ok(Sector {
            id: BigEndian::read_u16(&buf[0..2]),
            chunk: BigEndian::read_u16(&buf[2..4]),
            next_sector: BigEndian::read_u24(&buf[4..7]),
            typ: buf[7],
            data,
        })
    }

    pub fn encode(&self) -> [u8; SIZE] {
        let mut buf = [0; SIZE];
        BigEndian::write_u16(&mut buf[0..2], self.id);
        BigEndian::write_u16(&mut buf[2..4], self.chunk);
        BigEndian::write_u24(&mut buf[4..7], self.next_sector & 0xff_ffff);
        buf[7] = self.typ;
        buf[HEADER_SIZE..].copy_from_slice(&self.data);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut data = [0; DATA_SIZE];
        data[..3].copy_from_slice(&[0xAA, 0xBB, 0xCC]);

        let sector = Sector {
            id: 7,
            chunk: 2,
            next_sector: 0x123456,
            typ: 5,
            data,
        };

        let encoded = sector.encode();
        assert_eq!(sector, Sector::decode(&encoded).unwrap());
    }

    #[test]
    fn test_decode_literal() {
        let mut buf = vec![0x00, 0x07, 0x00, 0x01, 0x00, 0x00, 0x02, 0x00];
        buf.resize(SIZE, 0);

        let sector = Sector::decode(&buf).unwrap();
        assert_eq!(sector.id, 7);
        assert_eq!(sector.chunk, 1);
        assert_eq!(sector.next_sector, 2);
        assert_eq!(sector.typ, 0);
        assert_eq!(buf, sector.encode().to_vec());
    }

    #[test]
    fn test_malformed_length() {
        assert!(matches!(
            Sector::decode(&[0; SIZE - 1]),
            Err(SectorError::Malformed(519))
        ));
        assert!(matches!(
            Sector::decode(&[0; SIZE + 1]),
            Err(SectorError::Malformed(521))
        ));
    }
}
