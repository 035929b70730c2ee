use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive data truncated")]
    Truncated,
    #[error("archive slot {0} is empty")]
    SlotEmpty(usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// An ordered bundle of member files packed into a single container
/// payload.
///
/// On the wire the member data comes first, laid out chunk by chunk, then a
/// delta-encoded table of per-chunk member sizes, then a final byte holding
/// the chunk count. Multi-chunk archives are decoded but never produced;
/// the encoder always emits a single chunk.
pub struct Archive {
    entries: Vec<Option<Vec<u8>>>,
}

impl Archive {
    /// Creates an archive with `size` empty slots.
    pub fn new(size: usize) -> Archive {
        Archive {
            entries: vec![None; size],
        }
    }

    /// Number of member slots, filled or not.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: usize) -> Option<&[u8]> {
        self.entries.get(id).and_then(|e| e.as_deref())
    }

    /// Fills slot `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside the archive's capacity.
    pub fn put(&mut self, id: usize, data: Vec<u8>) {
        self.entries[id] = Some(data);
    }

    /// Decodes an archive known to hold `size` members.
    pub fn decode(buf: &[u8], size: usize) -> Result<Archive, ArchiveError> {
        let chunks = *buf.last().ok_or(ArchiveError::Truncated)? as usize;

        let table_len = chunks * size * 4;
        if buf.len() < table_len + 1 {
            return Err(ArchiveError::Truncated);
        }
        let table_start = buf.len() - 1 - table_len;

        // First pass over the size table: per-(chunk, member) lengths are
        // delta-encoded, with the running length reset for every chunk.
        let mut r = &buf[table_start..buf.len() - 1];
        let mut chunk_sizes = vec![vec![0usize; size]; chunks];
        let mut sizes = vec![0usize; size];
        for chunk_row in chunk_sizes.iter_mut() {
            let mut len = 0i32;
            for (id, slot) in chunk_row.iter_mut().enumerate() {
                len = len
                    .checked_add(r.read_i32::<BigEndian>()?)
                    .ok_or(ArchiveError::Truncated)?;
                if len < 0 {
                    return Err(ArchiveError::Truncated);
                }
                *slot = len as usize;
                sizes[id] += len as usize;
            }
        }

        // Second pass: copy member data in the same nested order.
        let mut entries: Vec<Vec<u8>> = sizes.iter().map(|s| Vec::with_capacity(*s)).collect();
        let mut pos = 0;
        for chunk_row in &chunk_sizes {
            for (id, len) in chunk_row.iter().enumerate() {
                let end = pos + len;
                if end > table_start {
                    return Err(ArchiveError::Truncated);
                }
                entries[id].extend_from_slice(&buf[pos..end]);
                pos = end;
            }
        }

        Ok(Archive {
            entries: entries.into_iter().map(Some).collect(),
        })
    }

    /// Encodes the archive as a single-chunk stream.
    ///
    /// Every slot must be filled; the cache write path fills gaps with
    /// one-byte placeholders before encoding.
    pub fn encode(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut members = Vec::with_capacity(self.entries.len());
        for (id, entry) in self.entries.iter().enumerate() {
            members.push(entry.as_deref().ok_or(ArchiveError::SlotEmpty(id))?);
        }

        let mut buf = Vec::new();
        for member in &members {
            buf.extend_from_slice(member);
        }

        let mut prev = 0i32;
        for member in &members {
            let len = member.len() as i32;
            buf.write_i32::<BigEndian>(len - prev)?;
            prev = len;
        }
        buf.write_u8(1)?;

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_literal() {
        let mut archive = Archive::new(3);
        archive.put(0, vec![0x01]);
        archive.put(1, vec![0x02, 0x03]);
        archive.put(2, vec![0x04, 0x05, 0x06]);

        let buf = archive.encode().unwrap();
        assert_eq!(*buf.last().unwrap(), 0x01);

        // Deltas between consecutive member sizes: 1, 1, 1.
        let deltas = &buf[buf.len() - 13..buf.len() - 1];
        assert_eq!(
            deltas,
            &[0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1]
        );
        assert_eq!(&buf[..6], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn test_round_trip() {
        let mut archive = Archive::new(3);
        archive.put(0, vec![0x01]);
        archive.put(1, vec![0x02, 0x03]);
        archive.put(2, vec![0x04, 0x05, 0x06]);

        let decoded = Archive::decode(&archive.encode().unwrap(), 3).unwrap();
        assert_eq!(decoded.get(0), Some(&[0x01][..]));
        assert_eq!(decoded.get(1), Some(&[0x02, 0x03][..]));
        assert_eq!(decoded.get(2), Some(&[0x04, 0x05, 0x06][..]));
    }

    #[test]
    fn test_single_member() {
        let mut archive = Archive::new(1);
        archive.put(0, vec![0xAB; 1000]);

        let decoded = Archive::decode(&archive.encode().unwrap(), 1).unwrap();
        assert_eq!(decoded.get(0), Some(&[0xAB; 1000][..]));
    }

    #[test]
    fn test_empty_member() {
        let mut archive = Archive::new(2);
        archive.put(0, Vec::new());
        archive.put(1, vec![0x42]);

        let decoded = Archive::decode(&archive.encode().unwrap(), 2).unwrap();
        assert_eq!(decoded.get(0), Some(&[][..]));
        assert_eq!(decoded.get(1), Some(&[0x42][..]));
    }

    #[test]
    fn test_decode_two_chunks() {
        // Two members split over two chunks:
        // chunk 0: [0xAA] and [0x01, 0x02]; chunk 1: [0xBB] and [].
        let buf = vec![
            0xAA, 0x01, 0x02, 0xBB, // member data
            0, 0, 0, 1, 0, 0, 0, 1, // chunk 0 deltas: 1, +1
            0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF, // chunk 1 deltas: 1, -1
            2, // chunk count
        ];

        let decoded = Archive::decode(&buf, 2).unwrap();
        assert_eq!(decoded.get(0), Some(&[0xAA, 0xBB][..]));
        assert_eq!(decoded.get(1), Some(&[0x01, 0x02][..]));
    }

    #[test]
    fn test_encode_empty_slot() {
        let archive = Archive::new(2);
        assert!(matches!(archive.encode(), Err(ArchiveError::SlotEmpty(0))));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(Archive::decode(&[], 1), Err(ArchiveError::Truncated)));
        assert!(matches!(
            Archive::decode(&[1], 1),
            Err(ArchiveError::Truncated)
        ));
    }
}
