use crate::index::{self, Index, IndexError};
use crate::sector::{self, Sector, SectorError};
use std::cmp;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace};

const DATA_FILE: &str = "main_file_cache.dat2";
const INDEX_FILE_PREFIX: &str = "main_file_cache.idx";

/// Highest number of type index files a store can carry.
const MAX_TYPES: usize = 254;

/// The reserved type addressing the meta index file (`idx255`).
pub const META_TYPE: u8 = 255;

#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("cache files not found in {0}")]
    CacheNotFound(String),
    #[error("no index file for type {0}")]
    NoSuchType(u8),
    #[error("file {1} not present in index {0}")]
    NotFound(u8, u32),
    #[error("sector {sector} of file ({typ}, {id}) has a mismatched header")]
    SectorMismatch { typ: u8, id: u32, sector: u32 },
    #[error("sector error: {0}")]
    Sector(#[from] SectorError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A sector-chained virtual filesystem over one data file and a set of
/// index files.
///
/// Each index file maps file ids of one type to `{size, first sector}`
/// pairs; the data file holds the actual bytes in chains of fixed
/// 520-byte sectors. The meta index (type 255) addresses the reference
/// tables of the other types.
pub struct FileStore {
    data: File,
    indexes: Vec<File>,
    meta: File,
}

impl FileStore {
    /// Opens the store rooted at `root`.
    ///
    /// `main_file_cache.dat2` and `main_file_cache.idx255` are required;
    /// type index files `idx0..idx253` are probed in order and the scan
    /// stops at the first missing one.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<FileStore, FileStoreError> {
        let root = root.as_ref();

        let data_path = root.join(DATA_FILE);
        if !data_path.exists() {
            return Err(FileStoreError::CacheNotFound(root.display().to_string()));
        }
        let data = open_rw(&data_path)?;

        let mut indexes = Vec::new();
        for i in 0..MAX_TYPES {
            let path = root.join(format!("{INDEX_FILE_PREFIX}{i}"));
            if !path.exists() {
                break;
            }
            indexes.push(open_rw(&path)?);
        }

        let meta_path = root.join(format!("{INDEX_FILE_PREFIX}{META_TYPE}"));
        if !meta_path.exists() {
            return Err(FileStoreError::CacheNotFound(root.display().to_string()));
        }
        let meta = open_rw(&meta_path)?;

        debug!(root = %root.display(), types = indexes.len(), "opened file store");
        Ok(FileStore {
            data,
            indexes,
            meta,
        })
    }

    /// Number of non-meta index files opened.
    pub fn type_count(&self) -> usize {
        self.indexes.len()
    }

    /// Number of index entries in the index file for `typ`.
    pub fn file_count(&self, typ: u8) -> Result<u32, FileStoreError> {
        let index = self.index_file_ref(typ)?;
        Ok((index.metadata()?.len() / index::SIZE as u64) as u32)
    }

    /// Reads the file stored under `(typ, id)` by walking its sector chain.
    pub fn read(&mut self, typ: u8, id: u32) -> Result<Vec<u8>, FileStoreError> {
        let index = {
            let index_file = self.index_file(typ)?;
            let pos = id as u64 * index::SIZE as u64;
            if pos + index::SIZE as u64 > index_file.metadata()?.len() {
                return Err(FileStoreError::NotFound(typ, id));
            }

            let mut buf = [0; index::SIZE];
            read_exact_at(index_file, pos, &mut buf)?;
            Index::decode(&buf)?
        };

        let mut data = Vec::with_capacity(index.size as usize);
        let mut remaining = index.size as usize;
        let mut chunk = 0u16;
        let mut ptr = index.sector as u64 * sector::SIZE as u64;

        loop {
            let mut buf = [0; sector::SIZE];
            read_exact_at(&mut self.data, ptr, &mut buf)?;
            let s = Sector::decode(&buf)?;

            if s.id != id as u16 || s.typ != typ || s.chunk != chunk {
                return Err(FileStoreError::SectorMismatch {
                    typ,
                    id,
                    sector: (ptr / sector::SIZE as u64) as u32,
                });
            }

            let len = cmp::min(remaining, sector::DATA_SIZE);
            data.extend_from_slice(&s.data[..len]);
            remaining -= len;

            if remaining == 0 {
                break;
            }

            ptr = s.next_sector as u64 * sector::SIZE as u64;
            chunk += 1;
        }

        trace!(typ, id, len = data.len(), "read file");
        Ok(data)
    }

    /// Writes `data` under `(typ, id)`.
    ///
    /// An existing sector chain is overwritten in place where its headers
    /// still match; any inconsistency along the old chain abandons the
    /// overwrite and retries once with a fresh chain appended to the end of
    /// the data file.
    pub fn write(&mut self, typ: u8, id: u32, data: &[u8]) -> Result<(), FileStoreError> {
        self.index_file(typ)?;

        if !self.write_inner(typ, id, data, true)? {
            trace!(typ, id, "overwrite inconsistent, appending new chain");
            self.write_inner(typ, id, data, false)?;
        }

        trace!(typ, id, len = data.len(), "wrote file");
        Ok(())
    }

    /// Consumes the store, releasing all file handles.
    pub fn close(self) {}

    fn write_inner(
        &mut self,
        typ: u8,
        id: u32,
        data: &[u8],
        mut overwrite: bool,
    ) -> Result<bool, FileStoreError> {
        let index_pos = id as u64 * index::SIZE as u64;

        let mut next_sector;
        if overwrite {
            let sector_count = self.sector_count()?;
            let index_file = self.index_file(typ)?;
            if index_pos + index::SIZE as u64 > index_file.metadata()?.len() {
                return Ok(false);
            }

            let mut buf = [0; index::SIZE];
            read_exact_at(index_file, index_pos, &mut buf)?;
            next_sector = Index::decode(&buf)?.sector;

            if next_sector == 0 || next_sector as u64 > sector_count {
                return Ok(false);
            }
        } else {
            next_sector = self.append_sector()?;
        }

        let index = Index {
            size: data.len() as u32,
            sector: next_sector,
        };
        write_all_at(self.index_file(typ)?, index_pos, &index.encode())?;

        let mut chunk = 0u16;
        let mut pos = 0;
        loop {
            let cur_sector = next_sector;
            let ptr = cur_sector as u64 * sector::SIZE as u64;
            next_sector = 0;

            if overwrite {
                let mut buf = [0; sector::SIZE];
                read_exact_at(&mut self.data, ptr, &mut buf)?;
                let s = Sector::decode(&buf)?;

                if s.typ != typ || s.id != id as u16 || s.chunk != chunk {
                    return Ok(false);
                }

                next_sector = s.next_sector;
                if next_sector as u64 > self.sector_count()? {
                    return Ok(false);
                }
            }

            if next_sector == 0 {
                // The old chain ran out; everything from here on is
                // appended at the end of the data file.
                overwrite = false;
                next_sector = self.append_sector()?;
                if next_sector == cur_sector {
                    next_sector += 1;
                }
            }

            let remaining = data.len() - pos;
            let len = cmp::min(remaining, sector::DATA_SIZE);
            if remaining <= sector::DATA_SIZE {
                next_sector = 0;
            }

            let mut payload = [0; sector::DATA_SIZE];
            payload[..len].copy_from_slice(&data[pos..pos + len]);

            let s = Sector {
                id: id as u16,
                chunk,
                next_sector,
                typ,
                data: payload,
            };
            write_all_at(&mut self.data, ptr, &s.encode())?;

            pos += len;
            chunk += 1;
            if pos >= data.len() {
                break;
            }
        }

        Ok(true)
    }

    /// Number of whole sectors currently in the data file.
    fn sector_count(&self) -> Result<u64, FileStoreError> {
        Ok(self.data.metadata()?.len() / sector::SIZE as u64)
    }

    /// Number of the first free sector at the end of the data file.
    ///
    /// Sector 0 is never allocated; an empty data file starts at sector 1.
    fn append_sector(&self) -> Result<u32, FileStoreError> {
        let len = self.data.metadata()?.len();
        let sector = (len + sector::SIZE as u64 - 1) / sector::SIZE as u64;
        Ok(cmp::max(sector, 1) as u32)
    }

    fn index_file(&mut self, typ: u8) -> Result<&mut File, FileStoreError> {
        if typ == META_TYPE {
            Ok(&mut self.meta)
        } else {
            self.indexes
                .get_mut(typ as usize)
                .ok_or(FileStoreError::NoSuchType(typ))
        }
    }

    fn index_file_ref(&self, typ: u8) -> Result<&File, FileStoreError> {
        if typ == META_TYPE {
            Ok(&self.meta)
        } else {
            self.indexes
                .get(typ as usize)
                .ok_or(FileStoreError::NoSuchType(typ))
        }
    }
}

fn open_rw(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

fn read_exact_at(file: &mut File, pos: u64, buf: &mut [u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(buf)
}

fn write_all_at(file: &mut File, pos: u64, buf: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.write_all(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scratch_store(types: usize) -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join(DATA_FILE)).unwrap();
        for i in 0..types {
            File::create(dir.path().join(format!("{INDEX_FILE_PREFIX}{i}"))).unwrap();
        }
        File::create(dir.path().join(format!("{INDEX_FILE_PREFIX}{META_TYPE}"))).unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_bare() {
        let (_dir, mut store) = scratch_store(0);
        assert_eq!(store.type_count(), 0);
        assert_eq!(store.file_count(META_TYPE).unwrap(), 0);
        assert!(matches!(
            store.read(META_TYPE, 0),
            Err(FileStoreError::NotFound(META_TYPE, 0))
        ));
    }

    #[test]
    fn test_open_missing_files() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            FileStore::open(dir.path()),
            Err(FileStoreError::CacheNotFound(_))
        ));

        File::create(dir.path().join(DATA_FILE)).unwrap();
        assert!(matches!(
            FileStore::open(dir.path()),
            Err(FileStoreError::CacheNotFound(_))
        ));

        File::create(dir.path().join(format!("{INDEX_FILE_PREFIX}{META_TYPE}"))).unwrap();
        assert!(FileStore::open(dir.path()).is_ok());
    }

    #[test]
    fn test_write_single_sector() {
        let (dir, mut store) = scratch_store(1);
        store.write(0, 0, &[0xAA, 0xBB, 0xCC]).unwrap();

        let index = fs::read(dir.path().join(format!("{INDEX_FILE_PREFIX}0"))).unwrap();
        assert_eq!(index, vec![0, 0, 3, 0, 0, 1]);

        let data = fs::read(dir.path().join(DATA_FILE)).unwrap();
        assert_eq!(data.len(), 2 * sector::SIZE);

        let s = Sector::decode(&data[sector::SIZE..]).unwrap();
        assert_eq!(s.id, 0);
        assert_eq!(s.chunk, 0);
        assert_eq!(s.next_sector, 0);
        assert_eq!(s.typ, 0);
        assert_eq!(&s.data[..3], &[0xAA, 0xBB, 0xCC]);
        assert!(s.data[3..].iter().all(|b| *b == 0));

        assert_eq!(store.read(0, 0).unwrap(), vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_write_two_sectors() {
        let (dir, mut store) = scratch_store(1);
        let payload: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        store.write(0, 7, &payload).unwrap();

        let data = fs::read(dir.path().join(DATA_FILE)).unwrap();
        let first = Sector::decode(&data[sector::SIZE..2 * sector::SIZE]).unwrap();
        let second = Sector::decode(&data[2 * sector::SIZE..3 * sector::SIZE]).unwrap();

        assert_eq!(first.id, 7);
        assert_eq!(first.chunk, 0);
        assert_eq!(first.next_sector, 2);
        assert_eq!(second.id, 7);
        assert_eq!(second.chunk, 1);
        assert_eq!(second.next_sector, 0);

        let mut joined = first.data.to_vec();
        joined.extend_from_slice(&second.data[..600 - sector::DATA_SIZE]);
        assert_eq!(joined, payload);

        assert_eq!(store.read(0, 7).unwrap(), payload);
    }

    #[test]
    fn test_full_sector_terminates_chain() {
        let (dir, mut store) = scratch_store(1);
        store.write(0, 0, &[0x11; sector::DATA_SIZE]).unwrap();

        let data = fs::read(dir.path().join(DATA_FILE)).unwrap();
        let s = Sector::decode(&data[sector::SIZE..2 * sector::SIZE]).unwrap();
        assert_eq!(s.next_sector, 0);

        assert_eq!(store.read(0, 0).unwrap(), vec![0x11; sector::DATA_SIZE]);
    }

    #[test]
    fn test_empty_entry() {
        let (_dir, mut store) = scratch_store(1);
        store.write(0, 3, &[]).unwrap();
        assert_eq!(store.read(0, 3).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_overwrite_in_place() {
        let (dir, mut store) = scratch_store(1);
        store.write(0, 0, &[0x01; 300]).unwrap();
        let len_before = fs::metadata(dir.path().join(DATA_FILE)).unwrap().len();

        store.write(0, 0, &[0x02; 280]).unwrap();
        let len_after = fs::metadata(dir.path().join(DATA_FILE)).unwrap().len();

        assert_eq!(len_before, len_after);
        assert_eq!(store.read(0, 0).unwrap(), vec![0x02; 280]);
    }

    #[test]
    fn test_overwrite_then_grow() {
        let (_dir, mut store) = scratch_store(1);
        store.write(0, 0, &[0x01; sector::DATA_SIZE]).unwrap();

        let grown: Vec<u8> = (0..600).map(|i| (i % 7) as u8).collect();
        store.write(0, 0, &grown).unwrap();
        assert_eq!(store.read(0, 0).unwrap(), grown);

        // The freshly extended chain must stay overwritable too.
        let shrunk = vec![0x05; 550];
        store.write(0, 0, &shrunk).unwrap();
        assert_eq!(store.read(0, 0).unwrap(), shrunk);
    }

    #[test]
    fn test_interleaved_files() {
        let (_dir, mut store) = scratch_store(2);
        let a: Vec<u8> = (0..1200).map(|i| (i % 13) as u8).collect();
        let b: Vec<u8> = (0..900).map(|i| (i % 17) as u8).collect();

        store.write(0, 0, &a).unwrap();
        store.write(1, 0, &b).unwrap();
        store.write(0, 1, &[0xEE; 100]).unwrap();

        assert_eq!(store.read(0, 0).unwrap(), a);
        assert_eq!(store.read(1, 0).unwrap(), b);
        assert_eq!(store.read(0, 1).unwrap(), vec![0xEE; 100]);
    }

    #[test]
    fn test_meta_type_round_trip() {
        let (_dir, mut store) = scratch_store(1);
        store.write(META_TYPE, 0, &[0xDE, 0xAD]).unwrap();
        assert_eq!(store.read(META_TYPE, 0).unwrap(), vec![0xDE, 0xAD]);
        assert_eq!(store.file_count(META_TYPE).unwrap(), 1);
    }

    #[test]
    fn test_no_such_type() {
        let (_dir, mut store) = scratch_store(1);
        assert!(matches!(
            store.read(1, 0),
            Err(FileStoreError::NoSuchType(1))
        ));
        assert!(matches!(
            store.write(1, 0, &[0x00]),
            Err(FileStoreError::NoSuchType(1))
        ));
        assert!(matches!(
            store.file_count(9),
            Err(FileStoreError::NoSuchType(9))
        ));
    }

    #[test]
    fn test_corrupt_chain() {
        let (dir, mut store) = scratch_store(1);
        store.write(0, 0, &[0x55; 40]).unwrap();
        store.close();

        // Flip the stored id so the header no longer matches the chain.
        let path = dir.path().join(DATA_FILE);
        let mut data = fs::read(&path).unwrap();
        data[sector::SIZE + 1] = 9;
        fs::write(&path, &data).unwrap();

        let mut store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.read(0, 0),
            Err(FileStoreError::SectorMismatch { typ: 0, id: 0, .. })
        ));
    }

    #[test]
    fn test_corrupt_chain_falls_back_to_append() {
        let (dir, mut store) = scratch_store(1);
        store.write(0, 0, &[0x55; 40]).unwrap();
        store.close();

        let path = dir.path().join(DATA_FILE);
        let mut data = fs::read(&path).unwrap();
        data[sector::SIZE + 1] = 9;
        fs::write(&path, &data).unwrap();

        // The overwrite sees the bad header and appends a new chain instead.
        let mut store = FileStore::open(dir.path()).unwrap();
        store.write(0, 0, &[0x77; 40]).unwrap();
        assert_eq!(store.read(0, 0).unwrap(), vec![0x77; 40]);

        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(len, 3 * sector::SIZE as u64);
    }
}
