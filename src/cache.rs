use crate::archive::{Archive, ArchiveError};
use crate::checksum_table::{self, ChecksumTable};
use crate::container::{Compression, Container, ContainerError};
use crate::digest::whirlpool_digest;
use crate::djb2::djb2_hash;
use crate::file_store::{FileStore, FileStoreError, META_TYPE};
use crate::reference_table::{ReferenceTable, ReferenceTableError, FLAG_WHIRLPOOL};
use std::path::Path;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("type 255 is reserved for the low level file store API")]
    ReservedType,
    #[error("member {member} not present in file ({typ}, {file})")]
    MemberNotFound { typ: u8, file: u32, member: u32 },
    #[error("no file named {name:?} in type {typ}")]
    NameNotFound { typ: u8, name: String },
    #[error("store error: {0}")]
    Store(#[from] FileStoreError),
    #[error("container error: {0}")]
    Container(#[from] ContainerError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("reference table error: {0}")]
    ReferenceTable(#[from] ReferenceTableError),
}

/// High-level façade over a [`FileStore`].
///
/// The cache keeps the reference table of each type in sync with the
/// payloads written below it: every write recomputes the entry's CRC (and
/// whirlpool digest where the table carries one), bumps versions, and
/// persists the table back to the meta index before the payload itself.
///
/// Type 255 is the reference-table plumbing and is rejected here; go
/// through [`Cache::store`] for low-level access to it.
pub struct Cache {
    store: FileStore,
}

impl Cache {
    /// Opens the cache rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Cache, CacheError> {
        Ok(Cache {
            store: FileStore::open(root)?,
        })
    }

    /// Wraps an already opened store.
    pub fn with_store(store: FileStore) -> Cache {
        Cache { store }
    }

    /// The underlying store, for low-level access (including type 255).
    pub fn store(&mut self) -> &mut FileStore {
        &mut self.store
    }

    pub fn type_count(&self) -> usize {
        self.store.type_count()
    }

    pub fn file_count(&self, typ: u8) -> Result<u32, CacheError> {
        Ok(self.store.file_count(typ)?)
    }

    /// Reads and decodes the container stored under `(typ, file)`.
    pub fn read(&mut self, typ: u8, file: u32) -> Result<Container, CacheError> {
        check_type(typ)?;
        Ok(Container::decode(&self.store.read(typ, file)?)?)
    }

    /// Encodes `container` under `(typ, file)` and updates the type's
    /// reference table to match.
    ///
    /// The container's version is bumped by one before encoding (an
    /// unversioned container becomes version 0). The table entry for
    /// `file` receives that version and the CRC32 of the encoded bytes
    /// minus the 2-byte version trailer; if the table carries
    /// [`FLAG_WHIRLPOOL`] the digest over the same bytes is stored too.
    /// Finally the table's own version is bumped and the re-encoded table
    /// is written to the meta index, followed by the payload.
    pub fn write(&mut self, typ: u8, file: u32, mut container: Container) -> Result<(), CacheError> {
        check_type(typ)?;

        let version = container.version().map_or(0, |v| v + 1);
        container.set_version(version);

        let table_container = Container::decode(&self.store.read(META_TYPE, typ as u32)?)?;
        let mut table = ReferenceTable::decode(table_container.data())?;

        self.commit(typ, file, &container, table_container.compression(), &mut table)?;

        trace!(typ, file, version, "wrote container");
        Ok(())
    }

    /// Persists `container` under `(typ, file)` as-is and syncs `table`:
    /// the entry for `file` receives the container's version and the
    /// digests over the version-excluded prefix, the table version is
    /// bumped, and the table goes to the meta index before the payload.
    fn commit(
        &mut self,
        typ: u8,
        file: u32,
        container: &Container,
        table_compression: Compression,
        table: &mut ReferenceTable,
    ) -> Result<(), CacheError> {
        let buf = container.encode()?;
        let body = if container.is_versioned() {
            &buf[..buf.len() - 2]
        } else {
            &buf[..]
        };

        let whirlpool = table.flags & FLAG_WHIRLPOOL != 0;
        let entry = table.entry_or_default(file);
        entry.version = container.version().unwrap_or(0);
        entry.crc = crc32fast::hash(body) as i32;
        if whirlpool {
            entry.whirlpool = whirlpool_digest(body);
        }

        table.version += 1;

        let table_container = Container::new(table_compression, table.encode()?);
        self.store.write(META_TYPE, typ as u32, &table_container.encode()?)?;
        self.store.write(typ, file, &buf)?;
        Ok(())
    }

    /// Reads the container for the file whose identifier matches the name
    /// hash of `name`.
    ///
    /// Only works on types whose reference table stores identifiers.
    pub fn read_named(&mut self, typ: u8, name: &str) -> Result<Container, CacheError> {
        check_type(typ)?;

        let table_container = Container::decode(&self.store.read(META_TYPE, typ as u32)?)?;
        let table = ReferenceTable::decode(table_container.data())?;

        let file = table
            .entry_id_for_identifier(djb2_hash(name))
            .ok_or_else(|| CacheError::NameNotFound {
                typ,
                name: name.to_string(),
            })?;
        self.read(typ, file)
    }

    /// Reads one member out of the archive stored under `(typ, file)`.
    pub fn read_member(&mut self, typ: u8, file: u32, member: u32) -> Result<Vec<u8>, CacheError> {
        check_type(typ)?;

        let container = self.read(typ, file)?;
        let table_container = Container::decode(&self.store.read(META_TYPE, typ as u32)?)?;
        let table = ReferenceTable::decode(table_container.data())?;

        let capacity = match table.get(file) {
            Some(entry) if member < entry.capacity() => entry.capacity(),
            _ => {
                return Err(CacheError::MemberNotFound { typ, file, member });
            }
        };

        let archive = Archive::decode(container.data(), capacity as usize)?;
        archive
            .get(member as usize)
            .map(|data| data.to_vec())
            .ok_or(CacheError::MemberNotFound { typ, file, member })
    }

    /// Replaces one member of the archive stored under `(typ, file)`,
    /// creating the archive (and its table entry) when absent.
    ///
    /// The existing archive is decompressed and expanded as needed; gaps
    /// left by the expansion are filled with one-byte placeholders so the
    /// re-encoded archive stays dense. The container is written back with
    /// its original compression and version; a freshly created archive is
    /// GZIP with version 1.
    pub fn write_member(
        &mut self,
        typ: u8,
        file: u32,
        member: u32,
        data: &[u8],
    ) -> Result<(), CacheError> {
        check_type(typ)?;

        let table_container = Container::decode(&self.store.read(META_TYPE, typ as u32)?)?;
        let mut table = ReferenceTable::decode(table_container.data())?;

        let old_capacity = table.get(file).map(|e| e.capacity());
        let stored = file < self.store.file_count(typ)?;

        let (compression, version, mut archive) = match old_capacity {
            Some(capacity) if stored => {
                let container = self.read(typ, file)?;
                let archive = Archive::decode(container.data(), capacity as usize)?;
                (container.compression(), container.version(), archive)
            }
            _ => (
                Compression::Gzip,
                Some(1),
                Archive::new(member as usize + 1),
            ),
        };

        if member as usize >= archive.size() {
            let mut grown = Archive::new(member as usize + 1);
            for id in 0..archive.size() {
                if let Some(bytes) = archive.get(id) {
                    grown.put(id, bytes.to_vec());
                }
            }
            archive = grown;
        }
        archive.put(member as usize, data.to_vec());

        let entry = table.entry_or_default(file);
        entry.children.entry(member).or_default();
        for id in 0..archive.size() {
            if archive.get(id).is_none() {
                entry.children.entry(id as u32).or_default();
                archive.put(id, vec![0]);
            }
        }

        let mut container = Container::new(compression, archive.encode()?);
        if let Some(version) = version {
            container.set_version(version);
        }
        self.commit(typ, file, &container, table_container.compression(), &mut table)?;

        trace!(typ, file, member, "wrote member");
        Ok(())
    }

    /// Builds the checksum table covering every type of this cache.
    ///
    /// Types whose meta entry is empty produce a zeroed entry; for the
    /// rest the CRC and whirlpool digest are computed over the raw stored
    /// table bytes and the version is lifted out of the decoded table.
    pub fn create_checksum_table(&mut self) -> Result<ChecksumTable, CacheError> {
        let size = self.store.type_count();
        let mut table = ChecksumTable::new(size);

        for typ in 0..size {
            let buf = self.store.read(META_TYPE, typ as u32)?;
            if buf.is_empty() {
                continue;
            }

            let version = ReferenceTable::decode(Container::decode(&buf)?.data())?.version;
            table.set_entry(
                typ,
                checksum_table::Entry {
                    crc: crc32fast::hash(&buf) as i32,
                    version,
                    whirlpool: whirlpool_digest(&buf),
                },
            );
        }

        Ok(table)
    }

    /// Consumes the cache, releasing the store and its file handles.
    pub fn close(self) {
        self.store.close();
    }
}

fn check_type(typ: u8) -> Result<(), CacheError> {
    if typ == META_TYPE {
        return Err(CacheError::ReservedType);
    }
    Ok(())
}
