use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Set when entries (and their children) carry name-hash identifiers.
pub const FLAG_IDENTIFIERS: u8 = 0x01;

/// Set when entries carry 64-byte whirlpool digests.
pub const FLAG_WHIRLPOOL: u8 = 0x02;

/// Tables with this format or later carry a version field.
pub const FORMAT_VERSIONED: u8 = 6;

#[derive(Error, Debug)]
pub enum ReferenceTableError {
    #[error("reference table data truncated: {0}")]
    Io(#[from] io::Error),
}

/// A child record within an entry. Only the name-hash identifier is kept
/// per child; everything else lives on the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub identifier: i32,
}

impl Default for ChildEntry {
    fn default() -> ChildEntry {
        ChildEntry { identifier: -1 }
    }
}

/// Metadata for one file of a type: integrity digests, the version written
/// alongside the payload, and the child layout of its archive.
///
/// The whirlpool slot is always present in memory and all zeros when the
/// table does not carry [`FLAG_WHIRLPOOL`]; the identifier defaults to -1
/// when the table does not carry [`FLAG_IDENTIFIERS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub identifier: i32,
    pub crc: i32,
    pub whirlpool: [u8; 64],
    pub version: i32,
    pub children: BTreeMap<u32, ChildEntry>,
}

impl Default for Entry {
    fn default() -> Entry {
        Entry {
            identifier: -1,
            crc: 0,
            whirlpool: [0; 64],
            version: 0,
            children: BTreeMap::new(),
        }
    }
}

impl Entry {
    /// One more than the highest child id, or 0 when there are none.
    pub fn capacity(&self) -> u32 {
        self.children.keys().next_back().map_or(0, |id| id + 1)
    }

    /// Number of children present.
    pub fn size(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, id: u32) -> Option<&ChildEntry> {
        self.children.get(&id)
    }

    pub fn put_child(&mut self, id: u32, child: ChildEntry) {
        self.children.insert(id, child);
    }

    pub fn remove_child(&mut self, id: u32) -> Option<ChildEntry> {
        self.children.remove(&id)
    }

    /// Finds the child carrying `identifier`, if any.
    pub fn child_id_for_identifier(&self, identifier: i32) -> Option<u32> {
        self.children
            .iter()
            .find(|(_, child)| child.identifier == identifier)
            .map(|(id, _)| *id)
    }
}

/// The metadata table for all files of one type, stored under the meta
/// index as `(255, type)`.
///
/// Entries are keyed by file id and always kept in ascending order; the
/// wire format delta-encodes the ids in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTable {
    pub format: u8,
    pub version: i32,
    pub flags: u8,
    entries: BTreeMap<u32, Entry>,
}

impl ReferenceTable {
    pub fn new(format: u8, flags: u8) -> ReferenceTable {
        ReferenceTable {
            format,
            version: 0,
            flags,
            entries: BTreeMap::new(),
        }
    }

    /// One more than the highest entry id, or 0 when the table is empty.
    pub fn capacity(&self) -> u32 {
        self.entries.keys().next_back().map_or(0, |id| id + 1)
    }

    /// Number of entries present.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: u32) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Entry> {
        self.entries.get_mut(&id)
    }

    pub fn put(&mut self, id: u32, entry: Entry) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: u32) -> Option<Entry> {
        self.entries.remove(&id)
    }

    /// Returns the entry for `id`, inserting a default one if absent.
    pub fn entry_or_default(&mut self, id: u32) -> &mut Entry {
        self.entries.entry(id).or_default()
    }

    pub fn get_child(&self, id: u32, child: u32) -> Option<&ChildEntry> {
        self.entries.get(&id).and_then(|e| e.child(child))
    }

    pub fn put_child(&mut self, id: u32, child: u32, entry: ChildEntry) {
        self.entry_or_default(id).put_child(child, entry);
    }

    pub fn remove_child(&mut self, id: u32, child: u32) -> Option<ChildEntry> {
        self.entries.get_mut(&id).and_then(|e| e.remove_child(child))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&u32, &Entry)> {
        self.entries.iter()
    }

    /// Finds the entry carrying `identifier`, if any.
    pub fn entry_id_for_identifier(&self, identifier: i32) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.identifier == identifier)
            .map(|(id, _)| *id)
    }

    pub fn decode(buf: &[u8]) -> Result<ReferenceTable, ReferenceTableError> {
        let mut r = buf;

        let format = r.read_u8()?;
        let version = if format >= FORMAT_VERSIONED {
            r.read_i32::<BigEndian>()?
        } else {
            0
        };
        let flags = r.read_u8()?;
        let count = r.read_u16::<BigEndian>()? as usize;

        let mut entries = BTreeMap::new();
        let mut id = 0u32;
        for _ in 0..count {
            id += r.read_u16::<BigEndian>()? as u32;
            entries.insert(id, Entry::default());
        }

        if flags & FLAG_IDENTIFIERS != 0 {
            for entry in entries.values_mut() {
                entry.identifier = r.read_i32::<BigEndian>()?;
            }
        }

        for entry in entries.values_mut() {
            entry.crc = r.read_i32::<BigEndian>()?;
        }

        if flags & FLAG_WHIRLPOOL != 0 {
            for entry in entries.values_mut() {
                r.read_exact(&mut entry.whirlpool)?;
            }
        }

        for entry in entries.values_mut() {
            entry.version = r.read_i32::<BigEndian>()?;
        }

        let mut child_counts = Vec::with_capacity(entries.len());
        for _ in 0..entries.len() {
            child_counts.push(r.read_u16::<BigEndian>()? as usize);
        }

        for (entry, count) in entries.values_mut().zip(&child_counts) {
            let mut child = 0u32;
            for _ in 0..*count {
                child += r.read_u16::<BigEndian>()? as u32;
                entry.children.insert(child, ChildEntry::default());
            }
        }

        if flags & FLAG_IDENTIFIERS != 0 {
            for entry in entries.values_mut() {
                for child in entry.children.values_mut() {
                    child.identifier = r.read_i32::<BigEndian>()?;
                }
            }
        }

        Ok(ReferenceTable {
            format,
            version,
            flags,
            entries,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ReferenceTableError> {
        let mut buf = Vec::new();

        buf.write_u8(self.format)?;
        if self.format >= FORMAT_VERSIONED {
            buf.write_i32::<BigEndian>(self.version)?;
        }
        buf.write_u8(self.flags)?;
        buf.write_u16::<BigEndian>(self.entries.len() as u16)?;

        let mut prev = 0u32;
        for id in self.entries.keys() {
            buf.write_u16::<BigEndian>((id - prev) as u16)?;
            prev = *id;
        }

        if self.flags & FLAG_IDENTIFIERS != 0 {
            for entry in self.entries.values() {
                buf.write_i32::<BigEndian>(entry.identifier)?;
            }
        }

        for entry in self.entries.values() {
            buf.write_i32::<BigEndian>(entry.crc)?;
        }

        if self.flags & FLAG_WHIRLPOOL != 0 {
            for entry in self.entries.values() {
                buf.write_all(&entry.whirlpool)?;
            }
        }

        for entry in self.entries.values() {
            buf.write_i32::<BigEndian>(entry.version)?;
        }

        for entry in self.entries.values() {
            buf.write_u16::<BigEndian>(entry.children.len() as u16)?;
        }

        for entry in self.entries.values() {
            let mut prev = 0u32;
            for id in entry.children.keys() {
                buf.write_u16::<BigEndian>((id - prev) as u16)?;
                prev = *id;
            }
        }

        if self.flags & FLAG_IDENTIFIERS != 0 {
            for entry in self.entries.values() {
                for child in entry.children.values() {
                    buf.write_i32::<BigEndian>(child.identifier)?;
                }
            }
        }

        Ok(buf)
    }
}
