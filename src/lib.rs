//! Read/write engine for the legacy game client's on-disk cache.
//!
//! The cache is a virtual filesystem packing many logical files into a
//! handful of host files: one data file (`main_file_cache.dat2`) divided
//! into fixed 520-byte sectors, per-type index files (`idx0`..`idx253`)
//! mapping file ids to sector chains, and a meta index (`idx255`) holding
//! the per-type [`ReferenceTable`]s with CRC32 checksums, whirlpool
//! digests and versions. Payloads travel inside [`Container`]s (raw,
//! gzip or bzip2, with an optional version trailer) and may bundle
//! several members as an [`Archive`].
//!
//! [`FileStore`] is the low-level sector layer; [`Cache`] composes the
//! pieces and keeps the reference tables consistent with every write.
//!
//! # Example
//!
//! ```no_run
//! use jagcache::{Cache, Compression, Container};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cache = Cache::open("./data/cache")?;
//!
//! let container = Container::versioned(Compression::Gzip, vec![1, 2, 3], 1);
//! cache.write(0, 5, container)?;
//!
//! let back = cache.read(0, 5)?;
//! assert_eq!(back.data(), &[1, 2, 3]);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cache;
pub mod checksum_table;
pub mod container;
pub mod digest;
pub mod djb2;
pub mod file_store;
pub mod index;
pub mod reference_table;
pub mod rsa;
pub mod sector;
pub mod xtea;

pub use archive::{Archive, ArchiveError};
pub use cache::{Cache, CacheError};
pub use checksum_table::{ChecksumTable, ChecksumTableError};
pub use container::{Compression, Container, ContainerError};
pub use file_store::{FileStore, FileStoreError, META_TYPE};
pub use reference_table::{ReferenceTable, ReferenceTableError};
