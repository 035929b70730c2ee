#![allow(dead_code)]

use jagcache::container::{Compression, Container};
use jagcache::file_store::{FileStore, META_TYPE};
use jagcache::reference_table::ReferenceTable;
use std::fs::File;
use std::path::Path;
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub fn setup() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Creates a scratch cache directory holding an empty data file, `types`
/// empty type index files and an empty meta index.
pub fn scratch_cache(types: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    File::create(dir.path().join("main_file_cache.dat2")).unwrap();
    for i in 0..types {
        File::create(dir.path().join(format!("main_file_cache.idx{i}"))).unwrap();
    }
    File::create(dir.path().join(format!("main_file_cache.idx{META_TYPE}"))).unwrap();
    dir
}

/// Seeds `typ` with an empty format-6 reference table carrying `flags`,
/// wrapped in an uncompressed container.
pub fn seed_reference_table(root: &Path, typ: u8, flags: u8) {
    let mut store = FileStore::open(root).unwrap();

    let mut table = ReferenceTable::new(6, flags);
    table.version = 1;

    let container = Container::new(Compression::None, table.encode().unwrap());
    store
        .write(META_TYPE, typ as u32, &container.encode().unwrap())
        .unwrap();
}
