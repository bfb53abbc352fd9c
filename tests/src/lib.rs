use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tan_common::config::LogDbConfig;
use tan_common::log::init_tan_logger;
use tan_storage::manifest::{
    parse_table_file_name, table_file_name, FileMetadata, FileMetadataRef, VersionEdit,
    VersionSet,
};
use tan_storage::{Engine, EngineOptions};
use tracing::info;

#[derive(Clone, Debug)]
pub struct Options {
    pub log: bool,
    pub log_dir: String,
    pub node: u64,
    pub data_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct Args {
    /// Count of concurrent reader tasks.
    pub readers: usize,
    /// Count of L0 tables flushed by the writer.
    pub flushes: u64,
    /// Compact all L0 and L1 tables into one L1 table after every `compact_every` flushes.
    pub compact_every: u64,
    pub seed: u64,
}

#[derive(Debug, Default)]
pub struct Report {
    pub pins: usize,
    pub versions_installed: u64,
    /// Table files of the final version.
    pub live_files: BTreeSet<u64>,
    /// Table files left on disk after close.
    pub files_on_disk: BTreeSet<u64>,
}

pub fn engine_options(node: u64, dir: &Path) -> EngineOptions {
    let mut options = EngineOptions::from_config(node, dir, &LogDbConfig::tiny());
    options.obsolete_file_retry_interval = Duration::from_millis(10);
    options
}

pub fn key(i: u64) -> Bytes {
    Bytes::from(format!("k{:016}", i))
}

/// Write a placeholder table file and describe it.
pub fn create_table(
    dir: &Path,
    file_number: u64,
    level: usize,
    smallest: Bytes,
    largest: Bytes,
) -> FileMetadataRef {
    let data = format!("table {}", file_number);
    std::fs::write(dir.join(table_file_name(file_number)), &data).unwrap();
    FileMetadata::builder(file_number)
        .level(level)
        .key_range(smallest, largest)
        .size(data.len() as u64)
        .seq_range(file_number, file_number)
        .build()
}

/// Metadata describing the same table as `file`, as a manifest replay would rebuild it.
pub fn recover_file(file: &FileMetadataRef) -> FileMetadataRef {
    FileMetadata::builder(file.file_number())
        .level(file.level())
        .key_range(file.smallest_key().clone(), file.largest_key().clone())
        .size(file.size())
        .seq_range(file.smallest_seq(), file.largest_seq())
        .build()
}

pub fn table_files_on_disk(dir: &Path) -> BTreeSet<u64> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| {
            let name = entry.unwrap().file_name();
            name.to_str().and_then(parse_table_file_name)
        })
        .collect()
}

/// Flush one L0 table covering a random key range.
pub fn flush(version_set: &VersionSet, dir: &Path, rng: &mut impl Rng) -> u64 {
    let file_number = version_set.new_file_number();
    let start = rng.gen_range(0..10000);
    let file = create_table(
        dir,
        file_number,
        0,
        key(start),
        key(start + rng.gen_range(0..100)),
    );
    let mut edit = VersionEdit::default();
    edit.add_file(file);
    version_set.apply_edit(edit).unwrap()
}

/// Merge every L0 and L1 table into a single L1 table.
pub fn compact(version_set: &VersionSet, dir: &Path) -> u64 {
    let current = version_set.current().unwrap();
    let inputs = current.files(0).iter().chain(current.files(1)).collect_vec();
    if inputs.is_empty() {
        return current.id();
    }
    let smallest = inputs.iter().map(|f| f.smallest_key()).min().unwrap();
    let largest = inputs.iter().map(|f| f.largest_key()).max().unwrap();
    let output = create_table(
        dir,
        version_set.new_file_number(),
        1,
        smallest.clone(),
        largest.clone(),
    );
    let mut edit = VersionEdit::default();
    for input in &inputs {
        edit.delete_file(input.level(), input.file_number());
    }
    edit.add_file(output);
    drop(current);
    version_set.apply_edit(edit).unwrap()
}

/// Readers pin versions and check their tables are on disk while a writer flushes and compacts.
pub async fn run(args: Args, options: Options) -> Report {
    let _guard = if options.log {
        Some(init_tan_logger("tests", options.node, &options.log_dir).unwrap())
    } else {
        None
    };

    let mut engine = Engine::open(engine_options(options.node, &options.data_dir))
        .await
        .unwrap();
    let version_set = engine.version_set().clone();
    let dir = Arc::new(engine.dir().to_path_buf());

    let writer_done = Arc::new(AtomicBool::new(false));

    let writer = {
        let version_set = version_set.clone();
        let dir = dir.clone();
        let writer_done = writer_done.clone();
        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(args.seed);
            let mut installed: u64 = 0;
            for i in 1..=args.flushes {
                flush(&version_set, &dir, &mut rng);
                installed += 1;
                if i % args.compact_every == 0 {
                    compact(&version_set, &dir);
                    installed += 1;
                }
                tokio::task::yield_now().await;
            }
            writer_done.store(true, Ordering::Release);
            installed
        })
    };

    let readers = (0..args.readers)
        .map(|_| {
            let version_set = version_set.clone();
            let dir = dir.clone();
            let writer_done = writer_done.clone();
            tokio::spawn(async move {
                let mut pins: usize = 0;
                loop {
                    let version = version_set.current().unwrap();
                    for (_, file) in version.iter_files() {
                        assert!(
                            dir.join(table_file_name(file.file_number())).exists(),
                            "table {} of pinned version {} is missing",
                            file.file_number(),
                            version.id()
                        );
                    }
                    pins += 1;
                    drop(version);
                    if writer_done.load(Ordering::Acquire) {
                        return pins;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect_vec();

    let versions_installed = writer.await.unwrap();
    let pins = futures::future::join_all(readers)
        .await
        .into_iter()
        .map(|pins| pins.unwrap())
        .sum();

    let live_files = version_set.live_file_numbers();
    assert_eq!(version_set.live_versions(), 1);
    engine.close().await.unwrap();
    let files_on_disk = table_files_on_disk(&dir);
    info!(
        "workload finished: [pins: {}, versions installed: {}, live files: {:?}]",
        pins, versions_installed, live_files
    );

    Report {
        pins,
        versions_installed,
        live_files,
        files_on_disk,
    }
}
