use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

const TABLE_FILE_EXTENSION: &str = "sst";

pub fn table_file_name(file_number: u64) -> String {
    format!("{:06}.{}", file_number, TABLE_FILE_EXTENSION)
}

/// Parse the file number out of a name produced by [`table_file_name`].
pub fn parse_table_file_name(name: &str) -> Option<u64> {
    let (stem, extension) = name.rsplit_once('.')?;
    if extension != TABLE_FILE_EXTENSION
        || stem.is_empty()
        || !stem.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    stem.parse().ok()
}

/// Descriptor of one on-disk table file.
///
/// Everything but the compaction mark is fixed at construction. The same descriptor is shared by
/// every [`super::Version`] whose level lists include the file, and `refs` counts those versions.
#[derive(Debug)]
pub struct FileMetadata {
    file_number: u64,
    level: usize,
    smallest_key: Bytes,
    largest_key: Bytes,
    size: u64,
    smallest_seq: u64,
    largest_seq: u64,
    refs: AtomicUsize,
    marked_for_compaction: AtomicBool,
}

pub type FileMetadataRef = Arc<FileMetadata>;

impl FileMetadata {
    pub fn builder(file_number: u64) -> FileMetadataBuilder {
        FileMetadataBuilder {
            file_number,
            level: 0,
            smallest_key: Bytes::new(),
            largest_key: Bytes::new(),
            size: 0,
            smallest_seq: 0,
            largest_seq: 0,
        }
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn smallest_key(&self) -> &Bytes {
        &self.smallest_key
    }

    pub fn largest_key(&self) -> &Bytes {
        &self.largest_key
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn smallest_seq(&self) -> u64 {
        self.smallest_seq
    }

    pub fn largest_seq(&self) -> u64 {
        self.largest_seq
    }

    /// Number of unretired versions that include this file.
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn is_marked_for_compaction(&self) -> bool {
        self.marked_for_compaction.load(Ordering::Relaxed)
    }

    pub fn mark_for_compaction(&self) {
        self.marked_for_compaction.store(true, Ordering::Relaxed);
    }

    pub fn is_overlap_with_user_key_range(&self, range: RangeInclusive<&[u8]>) -> bool {
        self.smallest_key.as_ref() <= *range.end() && self.largest_key.as_ref() >= *range.start()
    }

    pub(crate) fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns `true` if no version includes the file anymore.
    pub(crate) fn unref(&self) -> bool {
        match self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |refs| refs.checked_sub(1))
        {
            Ok(refs) => refs == 1,
            Err(_) => panic!(
                "file {} released by more versions than included it",
                self.file_number
            ),
        }
    }
}

pub struct FileMetadataBuilder {
    file_number: u64,
    level: usize,
    smallest_key: Bytes,
    largest_key: Bytes,
    size: u64,
    smallest_seq: u64,
    largest_seq: u64,
}

impl FileMetadataBuilder {
    pub fn level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    pub fn key_range(mut self, smallest: impl Into<Bytes>, largest: impl Into<Bytes>) -> Self {
        self.smallest_key = smallest.into();
        self.largest_key = largest.into();
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn seq_range(mut self, smallest: u64, largest: u64) -> Self {
        self.smallest_seq = smallest;
        self.largest_seq = largest;
        self
    }

    pub fn build(self) -> FileMetadataRef {
        assert!(
            self.smallest_key <= self.largest_key,
            "file {} has an inverted key range",
            self.file_number
        );
        Arc::new(FileMetadata {
            file_number: self.file_number,
            level: self.level,
            smallest_key: self.smallest_key,
            largest_key: self.largest_key,
            size: self.size,
            smallest_seq: self.smallest_seq,
            largest_seq: self.largest_seq,
            refs: AtomicUsize::new(0),
            marked_for_compaction: AtomicBool::new(false),
        })
    }
}
