mod error;
mod file_metadata;
mod version;
mod version_list;
mod version_set;

pub use error::*;
pub use file_metadata::*;
pub use version::*;
pub use version_list::*;
pub use version_set::*;

/// Files added to and removed from the current version to derive its successor.
#[derive(Clone, Default, Debug)]
pub struct VersionEdit {
    /// New files, each placed at its own [`FileMetadata::level`].
    pub added: Vec<FileMetadataRef>,
    /// `(level, file number)` of the files to drop.
    pub deleted: Vec<(usize, u64)>,
}

impl VersionEdit {
    pub fn add_file(&mut self, file: FileMetadataRef) -> &mut Self {
        self.added.push(file);
        self
    }

    pub fn delete_file(&mut self, level: usize, file_number: u64) -> &mut Self {
        self.deleted.push((level, file_number));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }
}
