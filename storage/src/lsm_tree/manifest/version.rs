use std::ops::{Deref, RangeInclusive};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::{FileMetadataRef, VersionList, VersionListCore, VersionLock};

/// Receiver of the files a retired version leaves unreachable.
///
/// Invoked once per retired version, after the version is unlinked and the version lock is
/// released, so implementations may take their time or touch the version list.
pub trait ObsoleteFileSink: Send + Sync + 'static {
    fn on_obsolete(&self, version_id: u64, files: Vec<FileMetadataRef>);
}

pub type ObsoleteFileSinkRef = Arc<dyn ObsoleteFileSink>;

/// Immutable snapshot of the table files of every level.
///
/// The level lists never change after construction, readers need no lock to walk them. `refs` and
/// `retired` are only mutated while the owning list's lock is held.
pub struct Version {
    id: u64,
    levels: Vec<Vec<FileMetadataRef>>,
    sink: ObsoleteFileSinkRef,
    list: Weak<Mutex<VersionListCore>>,
    refs: AtomicUsize,
    retired: AtomicBool,
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("id", &self.id)
            .field("refs", &self.refs())
            .field("retired", &self.is_retired())
            .field(
                "levels",
                &self
                    .levels
                    .iter()
                    .map(|files| files.iter().map(|f| f.file_number()).collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Version {
    /// Build a version of `list` over `levels`, with a reference count of zero.
    ///
    /// The shared counts of the included files are taken by the first [`Version::add_ref`], so a
    /// version dropped before it is ever referenced leaves them untouched.
    pub fn new(
        id: u64,
        levels: Vec<Vec<FileMetadataRef>>,
        sink: ObsoleteFileSinkRef,
        list: &VersionList,
    ) -> Self {
        Self {
            id,
            levels,
            sink,
            list: list.downgrade(),
            refs: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
        }
    }

    /// Creation sequence number, strictly increasing along the version list.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn files(&self, level: usize) -> &[FileMetadataRef] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn levels(&self) -> &[Vec<FileMetadataRef>] {
        &self.levels
    }

    /// `(level, file)` pairs, level by level.
    pub fn iter_files(&self) -> impl Iterator<Item = (usize, &FileMetadataRef)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |file| (level, file)))
    }

    pub fn contains_file(&self, file_number: u64) -> bool {
        self.iter_files()
            .any(|(_, file)| file.file_number() == file_number)
    }

    /// Total table bytes of `level`.
    pub fn level_size(&self, level: usize) -> u64 {
        self.files(level).iter().map(|file| file.size()).sum()
    }

    pub fn overlapping_files(
        &self,
        level: usize,
        range: RangeInclusive<&[u8]>,
    ) -> Vec<FileMetadataRef> {
        self.files(level)
            .iter()
            .filter(|file| file.is_overlap_with_user_key_range(range.clone()))
            .cloned()
            .collect()
    }

    pub fn marked_for_compaction(&self) -> Vec<FileMetadataRef> {
        self.iter_files()
            .filter(|(_, file)| file.is_marked_for_compaction())
            .map(|(_, file)| file.clone())
            .collect()
    }

    /// Take one reference.
    ///
    /// # Panics
    ///
    /// Panics if the version is already retired.
    pub fn add_ref(&self) {
        match self.list.upgrade() {
            Some(lock) => self.add_ref_locked(&mut lock.lock()),
            None => self.add_ref_inner(),
        }
    }

    /// [`Version::add_ref`] for a caller already holding the version lock.
    pub fn add_ref_locked(&self, _core: &mut VersionListCore) {
        self.add_ref_inner();
    }

    fn add_ref_inner(&self) {
        if self.is_retired() {
            panic!("version {} referenced after retirement", self.id);
        }
        if self.refs.fetch_add(1, Ordering::SeqCst) == 0 {
            for file in self.levels.iter().flatten() {
                file.add_ref();
            }
        }
    }

    /// Release one reference.
    ///
    /// Dropping the last reference unlinks the version, then reports the files no live version
    /// includes anymore to the sink once the lock is released.
    ///
    /// # Panics
    ///
    /// Panics if the reference count is already zero.
    pub fn unref(&self) {
        let retired = match self.list.upgrade() {
            Some(lock) => {
                let mut core = lock.lock();
                self.unref_locked(&mut core)
            }
            None => self.unref_inner(None),
        };
        if let Some(retired) = retired {
            retired.notify();
        }
    }

    /// [`Version::unref`] for a caller already holding the version lock.
    ///
    /// The returned [`RetiredVersion`] must be delivered after the lock is released.
    #[must_use = "the obsolete files are lost unless the retired version is delivered"]
    pub fn unref_locked(&self, core: &mut VersionListCore) -> Option<RetiredVersion> {
        self.unref_inner(Some(core))
    }

    fn unref_inner(&self, core: Option<&mut VersionListCore>) -> Option<RetiredVersion> {
        match self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |refs| refs.checked_sub(1))
        {
            Ok(1) => Some(self.retire(core)),
            Ok(_) => None,
            Err(_) => panic!(
                "version {} released more times than it was referenced",
                self.id
            ),
        }
    }

    fn retire(&self, core: Option<&mut VersionListCore>) -> RetiredVersion {
        self.retired.store(true, Ordering::SeqCst);
        let mut obsolete = self
            .levels
            .iter()
            .flatten()
            .filter(|file| file.unref())
            .cloned()
            .collect::<Vec<_>>();
        obsolete.sort_by_key(|file| file.file_number());

        let version = core.and_then(|core| {
            let version = core.unlink(self.id);
            debug_assert!(
                obsolete
                    .iter()
                    .all(|file| !core.includes_file(file.file_number())),
                "version {} reports files still included by a live version",
                self.id
            );
            version
        });

        RetiredVersion {
            version_id: self.id,
            obsolete,
            sink: self.sink.clone(),
            version,
        }
    }

    /// Take a reference released when the returned handle is dropped.
    pub fn pin(self: &Arc<Self>) -> PinnedVersion {
        self.add_ref();
        PinnedVersion {
            version: self.clone(),
        }
    }

    pub(crate) fn belongs_to(&self, lock: &VersionLock) -> bool {
        std::ptr::eq(self.list.as_ptr(), Arc::as_ptr(lock))
    }
}

/// A version that just dropped its last reference, waiting to be reported.
#[must_use = "a retired version must be delivered after the version lock is released"]
pub struct RetiredVersion {
    version_id: u64,
    obsolete: Vec<FileMetadataRef>,
    sink: ObsoleteFileSinkRef,
    /// The list's strong reference, released after the sink returns.
    version: Option<Arc<Version>>,
}

impl RetiredVersion {
    pub fn version_id(&self) -> u64 {
        self.version_id
    }

    pub fn obsolete_files(&self) -> &[FileMetadataRef] {
        &self.obsolete
    }

    pub fn notify(self) {
        let RetiredVersion {
            version_id,
            obsolete,
            sink,
            version,
        } = self;
        debug!(
            "version {} retired, obsolete files: {:?}",
            version_id,
            obsolete.iter().map(|f| f.file_number()).collect::<Vec<_>>()
        );
        sink.on_obsolete(version_id, obsolete);
        drop(version);
    }

    /// Drop the retirement without reporting, the files stay on disk.
    pub(crate) fn discard(self) -> Vec<FileMetadataRef> {
        debug!(
            "version {} retired, keep {} files",
            self.version_id,
            self.obsolete.len()
        );
        self.obsolete
    }
}

/// A referenced version, released on drop.
pub struct PinnedVersion {
    version: Arc<Version>,
}

impl PinnedVersion {
    /// Wrap a version the caller already took a reference on.
    pub(crate) fn from_referenced(version: Arc<Version>) -> Self {
        Self { version }
    }

    pub fn version(&self) -> &Arc<Version> {
        &self.version
    }
}

impl Deref for PinnedVersion {
    type Target = Version;

    fn deref(&self) -> &Self::Target {
        &self.version
    }
}

impl Clone for PinnedVersion {
    fn clone(&self) -> Self {
        self.version.pin()
    }
}

impl Drop for PinnedVersion {
    fn drop(&mut self) {
        self.version.unref();
    }
}
