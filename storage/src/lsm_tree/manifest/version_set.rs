use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use tan_common::config::{LevelCompactionStrategy, LevelOptions};
use tracing::{info, trace};

use super::{
    FileMetadataRef, ManifestError, ObsoleteFileSink, ObsoleteFileSinkRef, PinnedVersion, Version,
    VersionEdit, VersionList, VersionLock,
};
use crate::components::VersionSetMetricsRef;
use crate::Result;

pub struct VersionSetOptions {
    pub node: u64,
    /// Compaction strategy of each level.
    ///
    /// Usually, L0 uses `Overlap`, the others use `NonOverlap`.
    pub levels_options: Vec<LevelOptions>,
    /// Files of the recovered version, installed as the first version.
    pub files: Vec<FileMetadataRef>,
    /// Lower bound of the next allocated file number.
    pub next_file_number: u64,
    /// Receives the files of every retired version.
    pub sink: ObsoleteFileSinkRef,
    pub metrics: VersionSetMetricsRef,
}

/// Keeps metrics in step with retirements before forwarding them.
struct MeteredSink {
    inner: ObsoleteFileSinkRef,
    metrics: VersionSetMetricsRef,
}

impl ObsoleteFileSink for MeteredSink {
    fn on_obsolete(&self, version_id: u64, files: Vec<FileMetadataRef>) {
        self.metrics.live_versions_gauge.dec();
        self.metrics.versions_retired_counter.inc();
        self.metrics
            .obsolete_files_reported_counter
            .inc_by(files.len() as u64);
        self.inner.on_obsolete(version_id, files);
    }
}

struct VersionSetCore {
    node: u64,
    /// Compaction strategy of each level.
    levels_options: Vec<LevelOptions>,
    /// Live versions, the back one is current and holds the install reference.
    list: VersionList,
    sink: ObsoleteFileSinkRef,
    next_file_number: AtomicU64,
    /// Only advanced while the version lock is held, so ids follow list order.
    next_version_id: AtomicU64,
    metrics: VersionSetMetricsRef,
}

/// Owner of the current version and of file number allocation.
#[derive(Clone)]
pub struct VersionSet {
    core: Arc<VersionSetCore>,
}

impl VersionSet {
    /// Install the initial version built from `options.files`.
    pub fn new(options: VersionSetOptions) -> Result<Self> {
        let empty = vec![vec![]; options.levels_options.len()];
        let edit = VersionEdit {
            added: options.files,
            deleted: vec![],
        };
        let levels = apply_edit_to_levels(&options.levels_options, &empty, &edit)?;
        let next_file_number = edit
            .added
            .iter()
            .map(|file| file.file_number().saturating_add(1))
            .chain([options.next_file_number, 1])
            .max()
            .unwrap_or(1);

        let list = VersionList::new(VersionLock::default());
        let sink: ObsoleteFileSinkRef = Arc::new(MeteredSink {
            inner: options.sink,
            metrics: options.metrics.clone(),
        });
        let core = Arc::new(VersionSetCore {
            node: options.node,
            levels_options: options.levels_options,
            list,
            sink,
            next_file_number: AtomicU64::new(next_file_number),
            next_version_id: AtomicU64::new(1),
            metrics: options.metrics,
        });

        {
            let mut guard = core.list.lock();
            let id = core.next_version_id.fetch_add(1, Ordering::SeqCst);
            let version = Arc::new(Version::new(id, levels, core.sink.clone(), &core.list));
            version.add_ref_locked(&mut guard);
            core.list.push_back_locked(&mut guard, version);
        }
        core.metrics.versions_installed_counter.inc();
        core.metrics.live_versions_gauge.inc();

        info!(
            "version set of node {} opened: [files: {}] [next file number: {}]",
            core.node,
            edit.added.len(),
            next_file_number
        );
        Ok(Self { core })
    }

    pub fn levels(&self) -> usize {
        self.core.levels_options.len()
    }

    pub fn list(&self) -> &VersionList {
        &self.core.list
    }

    pub fn metrics(&self) -> &VersionSetMetricsRef {
        &self.core.metrics
    }

    /// Reference the current version. The reference is released when the handle is dropped.
    pub fn current(&self) -> Result<PinnedVersion> {
        let mut guard = self.core.list.lock();
        let current = guard.back().cloned().ok_or(ManifestError::Closed)?;
        current.add_ref_locked(&mut guard);
        Ok(PinnedVersion::from_referenced(current))
    }

    /// Derive a successor of the current version with `edit` and install it as current.
    ///
    /// The predecessor loses its install reference. If nothing else holds it, it retires and its
    /// obsolete files reach the sink before this returns. Returns the id of the new version.
    pub fn apply_edit(&self, edit: VersionEdit) -> Result<u64> {
        let (id, retired) = {
            let mut guard = self.core.list.lock();
            let current = guard.back().cloned().ok_or(ManifestError::Closed)?;
            // A file number may only be described by one metadata, or a retiring version could
            // report a file another metadata still keeps alive.
            if let Some(file) = edit
                .added
                .iter()
                .find(|file| guard.includes_file(file.file_number()))
            {
                return Err(ManifestError::InvalidVersionEdit(format!(
                    "file {} is already included by a live version",
                    file.file_number()
                ))
                .into());
            }
            let levels =
                apply_edit_to_levels(&self.core.levels_options, current.levels(), &edit)?;

            let id = self.core.next_version_id.fetch_add(1, Ordering::SeqCst);
            let version = Arc::new(Version::new(
                id,
                levels,
                self.core.sink.clone(),
                &self.core.list,
            ));
            version.add_ref_locked(&mut guard);
            self.core.list.push_back_locked(&mut guard, version);
            (id, current.unref_locked(&mut guard))
        };

        if let Some(file_number) = edit.added.iter().map(|file| file.file_number()).max() {
            self.mark_file_number_used(file_number);
        }
        self.core.metrics.versions_installed_counter.inc();
        self.core.metrics.live_versions_gauge.inc();
        trace!(
            "installed version {}: [added: {:?}] [deleted: {:?}]",
            id,
            edit.added.iter().map(|file| file.file_number()).collect_vec(),
            edit.deleted
        );

        if let Some(retired) = retired {
            retired.notify();
        }
        Ok(id)
    }

    pub fn new_file_number(&self) -> u64 {
        self.core.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Make sure `file_number` is never allocated again.
    pub fn mark_file_number_used(&self, file_number: u64) {
        self.core
            .next_file_number
            .fetch_max(file_number.saturating_add(1), Ordering::SeqCst);
    }

    pub fn next_file_number(&self) -> u64 {
        self.core.next_file_number.load(Ordering::SeqCst)
    }

    /// Id of the current version, 0 once closed.
    pub fn latest_version_id(&self) -> u64 {
        self.core.list.lock().back().map_or(0, |v| v.id())
    }

    pub fn live_versions(&self) -> usize {
        self.core.list.len()
    }

    pub fn oldest_live_version_id(&self) -> Option<u64> {
        self.core.list.lock().front().map(|v| v.id())
    }

    /// Smallest file number any live version includes.
    ///
    /// Table files below it that are still on disk are garbage.
    pub fn min_live_file_number(&self) -> Option<u64> {
        self.core.list.lock().file_numbers().min()
    }

    pub fn live_file_numbers(&self) -> BTreeSet<u64> {
        self.core.list.lock().file_numbers().collect()
    }

    /// Release the install reference of the current version.
    ///
    /// Refused while any other reference is outstanding. The files of the final version are not
    /// reported, they are the state the next open recovers. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let retired = {
            let mut guard = self.core.list.lock();
            let current = match guard.back().cloned() {
                Some(current) => current,
                None => return Ok(()),
            };
            let live = guard.len();
            let current_refs = current.refs();
            if live > 1 || current_refs > 1 {
                return Err(ManifestError::VersionsStillReferenced { live, current_refs }.into());
            }
            let retired = current.unref_locked(&mut guard);
            assert!(guard.is_empty(), "version list must be empty after close");
            retired
        };
        if let Some(retired) = retired {
            let kept = retired.discard();
            self.core.metrics.live_versions_gauge.dec();
            self.core.metrics.versions_retired_counter.inc();
            info!(
                "version set of node {} closed: [kept files: {}]",
                self.core.node,
                kept.len()
            );
        }
        Ok(())
    }
}

/// Reserved so the allocator can always move past every used number.
const MAX_FILE_NUMBER: u64 = u64::MAX;

/// Apply `edit` on top of `base`, deletions first.
///
/// `Overlap` levels are kept in file number order. `NonOverlap` levels are kept in smallest key
/// order and must stay disjoint.
fn apply_edit_to_levels(
    levels_options: &[LevelOptions],
    base: &[Vec<FileMetadataRef>],
    edit: &VersionEdit,
) -> Result<Vec<Vec<FileMetadataRef>>> {
    let mut levels = base.to_vec();
    for &(level, file_number) in &edit.deleted {
        let files = levels
            .get_mut(level)
            .ok_or(ManifestError::LevelNotExists(level, levels_options.len()))?;
        match files
            .iter()
            .position(|file| file.file_number() == file_number)
        {
            Some(idx) => {
                files.remove(idx);
            }
            None => {
                return Err(ManifestError::InvalidVersionEdit(format!(
                    "file L{}-{} not exists",
                    level, file_number
                ))
                .into())
            }
        }
    }

    for file in &edit.added {
        if file.file_number() == MAX_FILE_NUMBER {
            return Err(ManifestError::InvalidVersionEdit(format!(
                "file number {} out of range",
                file.file_number()
            ))
            .into());
        }
        let level = file.level();
        let compaction_strategy = levels_options
            .get(level)
            .ok_or(ManifestError::LevelNotExists(level, levels_options.len()))?
            .compaction_strategy;
        if levels
            .iter()
            .flatten()
            .any(|f| f.file_number() == file.file_number())
        {
            return Err(ManifestError::InvalidVersionEdit(format!(
                "file {} added twice",
                file.file_number()
            ))
            .into());
        }
        let files = &mut levels[level];
        match compaction_strategy {
            LevelCompactionStrategy::Overlap => {
                let idx = files.partition_point(|f| f.file_number() < file.file_number());
                files.insert(idx, file.clone());
            }
            LevelCompactionStrategy::NonOverlap => {
                let idx = files.partition_point(|f| f.smallest_key() < file.smallest_key());
                let overlapped = [idx.checked_sub(1), Some(idx)]
                    .into_iter()
                    .flatten()
                    .filter_map(|i| files.get(i))
                    .find(|f| {
                        f.is_overlap_with_user_key_range(
                            file.smallest_key().as_ref()..=file.largest_key().as_ref(),
                        )
                    });
                if let Some(f) = overlapped {
                    return Err(ManifestError::InvalidVersionEdit(format!(
                        "file overlaps in non-overlap level {}: [file: {}, smallest: {:?}, largest: {:?}] [file: {}, smallest: {:?}, largest: {:?}]",
                        level,
                        f.file_number(),
                        f.smallest_key(),
                        f.largest_key(),
                        file.file_number(),
                        file.smallest_key(),
                        file.largest_key(),
                    ))
                    .into());
                }
                files.insert(idx, file.clone());
            }
        }
    }
    Ok(levels)
}
