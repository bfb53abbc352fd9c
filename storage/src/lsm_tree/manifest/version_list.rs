use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use super::Version;

/// Lock shared by a [`VersionList`] and its owner.
///
/// Every version refcount mutation and every link mutation happens while it is held.
pub type VersionLock = Arc<Mutex<VersionListCore>>;

struct ListNode {
    version: Arc<Version>,
    prev: Option<u64>,
    next: Option<u64>,
}

/// Links of the live versions, keyed by version id.
///
/// The list holds the strong reference of every linked version. Versions only keep a weak
/// reference back to the lock.
#[derive(Default)]
pub struct VersionListCore {
    nodes: HashMap<u64, ListNode>,
    head: Option<u64>,
    tail: Option<u64>,
    /// Number of linked versions including each file number.
    file_numbers: HashMap<u64, usize>,
}

impl VersionListCore {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// The oldest live version.
    pub fn front(&self) -> Option<&Arc<Version>> {
        self.head.map(|id| &self.nodes[&id].version)
    }

    /// The newest live version.
    pub fn back(&self) -> Option<&Arc<Version>> {
        self.tail.map(|id| &self.nodes[&id].version)
    }

    /// Iterate live versions from the oldest to the newest.
    pub fn iter(&self) -> VersionListIter<'_> {
        VersionListIter {
            core: self,
            cursor: self.head,
        }
    }

    /// Whether any linked version includes `file_number`.
    pub fn includes_file(&self, file_number: u64) -> bool {
        self.file_numbers.contains_key(&file_number)
    }

    /// File numbers included by linked versions, in no particular order.
    pub fn file_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.file_numbers.keys().copied()
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.nodes.contains_key(&id)
    }

    pub(crate) fn link_back(&mut self, version: Arc<Version>) {
        let id = version.id();
        assert!(
            !version.is_retired(),
            "version {} is retired and can not be linked",
            id
        );
        if let Some(tail) = self.tail {
            assert!(
                tail < id,
                "version {} must be newer than the newest live version {}",
                id,
                tail
            );
            self.nodes
                .get_mut(&tail)
                .expect("tail must be linked")
                .next = Some(id);
        } else {
            self.head = Some(id);
        }
        for (_, file) in version.iter_files() {
            *self.file_numbers.entry(file.file_number()).or_default() += 1;
        }
        self.nodes.insert(
            id,
            ListNode {
                version,
                prev: self.tail,
                next: None,
            },
        );
        self.tail = Some(id);
    }

    pub(crate) fn unlink(&mut self, id: u64) -> Option<Arc<Version>> {
        let node = self.nodes.remove(&id)?;
        match node.prev {
            Some(prev) => self.nodes.get_mut(&prev).expect("prev must be linked").next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes.get_mut(&next).expect("next must be linked").prev = node.prev,
            None => self.tail = node.prev,
        }
        for (_, file) in node.version.iter_files() {
            if let Entry::Occupied(mut entry) = self.file_numbers.entry(file.file_number()) {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                }
            }
        }
        Some(node.version)
    }
}

pub struct VersionListIter<'a> {
    core: &'a VersionListCore,
    cursor: Option<u64>,
}

impl<'a> Iterator for VersionListIter<'a> {
    type Item = &'a Arc<Version>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = &self.core.nodes[&self.cursor?];
        self.cursor = node.next;
        Some(&node.version)
    }
}

/// Live versions ordered by creation, the back one being current.
///
/// The list never creates its own lock, it is handed the one its owner already serializes "which
/// version is current" decisions with.
#[derive(Clone)]
pub struct VersionList {
    lock: VersionLock,
}

impl VersionList {
    pub fn new(lock: VersionLock) -> Self {
        Self { lock }
    }

    pub fn lock(&self) -> MutexGuard<'_, VersionListCore> {
        self.lock.lock()
    }

    /// Append `version` as the newest live version.
    ///
    /// # Panics
    ///
    /// Panics if `version` was built for another list, is already linked or retired, or is not
    /// newer than the current back.
    pub fn push_back(&self, version: Arc<Version>) {
        let mut core = self.lock.lock();
        self.push_back_locked(&mut core, version);
    }

    /// Same as [`VersionList::push_back`] for a caller that already holds [`VersionList::lock`].
    pub fn push_back_locked(&self, core: &mut VersionListCore, version: Arc<Version>) {
        assert!(
            version.belongs_to(&self.lock),
            "version {} belongs to another list",
            version.id()
        );
        assert!(
            !core.contains(version.id()),
            "version {} is already linked",
            version.id()
        );
        core.link_back(version);
    }

    pub fn is_empty(&self) -> bool {
        self.lock.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock.lock().len()
    }

    /// The oldest live version. No reference is taken on it.
    pub fn front(&self) -> Option<Arc<Version>> {
        self.lock.lock().front().cloned()
    }

    /// The newest live version. No reference is taken on it.
    pub fn back(&self) -> Option<Arc<Version>> {
        self.lock.lock().back().cloned()
    }

    pub fn version_ids(&self) -> Vec<u64> {
        self.lock.lock().iter().map(|version| version.id()).collect()
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<VersionListCore>> {
        Arc::downgrade(&self.lock)
    }
}
