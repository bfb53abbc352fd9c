use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tan_common::Worker;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::components::VersionSetMetricsRef;
use crate::manifest::{table_file_name, FileMetadataRef, ObsoleteFileSink};

enum CleanerMessage {
    Delete { version_id: u64, file_numbers: Vec<u64> },
    Shutdown,
}

/// The [`ObsoleteFileSink`] side of the cleaner.
///
/// Retirements only enqueue, physical removal happens on the cleaner task.
pub struct ObsoleteFileDeleter {
    tx: mpsc::UnboundedSender<CleanerMessage>,
}

impl ObsoleteFileDeleter {
    /// Schedule removal of files that no version describes, e.g. leftovers found on open.
    pub fn delete_files(&self, file_numbers: Vec<u64>) {
        self.send(CleanerMessage::Delete {
            version_id: 0,
            file_numbers,
        });
    }

    /// Stop the cleaner after every batch queued so far is handled.
    pub fn shutdown(&self) {
        self.send(CleanerMessage::Shutdown);
    }

    fn send(&self, message: CleanerMessage) {
        if self.tx.send(message).is_err() {
            warn!("obsolete file cleaner stopped, message dropped");
        }
    }
}

impl ObsoleteFileSink for ObsoleteFileDeleter {
    fn on_obsolete(&self, version_id: u64, files: Vec<FileMetadataRef>) {
        if files.is_empty() {
            return;
        }
        self.send(CleanerMessage::Delete {
            version_id,
            file_numbers: files.iter().map(|file| file.file_number()).collect(),
        });
    }
}

pub struct ObsoleteFileCleanerOptions {
    pub dir: PathBuf,
    pub retry_attempts: usize,
    pub retry_interval: Duration,
    pub metrics: VersionSetMetricsRef,
}

/// Removes the table files of retired versions from disk, retrying failures.
pub struct ObsoleteFileCleaner {
    options: ObsoleteFileCleanerOptions,
    rx: mpsc::UnboundedReceiver<CleanerMessage>,
}

pub fn obsolete_file_cleaner(
    options: ObsoleteFileCleanerOptions,
) -> (ObsoleteFileDeleter, ObsoleteFileCleaner) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ObsoleteFileDeleter { tx }, ObsoleteFileCleaner { options, rx })
}

#[async_trait]
impl Worker for ObsoleteFileCleaner {
    async fn run(&mut self) -> anyhow::Result<()> {
        while let Some(message) = self.rx.recv().await {
            match message {
                CleanerMessage::Delete {
                    version_id,
                    file_numbers,
                } => {
                    debug!(
                        "delete obsolete files of version {}: {:?}",
                        version_id, file_numbers
                    );
                    for file_number in file_numbers {
                        self.delete(file_number).await;
                    }
                }
                CleanerMessage::Shutdown => break,
            }
        }
        info!("obsolete file cleaner of {:?} stopped", self.options.dir);
        Ok(())
    }
}

impl ObsoleteFileCleaner {
    async fn delete(&self, file_number: u64) {
        let path = self.options.dir.join(table_file_name(file_number));
        let mut attempt = 0;
        loop {
            match remove_file(&path).await {
                Ok(()) => {
                    self.options.metrics.obsolete_files_deleted_counter.inc();
                    return;
                }
                Err(e) if attempt < self.options.retry_attempts => {
                    attempt += 1;
                    warn!(
                        "failed to delete obsolete file {:?}, retry [{}/{}]: {}",
                        path, attempt, self.options.retry_attempts, e
                    );
                    tokio::time::sleep(self.options.retry_interval).await;
                }
                Err(e) => {
                    error!("give up deleting obsolete file {:?}: {}", path, e);
                    self.options.metrics.obsolete_files_failed_counter.inc();
                    return;
                }
            }
        }
    }
}

/// Removing a file that is already gone counts as success.
async fn remove_file(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("obsolete file {:?} already removed", path);
            Ok(())
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use test_log::test;

    use super::*;
    use crate::components::VersionSetMetrics;
    use crate::manifest::tests::file;

    fn build_cleaner_for_test(
        dir: &Path,
        node: u64,
        retry_attempts: usize,
    ) -> (ObsoleteFileDeleter, ObsoleteFileCleaner, VersionSetMetricsRef) {
        let metrics = Arc::new(VersionSetMetrics::new(node));
        let (deleter, cleaner) = obsolete_file_cleaner(ObsoleteFileCleanerOptions {
            dir: dir.to_path_buf(),
            retry_attempts,
            retry_interval: Duration::from_millis(10),
            metrics: metrics.clone(),
        });
        (deleter, cleaner, metrics)
    }

    #[test(tokio::test)]
    async fn test_delete_reported_files() {
        let tempdir = tempfile::tempdir().unwrap();
        for n in 1..=3 {
            std::fs::write(tempdir.path().join(table_file_name(n)), b"table").unwrap();
        }
        let (deleter, mut cleaner, metrics) = build_cleaner_for_test(tempdir.path(), 2001, 1);

        deleter.on_obsolete(7, vec![file(1, 0), file(3, 1)]);
        deleter.on_obsolete(8, vec![]);
        deleter.shutdown();
        cleaner.run().await.unwrap();

        assert!(!tempdir.path().join(table_file_name(1)).exists());
        assert!(tempdir.path().join(table_file_name(2)).exists());
        assert!(!tempdir.path().join(table_file_name(3)).exists());
        assert_eq!(metrics.obsolete_files_deleted_counter.get(), 2);
        assert_eq!(metrics.obsolete_files_failed_counter.get(), 0);
    }

    #[test(tokio::test)]
    async fn test_missing_file_is_not_a_failure() {
        let tempdir = tempfile::tempdir().unwrap();
        let (deleter, mut cleaner, metrics) = build_cleaner_for_test(tempdir.path(), 2002, 1);
        deleter.delete_files(vec![42]);
        deleter.shutdown();
        cleaner.run().await.unwrap();
        assert_eq!(metrics.obsolete_files_deleted_counter.get(), 1);
        assert_eq!(metrics.obsolete_files_failed_counter.get(), 0);
    }

    #[test(tokio::test)]
    async fn test_give_up_after_retries() {
        let tempdir = tempfile::tempdir().unwrap();
        // A non-empty directory in place of the table file can not be removed as a file.
        let path = tempdir.path().join(table_file_name(5));
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("inner"), b"x").unwrap();

        let (deleter, mut cleaner, metrics) = build_cleaner_for_test(tempdir.path(), 2003, 2);
        deleter.delete_files(vec![5]);
        deleter.shutdown();
        cleaner.run().await.unwrap();

        assert!(path.exists());
        assert_eq!(metrics.obsolete_files_deleted_counter.get(), 0);
        assert_eq!(metrics.obsolete_files_failed_counter.get(), 1);
    }

    #[test(tokio::test)]
    async fn test_stops_when_deleter_dropped() {
        let tempdir = tempfile::tempdir().unwrap();
        let (deleter, mut cleaner, _) = build_cleaner_for_test(tempdir.path(), 2004, 0);
        drop(deleter);
        cleaner.run().await.unwrap();
    }
}
