use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use tan_common::config::{LevelOptions, LogDbConfig, NodeHostConfig};
use tan_common::logdb::{LogDb, LogDbFactory};
use tan_common::Worker;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::components::{VersionSetMetrics, VersionSetMetricsRef};
use crate::manifest::{
    parse_table_file_name, FileMetadataRef, PinnedVersion, VersionEdit, VersionSet,
    VersionSetOptions,
};
use crate::{
    obsolete_file_cleaner, Error, ObsoleteFileCleanerOptions, ObsoleteFileDeleter, Result,
};

pub const ENGINE_NAME: &str = "tan";

pub struct EngineOptions {
    pub node: u64,
    /// Directory holding the table files.
    pub dir: PathBuf,
    pub levels_options: Vec<LevelOptions>,
    /// Files of the last installed version, as recovered by the caller.
    pub files: Vec<FileMetadataRef>,
    pub next_file_number: u64,
    pub obsolete_file_retry_attempts: usize,
    pub obsolete_file_retry_interval: Duration,
}

impl EngineOptions {
    pub fn from_config(node: u64, dir: impl Into<PathBuf>, config: &LogDbConfig) -> Self {
        Self {
            node,
            dir: dir.into(),
            levels_options: config.levels_options(),
            files: vec![],
            next_file_number: 1,
            obsolete_file_retry_attempts: config.obsolete_file_retry_attempts,
            obsolete_file_retry_interval: config.obsolete_file_retry_interval,
        }
    }
}

/// Open storage engine: the version set plus the task removing obsolete table files.
pub struct Engine {
    dir: PathBuf,
    version_set: VersionSet,
    deleter: Arc<ObsoleteFileDeleter>,
    cleaner: Option<JoinHandle<()>>,
}

impl Engine {
    /// Must be called within a tokio runtime.
    pub async fn open(options: EngineOptions) -> Result<Self> {
        tokio::fs::create_dir_all(&options.dir).await?;

        let metrics: VersionSetMetricsRef = Arc::new(VersionSetMetrics::new(options.node));
        let (deleter, mut cleaner) = obsolete_file_cleaner(ObsoleteFileCleanerOptions {
            dir: options.dir.clone(),
            retry_attempts: options.obsolete_file_retry_attempts,
            retry_interval: options.obsolete_file_retry_interval,
            metrics: metrics.clone(),
        });
        let deleter = Arc::new(deleter);

        let version_set = VersionSet::new(VersionSetOptions {
            node: options.node,
            levels_options: options.levels_options,
            files: options.files,
            next_file_number: options.next_file_number,
            sink: deleter.clone(),
            metrics,
        })?;

        let cleaner = tokio::spawn(async move {
            if let Err(e) = cleaner.run().await {
                warn!("obsolete file cleaner exits with error: {}", e);
            }
        });

        let engine = Self {
            dir: options.dir,
            version_set,
            deleter,
            cleaner: Some(cleaner),
        };
        engine.delete_stray_files().await?;
        info!("engine of node {} opened at {:?}", options.node, engine.dir);
        Ok(engine)
    }

    /// Schedule table files on disk that no live version includes.
    async fn delete_stray_files(&self) -> Result<()> {
        let live = self.version_set.live_file_numbers();
        let mut stray = vec![];
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(file_number) = name.to_str().and_then(parse_table_file_name) {
                self.version_set.mark_file_number_used(file_number);
                if !live.contains(&file_number) {
                    stray.push(file_number);
                }
            }
        }
        if !stray.is_empty() {
            stray.sort_unstable();
            info!("found stray table files: {:?}", stray);
            self.deleter.delete_files(stray);
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version_set(&self) -> &VersionSet {
        &self.version_set
    }

    /// Reference the current version for reading.
    pub fn pin(&self) -> Result<PinnedVersion> {
        self.version_set.current()
    }

    pub fn apply_edit(&self, edit: VersionEdit) -> Result<u64> {
        self.version_set.apply_edit(edit)
    }

    pub fn new_file_number(&self) -> u64 {
        self.version_set.new_file_number()
    }

    /// Close the version set, then drain and stop the cleaner.
    ///
    /// Fails, leaving the engine open, while any pinned version is outstanding. Closing twice is
    /// a no-op.
    pub async fn close(&mut self) -> Result<()> {
        self.version_set.close()?;
        if let Some(cleaner) = self.cleaner.take() {
            self.deleter.shutdown();
            cleaner.await.map_err(Error::other)?;
            info!("engine at {:?} closed", self.dir);
        }
        Ok(())
    }
}

#[async_trait]
impl LogDb for Engine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        let mut engine = *self;
        Engine::close(&mut engine).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TanLogDbFactory {
    pub node: u64,
}

#[async_trait]
impl LogDbFactory for TanLogDbFactory {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn create(&self, config: &NodeHostConfig) -> anyhow::Result<Box<dyn LogDb>> {
        let mut config = config.clone();
        config.prepare()?;
        let dir = Path::new(config.wal_dir()).join(ENGINE_NAME);
        let options = EngineOptions::from_config(self.node, dir, &config.expert.log_db);
        info!(
            "create {} engine: [levels: {:?}]",
            ENGINE_NAME,
            options
                .levels_options
                .iter()
                .map(|o| o.compaction_strategy)
                .collect_vec()
        );
        let engine = Engine::open(options).await?;
        Ok(Box::new(engine))
    }
}
