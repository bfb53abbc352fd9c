use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::NodeHostConfig;

/// A storage engine instance persisting raft logs for every shard hosted by the node.
#[async_trait]
pub trait LogDb: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn close(self: Box<Self>) -> anyhow::Result<()>;
}

/// Pluggable constructor of the storage engine, selected through [`NodeHostConfig`].
#[async_trait]
pub trait LogDbFactory: Send + Sync + Debug + 'static {
    fn name(&self) -> &str;

    async fn create(&self, config: &NodeHostConfig) -> anyhow::Result<Box<dyn LogDb>>;
}

pub type LogDbFactoryRef = Arc<dyn LogDbFactory>;
