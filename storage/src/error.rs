use crate::manifest::ManifestError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("manifest error: {0}")]
    ManifestError(#[from] ManifestError),
    #[error("config error: {0}")]
    ConfigError(#[from] tan_common::config::ConfigError),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("other: {0}")]
    Other(String),
}

impl Error {
    pub fn other(e: impl Into<Box<dyn std::error::Error>>) -> Self {
        Self::Other(e.into().to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
