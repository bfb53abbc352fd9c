#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("level not exists: [idx: {0}] [total: {1}]")]
    LevelNotExists(usize, usize),
    #[error("invalid version edit: {0}")]
    InvalidVersionEdit(String),
    #[error("versions still referenced: [live: {live}] [current refs: {current_refs}]")]
    VersionsStillReferenced { live: usize, current_refs: usize },
    #[error("version set closed")]
    Closed,
}
