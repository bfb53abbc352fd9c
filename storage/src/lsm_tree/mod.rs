pub mod components;
mod engine;
pub mod manifest;
mod obsolete_file_cleaner;

pub use engine::*;
pub use obsolete_file_cleaner::*;
