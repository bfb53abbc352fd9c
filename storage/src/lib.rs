mod error;
pub use error::*;
mod lsm_tree;
pub use lsm_tree::*;
