mod metrics;

pub use metrics::*;
