use std::sync::Arc;

use lazy_static::lazy_static;

lazy_static! {
    static ref LIVE_VERSIONS_GAUGE_VEC: prometheus::IntGaugeVec =
        prometheus::register_int_gauge_vec!(
            "version_set_live_versions_gauge_vec",
            "version set live versions gauge vec",
            &["node"]
        )
        .unwrap();
    static ref VERSION_COUNTER_VEC: prometheus::IntCounterVec =
        prometheus::register_int_counter_vec!(
            "version_set_version_counter_vec",
            "version set version counter vec",
            &["op", "node"]
        )
        .unwrap();
    static ref OBSOLETE_FILE_COUNTER_VEC: prometheus::IntCounterVec =
        prometheus::register_int_counter_vec!(
            "obsolete_file_counter_vec",
            "obsolete file counter vec",
            &["op", "node"]
        )
        .unwrap();
}

pub struct VersionSetMetrics {
    pub live_versions_gauge: prometheus::IntGauge,
    pub versions_installed_counter: prometheus::IntCounter,
    pub versions_retired_counter: prometheus::IntCounter,
    pub obsolete_files_reported_counter: prometheus::IntCounter,
    pub obsolete_files_deleted_counter: prometheus::IntCounter,
    pub obsolete_files_failed_counter: prometheus::IntCounter,
}

pub type VersionSetMetricsRef = Arc<VersionSetMetrics>;

impl VersionSetMetrics {
    pub fn new(node: u64) -> Self {
        let node = node.to_string();
        Self {
            live_versions_gauge: LIVE_VERSIONS_GAUGE_VEC
                .get_metric_with_label_values(&[&node])
                .unwrap(),
            versions_installed_counter: VERSION_COUNTER_VEC
                .get_metric_with_label_values(&["install", &node])
                .unwrap(),
            versions_retired_counter: VERSION_COUNTER_VEC
                .get_metric_with_label_values(&["retire", &node])
                .unwrap(),
            obsolete_files_reported_counter: OBSOLETE_FILE_COUNTER_VEC
                .get_metric_with_label_values(&["report", &node])
                .unwrap(),
            obsolete_files_deleted_counter: OBSOLETE_FILE_COUNTER_VEC
                .get_metric_with_label_values(&["delete", &node])
                .unwrap(),
            obsolete_files_failed_counter: OBSOLETE_FILE_COUNTER_VEC
                .get_metric_with_label_values(&["fail", &node])
                .unwrap(),
        }
    }
}
