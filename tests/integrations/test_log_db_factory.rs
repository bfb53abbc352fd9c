use std::str::FromStr;
use std::sync::Arc;

use tan_common::config::NodeHostConfig;
use tan_storage::{TanLogDbFactory, ENGINE_NAME};
use test_log::test;

#[test(tokio::test)]
async fn test_log_db_factory() {
    let tempdir = tempfile::tempdir().unwrap();
    let wal_dir = tempdir.path().join("wal");
    let s = format!(
        r#"
        node_host_dir = "{}"
        wal_dir = "{}"
        rtt_millisecond = 200
        raft_address = "localhost:9010"

        [expert.log_db]
        shards = 2
        kv_write_buffer_size = "4 MiB"
        kv_max_write_buffer_number = 2
        kv_lru_cache_size = "8 MiB"
        kv_max_background_compactions = 1
        kv_num_of_levels = 3
        obsolete_file_retry_attempts = 1
        obsolete_file_retry_interval = "10ms"
        "#,
        tempdir.path().to_str().unwrap(),
        wal_dir.to_str().unwrap(),
    );
    let mut config = NodeHostConfig::from_str(&s).unwrap();
    config.expert.log_db_factory = Some(Arc::new(TanLogDbFactory { node: 10003 }));
    config.validate().unwrap();

    let factory = config.log_db_factory().unwrap();
    let db = factory.create(&config).await.unwrap();
    assert_eq!(db.name(), ENGINE_NAME);
    assert!(wal_dir.join(ENGINE_NAME).is_dir());
    db.close().await.unwrap();
}
