use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tan_storage::manifest::table_file_name;
use tan_storage::Engine;
use tan_tests::{
    compact, create_table, engine_options, flush, key, recover_file, table_files_on_disk,
};
use test_log::test;

#[test(tokio::test)]
async fn test_reopen_keeps_live_files_and_deletes_stray_ones() {
    let tempdir = tempfile::tempdir().unwrap();
    let dir = tempdir.path();
    let mut rng = StdRng::seed_from_u64(42);

    let mut engine = Engine::open(engine_options(10002, dir)).await.unwrap();
    for _ in 0..3 {
        flush(engine.version_set(), dir, &mut rng);
    }
    compact(engine.version_set(), dir);
    flush(engine.version_set(), dir, &mut rng);
    let current = engine.pin().unwrap();
    let files = current
        .iter_files()
        .map(|(_, file)| recover_file(file))
        .collect_vec();
    let next_file_number = engine.version_set().next_file_number();
    drop(current);
    engine.close().await.unwrap();
    // Tables 1-3 were compacted into 4, table 5 is the last flush.
    assert_eq!(table_files_on_disk(dir), [4, 5].into_iter().collect());

    // A table written by a flush whose edit never made it into the manifest.
    create_table(dir, 100, 0, key(1), key(2));

    let mut options = engine_options(10002, dir);
    options.files = files;
    options.next_file_number = next_file_number;
    let mut engine = Engine::open(options).await.unwrap();
    assert_eq!(engine.version_set().latest_version_id(), 1);
    assert_eq!(
        engine.version_set().live_file_numbers(),
        [4, 5].into_iter().collect()
    );
    assert_eq!(engine.new_file_number(), 101);

    {
        let version = engine.pin().unwrap();
        assert_eq!(version.files(0).len(), 1);
        assert_eq!(version.files(1).len(), 1);
    }
    compact(engine.version_set(), dir);
    engine.close().await.unwrap();

    assert!(!dir.join(table_file_name(100)).exists());
    assert_eq!(table_files_on_disk(dir), [102].into_iter().collect());
}
