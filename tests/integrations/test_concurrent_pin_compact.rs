use tan_tests::{run, Args, Options};
use test_log::test;

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_pin_compact() {
    let tempdir = tempfile::tempdir().unwrap();
    let options = Options {
        log: false,
        log_dir: tempdir.path().join("log").to_str().unwrap().to_string(),
        node: 10001,
        data_dir: tempdir.path().join("data"),
    };
    let args = Args {
        readers: 8,
        flushes: 200,
        compact_every: 7,
        seed: 0,
    };

    let report = run(args, options).await;

    assert!(report.pins >= 8);
    // 200 flushes and 28 compactions.
    assert_eq!(report.versions_installed, 228);
    // Flushes after the last compaction stay in L0 next to the single L1 table.
    assert_eq!(report.live_files.len(), 5);
    assert_eq!(report.files_on_disk, report.live_files);
}
