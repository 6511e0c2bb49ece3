// Integration tests for the model cache manager

mod common;

#[cfg(test)]
mod model_manager_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use predicates::prelude::*;
    use vocalize_core::model::{CacheLayout, LegacySnapshotLayout, ModelCacheManager};
    use vocalize_core::VocalizeError;

    use super::common::{direct_dir, RecordingFetcher, Reply};

    const ONNX: &[u8] = b"kokoro onnx graph";
    const VOICES: &[u8] = b"kokoro voices archive";

    fn kokoro_fetcher() -> Arc<RecordingFetcher> {
        let fetcher = Arc::new(RecordingFetcher::new());
        fetcher.serve("kokoro-v1.0.onnx", Reply::Body(ONNX.to_vec()));
        fetcher.serve("voices-v1.0.bin", Reply::Body(VOICES.to_vec()));
        fetcher
    }

    fn manager(dir: &TempDir, fetcher: &Arc<RecordingFetcher>) -> ModelCacheManager {
        ModelCacheManager::new(dir.path()).with_fetcher(fetcher.clone())
    }

    #[test_log::test]
    fn test_fresh_cache_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let manager = ModelCacheManager::new(dir.path());

        for model in ["kokoro", "chatterbox", "dia"] {
            assert!(!manager.is_cached(model), "{model} should not be cached");
        }
        assert!(!manager.is_cached("unknown-model"));
        assert!(manager.resolve_path("kokoro", "kokoro-v1.0.onnx").is_none());
    }

    #[test_log::test]
    fn test_subset_of_files_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let manager = ModelCacheManager::new(dir.path());

        let local = dir.child("models--direct_download").child("local");
        local.child("kokoro-v1.0.onnx").write_binary(ONNX).unwrap();
        assert!(!manager.is_cached("kokoro"));
        assert_eq!(manager.missing_files("kokoro"), vec!["voices-v1.0.bin".to_string()]);
        assert!(manager.resolve_path("kokoro", "kokoro-v1.0.onnx").is_some());

        local.child("voices-v1.0.bin").write_binary(VOICES).unwrap();
        assert!(manager.is_cached("kokoro"));
        assert!(manager.missing_files("kokoro").is_empty());
    }

    #[test_log::test]
    fn test_second_ensure_available_is_offline() {
        let dir = TempDir::new().unwrap();
        let fetcher = kokoro_fetcher();
        let manager = manager(&dir, &fetcher);

        assert!(manager.ensure_available("kokoro"));
        assert_eq!(fetcher.request_count(), 2);
        dir.child("models--direct_download/local/kokoro-v1.0.onnx")
            .assert(predicate::path::is_file());

        assert!(manager.ensure_available("kokoro"));
        assert_eq!(fetcher.request_count(), 2, "second call must not touch the network");
    }

    #[test_log::test]
    fn test_interrupted_download_is_retried() {
        let dir = TempDir::new().unwrap();
        let fetcher = kokoro_fetcher();
        fetcher.serve("voices-v1.0.bin", Reply::CutOff(VOICES[..5].to_vec()));
        let manager = manager(&dir, &fetcher);

        assert!(!manager.ensure_available("kokoro"));
        assert!(!manager.is_cached("kokoro"));

        // Completed file kept, interrupted one left nowhere on disk.
        let local = direct_dir(dir.path());
        assert_eq!(std::fs::read(local.join("kokoro-v1.0.onnx")).unwrap(), ONNX);
        let leftovers: Vec<_> = std::fs::read_dir(&local)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["kokoro-v1.0.onnx".to_string()]);

        fetcher.serve("voices-v1.0.bin", Reply::Body(VOICES.to_vec()));
        let before = fetcher.request_count();
        let report = manager.download("kokoro", false).unwrap();

        assert_eq!(report.downloaded, vec!["voices-v1.0.bin".to_string()]);
        assert_eq!(report.skipped, vec!["kokoro-v1.0.onnx".to_string()]);
        assert_eq!(fetcher.request_count(), before + 1);
        assert!(manager.is_cached("kokoro"));
    }

    #[test_log::test]
    fn test_zero_byte_leftover_is_redownloaded() {
        let dir = TempDir::new().unwrap();
        let fetcher = kokoro_fetcher();
        let manager = manager(&dir, &fetcher);

        let local = dir.child("models--direct_download").child("local");
        local.child("kokoro-v1.0.onnx").write_binary(ONNX).unwrap();
        local.child("voices-v1.0.bin").touch().unwrap();
        assert!(!manager.is_cached("kokoro"));

        assert!(manager.ensure_available("kokoro"));
        assert_eq!(fetcher.requests().len(), 1);
        assert!(fetcher.requests()[0].ends_with("/voices-v1.0.bin"));
        local.child("voices-v1.0.bin").assert(VOICES);
    }

    #[test_log::test]
    fn test_force_redownloads_everything() {
        let dir = TempDir::new().unwrap();
        let fetcher = kokoro_fetcher();
        let manager = manager(&dir, &fetcher);

        manager.download("kokoro", false).unwrap();
        let report = manager.download("kokoro", true).unwrap();
        assert_eq!(report.downloaded.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(fetcher.request_count(), 4);
    }

    #[test_log::test]
    fn test_failed_forced_redownload_keeps_existing_copy() {
        let dir = TempDir::new().unwrap();
        let fetcher = kokoro_fetcher();
        let manager = manager(&dir, &fetcher);
        manager.download("kokoro", false).unwrap();

        fetcher.serve("kokoro-v1.0.onnx", Reply::CutOff(b"kok".to_vec()));
        let err = manager.download("kokoro", true).unwrap_err();
        assert!(matches!(err, VocalizeError::DownloadFailed { .. }));

        let local = dir.child("models--direct_download").child("local");
        local.child("kokoro-v1.0.onnx").assert(ONNX);
        assert!(manager.is_cached("kokoro"));
        let names: Vec<_> = std::fs::read_dir(local.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".part"))
            .collect();
        assert!(names.is_empty(), "partial files left behind: {names:?}");
    }

    #[test_log::test]
    fn test_failed_download_reports_file() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(RecordingFetcher::new());
        let manager = manager(&dir, &fetcher);

        let err = manager.try_ensure_available("kokoro").unwrap_err();
        match &err {
            VocalizeError::DownloadFailed { model_id, file, .. } => {
                assert_eq!(model_id, "kokoro");
                assert_eq!(file, "kokoro-v1.0.onnx");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_retriable());
        assert!(err.reaches_user());
    }

    #[test_log::test]
    fn test_registry_models_use_endpoint_urls() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(RecordingFetcher::new());
        for file in ["model.onnx", "config.json", "tokenizer.json"] {
            fetcher.serve(file, Reply::Body(b"{}".to_vec()));
        }
        let manager = manager(&dir, &fetcher).with_registry_endpoint("https://hub.example");

        assert!(manager.ensure_available("dia"));
        assert_eq!(
            fetcher.requests(),
            vec![
                "https://hub.example/microsoft/dia-en-large/resolve/main/model.onnx",
                "https://hub.example/microsoft/dia-en-large/resolve/main/config.json",
                "https://hub.example/microsoft/dia-en-large/resolve/main/tokenizer.json",
            ]
        );
        dir.child("models--microsoft--dia-en-large/local/config.json")
            .assert(predicate::path::is_file());
        assert_eq!(manager.locate("dia").unwrap().layout, "flat_local");
    }

    #[test_log::test]
    fn test_legacy_snapshot_layout() {
        let dir = TempDir::new().unwrap();
        let manager = ModelCacheManager::new(dir.path());
        let snapshot = dir.child("models--facebook--chatterbox-en/snapshots/0123abcd");
        snapshot.child("model.onnx").write_binary(b"graph").unwrap();
        snapshot.child("tokenizer.json").write_str("{}").unwrap();

        assert!(manager.is_cached("chatterbox"));
        let location = manager.locate("chatterbox").unwrap();
        assert_eq!(location.layout, LegacySnapshotLayout.name());
        assert_eq!(
            manager.resolve_path("chatterbox", "tokenizer.json").unwrap(),
            snapshot.path().join("tokenizer.json")
        );
    }

    #[test_log::test]
    fn test_snapshots_are_never_mixed() {
        let dir = TempDir::new().unwrap();
        let manager = ModelCacheManager::new(dir.path());
        let snapshots = dir.child("models--facebook--chatterbox-en/snapshots");
        snapshots.child("aaa/model.onnx").write_binary(b"graph").unwrap();
        snapshots.child("bbb/tokenizer.json").write_str("{}").unwrap();

        assert!(!manager.is_cached("chatterbox"));
        // Individual files still resolve.
        assert!(manager.resolve_path("chatterbox", "model.onnx").is_some());
        assert!(manager.resolve_path("chatterbox", "tokenizer.json").is_some());
    }

    #[test_log::test]
    fn test_flat_layout_wins_over_snapshot() {
        let dir = TempDir::new().unwrap();
        let manager = ModelCacheManager::new(dir.path());
        let model = dir.child("models--facebook--chatterbox-en");
        for sub in ["local", "snapshots/feed"] {
            model.child(sub).child("model.onnx").write_binary(b"graph").unwrap();
            model.child(sub).child("tokenizer.json").write_str("{}").unwrap();
        }

        let location = manager.locate("chatterbox").unwrap();
        assert_eq!(location.layout, "flat_local");
        assert_eq!(location.dir, model.path().join("local"));
    }

    #[test_log::test]
    fn test_clear_model_and_all() {
        let dir = TempDir::new().unwrap();
        let fetcher = kokoro_fetcher();
        let manager = manager(&dir, &fetcher);
        assert!(manager.ensure_available("kokoro"));
        dir.child("models--microsoft--dia-en-large/local/model.onnx")
            .write_binary(b"graph")
            .unwrap();

        assert!(manager.clear(Some("kokoro")));
        dir.child("models--direct_download").assert(predicate::path::missing());
        dir.child("models--microsoft--dia-en-large").assert(predicate::path::is_dir());

        assert!(!manager.clear(Some("no-such-model")));

        assert!(manager.clear(None));
        dir.assert(predicate::path::is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(!manager.is_cached("kokoro"));
    }

    #[test_log::test]
    fn test_cache_size() {
        let dir = TempDir::new().unwrap();
        let manager = ModelCacheManager::new(dir.path());
        assert_eq!(manager.cache_size(), "0.0 B");

        dir.child("models--direct_download/local/kokoro-v1.0.onnx")
            .write_binary(&vec![1u8; 2048])
            .unwrap();
        dir.child("models--facebook--chatterbox-en/snapshots/x/model.onnx")
            .write_binary(&vec![1u8; 1024])
            .unwrap();

        assert_eq!(manager.cache_size_bytes(), 3072);
        assert_eq!(manager.cache_size(), "3.0 KB");
    }

    #[test_log::test]
    fn test_status_and_listing() {
        let dir = TempDir::new().unwrap();
        let fetcher = kokoro_fetcher();
        let manager = manager(&dir, &fetcher);
        assert!(manager.ensure_available("kokoro"));

        let kokoro = manager.status("kokoro").unwrap();
        assert!(kokoro.cached);
        let location = kokoro.location.unwrap();
        assert_eq!(location.layout, "direct_download");
        assert_eq!(location.dir, direct_dir(dir.path()));

        let listing = manager.list_models();
        assert_eq!(listing.len(), 3);
        assert_eq!(listing.iter().filter(|s| s.cached).count(), 1);
        assert!(manager.status("nope").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ensure_available_async_times_out() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(RecordingFetcher::new());
        fetcher.serve(
            "kokoro-v1.0.onnx",
            Reply::Slow(ONNX.to_vec(), Duration::from_millis(500)),
        );
        fetcher.serve("voices-v1.0.bin", Reply::Body(VOICES.to_vec()));
        let manager = manager(&dir, &fetcher);

        let err = manager
            .ensure_available_async("kokoro", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, VocalizeError::TimeoutError { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ensure_available_async_downloads() {
        let dir = TempDir::new().unwrap();
        let fetcher = kokoro_fetcher();
        let manager = manager(&dir, &fetcher);

        let location = manager
            .ensure_available_async("kokoro", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(location.dir, direct_dir(dir.path()));
        assert!(manager.is_cached("kokoro"));
    }
}
