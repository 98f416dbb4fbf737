use folder_transfer::{
    EngineConfig, FileEntry, FolderDownloadRequest, JobEvent, JobManager, JobState, JobStatus,
    LocalBackend, MemoryBackend,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const KB: u64 = 1024;

fn manager(backend: &Arc<MemoryBackend>) -> JobManager {
    JobManager::new(backend.clone(), EngineConfig::default()).unwrap()
}

fn request(source: &str, dest: &tempfile::TempDir) -> FolderDownloadRequest {
    FolderDownloadRequest::new(source, "out", dest.path().to_string_lossy().to_string())
}

async fn collect_until_terminal(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = matches!(event, JobEvent::Completed(_) | JobEvent::Failed { .. });
        events.push(event);
        if done {
            break;
        }
    }
    events
}

fn progress_snapshots(events: &[JobEvent]) -> Vec<&JobState> {
    events
        .iter()
        .filter_map(|event| match event {
            JobEvent::Progress(state) => Some(state),
            _ => None,
        })
        .collect()
}

fn terminal_state(events: &[JobEvent]) -> &JobState {
    match events.last() {
        Some(JobEvent::Completed(state)) => state,
        Some(JobEvent::Failed { snapshot, .. }) => snapshot,
        other => panic!("expected terminal event, got {:?}", other),
    }
}

fn assert_invariants(states: &[&JobState]) {
    let mut last_percent = 0;
    for state in states {
        assert!(state.completed_files <= state.total_files, "{:?}", state);
        assert!(state.downloaded_bytes <= state.total_bytes, "{:?}", state);
        if state.status == JobStatus::Downloading {
            assert!(state.progress_percent >= last_percent, "{:?}", state);
            last_percent = state.progress_percent;
        }
    }
}

fn docs_tree() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_file("docs/a.txt", 10 * KB);
    backend.add_file("docs/b.txt", 20 * KB);
    backend.add_file("docs/c.txt", 30 * KB);
    backend.add_file("docs/img/x.png", 5 * KB);
    backend.add_file("docs/img/y.png", 5 * KB);
    backend
}

#[tokio::test(start_paused = true)]
async fn docs_folder_downloads_with_growing_totals() {
    let backend = docs_tree();
    backend.set_default_delay(Duration::from_millis(20));
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(request("docs", &dest), tx);

    match rx.try_recv() {
        Ok(JobEvent::Started(state)) => {
            assert_eq!(state.job_id, job_id);
            assert_eq!(state.status, JobStatus::Preparing);
            assert_eq!(state.total_files, 0);
        }
        other => panic!("expected Started before submit_job returned, got {:?}", other),
    }

    let events = collect_until_terminal(&mut rx).await;
    let progress = progress_snapshots(&events);
    assert_invariants(&progress);

    let first_batch = progress
        .iter()
        .position(|s| s.total_files == 3 && s.total_bytes == 60 * KB)
        .expect("totals after scanning docs/");
    let second_batch = progress
        .iter()
        .position(|s| s.total_files == 5 && s.total_bytes == 70 * KB)
        .expect("totals after scanning docs/img/");
    assert!(first_batch < second_batch);
    assert!(progress[second_batch].progress_percent >= progress[second_batch - 1].progress_percent);

    let file_completions = events
        .iter()
        .filter(|e| matches!(e, JobEvent::FileComplete { .. }))
        .count();
    assert_eq!(file_completions, 5);

    let last = terminal_state(&events);
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.completed_files, 5);
    assert_eq!(last.downloaded_bytes, 70 * KB);
    assert_eq!(last.progress_percent, 100);
    assert!(last.end_time.is_some());
    assert_eq!(manager.get_job_state(&job_id).unwrap(), *last);
}

#[tokio::test(start_paused = true)]
async fn never_more_than_five_transfers_in_flight() {
    let backend = Arc::new(MemoryBackend::new());
    for i in 0..12u64 {
        let path = format!("bulk/file-{:02}.bin", i);
        backend.add_file(&path, 100);
        backend.set_delay(&path, Duration::from_millis(10 + (i * 7) % 40));
    }
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(request("bulk", &dest), tx);
    let events = collect_until_terminal(&mut rx).await;

    assert_eq!(backend.max_in_flight(), 5);
    assert_eq!(backend.started_transfers(), 12);
    assert_eq!(terminal_state(&events).completed_files, 12);
    assert_eq!(
        manager.wait_for_job(&job_id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn custom_concurrency_is_respected() {
    let backend = Arc::new(MemoryBackend::new());
    for i in 0..6 {
        backend.add_file(&format!("bulk/{}.bin", i), 1);
    }
    backend.set_default_delay(Duration::from_millis(5));
    let config = EngineConfig {
        concurrency: 2,
        ..EngineConfig::default()
    };
    let manager = JobManager::new(backend.clone(), config).unwrap();
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(request("bulk", &dest), tx);
    let state = manager.wait_for_job(&job_id).await.unwrap();

    assert_eq!(state.completed_files, 6);
    assert_eq!(backend.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_lets_in_flight_transfers_finish_and_starts_nothing_new() {
    let backend = Arc::new(MemoryBackend::new());
    for i in 0..12 {
        backend.add_file(&format!("bulk/{}.bin", i), 10);
    }
    backend.set_default_delay(Duration::from_millis(100));
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(request("bulk", &dest), tx);
    while backend.in_flight() < 5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let started = backend.started_transfers();
    assert!(manager.cancel_job(&job_id));
    assert_eq!(
        manager.get_job_state(&job_id).unwrap().status,
        JobStatus::Cancelled
    );
    assert!(manager.list_active_jobs().is_empty());

    let events = collect_until_terminal(&mut rx).await;
    let last = terminal_state(&events);
    assert_eq!(last.status, JobStatus::Cancelled);
    assert!(!events.iter().any(|e| matches!(e, JobEvent::Failed { .. })));
    // Transfers finishing after the cancel are not reported
    let file_completions = events
        .iter()
        .filter(|e| matches!(e, JobEvent::FileComplete { .. }))
        .count() as u64;
    assert_eq!(file_completions, last.completed_files);
    assert_eq!(file_completions, 0);

    manager.wait_for_job(&job_id).await.unwrap();
    assert_eq!(backend.started_transfers(), started);
    assert_eq!(backend.in_flight(), 0);
    assert_eq!(backend.transferred().len(), started);

    // Idempotent
    assert!(!manager.cancel_job(&job_id));
    assert_eq!(
        manager.get_job_state(&job_id).unwrap().status,
        JobStatus::Cancelled
    );
}

#[tokio::test(start_paused = true)]
async fn stop_all_halts_jobs_then_clears_itself() {
    let backend = Arc::new(MemoryBackend::new());
    for i in 0..10 {
        backend.add_file(&format!("one/{}.bin", i), 10);
        backend.add_file(&format!("two/{}.bin", i), 10);
    }
    backend.set_default_delay(Duration::from_millis(50));
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let first = manager.submit_job(request("one", &dest), tx.clone());
    let second = manager.submit_job(
        FolderDownloadRequest::new("two", "other", dest.path().to_string_lossy().to_string()),
        tx.clone(),
    );
    while backend.in_flight() < 10 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    manager.stop_all_jobs();
    assert!(manager.is_service_stopped());

    let first_state = manager.wait_for_job(&first).await.unwrap();
    let second_state = manager.wait_for_job(&second).await.unwrap();
    assert_eq!(first_state.status, JobStatus::Stopped);
    assert_eq!(second_state.status, JobStatus::Stopped);
    assert!(first_state.completed_files < 10);
    assert_eq!(backend.cancel_all_calls(), 1);
    assert!(!manager.is_service_stopped());

    // A later job is not blocked
    let third = manager.submit_job(
        FolderDownloadRequest::new("one", "again", dest.path().to_string_lossy().to_string()),
        tx,
    );
    let third_state = manager.wait_for_job(&third).await.unwrap();
    assert_eq!(third_state.status, JobStatus::Completed);
    assert_eq!(third_state.completed_files, 10);
}

#[tokio::test]
async fn stop_all_without_active_jobs_does_not_stick() {
    let backend = docs_tree();
    let manager = manager(&backend);

    manager.stop_all_jobs();
    assert!(!manager.is_service_stopped());

    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let job_id = manager.submit_job(request("docs", &dest), tx);
    let state = manager.wait_for_job(&job_id).await.unwrap();
    assert_eq!(state.status, JobStatus::Completed);
}

#[tokio::test]
async fn pagination_without_marker_stops_after_fetched_page() {
    let backend = Arc::new(MemoryBackend::new());
    for name in ["a", "b", "c", "d", "e"] {
        backend.add_file(&format!("docs/{}.txt", name), 1);
    }
    backend.set_max_page_size(2);
    backend.break_pagination("docs");
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(request("docs", &dest), tx);
    let state = manager.wait_for_job(&job_id).await.unwrap();

    assert_eq!(backend.list_calls(), 1);
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.total_files, 2);
    assert_eq!(state.completed_files, 2);
}

#[tokio::test]
async fn pagination_is_drained_before_descending() {
    let backend = Arc::new(MemoryBackend::new());
    for name in ["a", "b", "c", "d", "e"] {
        backend.add_file(&format!("docs/{}.txt", name), 1);
    }
    backend.add_file("docs/sub/z.txt", 1);
    backend.set_max_page_size(2);
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(request("docs", &dest), tx);
    let state = manager.wait_for_job(&job_id).await.unwrap();

    // docs/ needs three pages (2 + 2 + 2 entries), docs/sub one
    assert_eq!(backend.list_calls(), 4);
    assert_eq!(state.total_files, 6);
    assert_eq!(state.completed_files, 6);
}

#[tokio::test]
async fn failed_listing_skips_only_that_directory() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_file("docs/a.txt", 1);
    backend.add_file("docs/bad/hidden.txt", 1);
    backend.add_file("docs/good/seen.txt", 1);
    backend.fail_listing("docs/bad");
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(request("docs", &dest), tx);
    let state = manager.wait_for_job(&job_id).await.unwrap();

    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.total_files, 2);
    let mut transferred = backend.transferred();
    transferred.sort();
    assert_eq!(transferred, vec!["docs/a.txt", "docs/good/seen.txt"]);
}

#[tokio::test]
async fn failed_transfer_is_recorded_and_job_completes() {
    let backend = docs_tree();
    backend.fail_transfer("docs/b.txt");
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager.submit_job(request("docs", &dest), tx);
    let events = collect_until_terminal(&mut rx).await;
    assert_invariants(&progress_snapshots(&events));

    let last = terminal_state(&events);
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.total_files, 5);
    assert_eq!(last.completed_files, 4);
    assert_eq!(last.failed_files, 1);
    assert_eq!(last.failed_paths, vec!["docs/b.txt".to_string()]);
    assert_eq!(last.downloaded_bytes, 50 * KB);
    assert_eq!(last.progress_percent, 100);
    assert!(last.error.is_none());
}

#[tokio::test]
async fn unusable_destination_fails_the_job() {
    let backend = docs_tree();
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let blocker = dest.path().join("blocker");
    std::fs::write(&blocker, b"file, not a directory").unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(
        FolderDownloadRequest::new("docs", "out", blocker.to_string_lossy().to_string()),
        tx,
    );
    let events = collect_until_terminal(&mut rx).await;

    match events.last() {
        Some(JobEvent::Failed { snapshot, error }) => {
            assert_eq!(snapshot.status, JobStatus::Error);
            assert!(error.contains("Failed to create destination"), "{}", error);
            assert_eq!(snapshot.error.as_deref(), Some(error.as_str()));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(backend.list_calls(), 0);
    assert_eq!(
        manager.get_job_state(&job_id).unwrap().status,
        JobStatus::Error
    );
}

#[tokio::test]
async fn empty_destination_and_bad_folder_name_are_rejected() {
    let backend = docs_tree();
    let manager = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    let empty_dest = manager.submit_job(FolderDownloadRequest::new("docs", "out", "  "), tx.clone());
    let bad_name = manager.submit_job(FolderDownloadRequest::new("docs", "../up", "/tmp"), tx);

    let empty_dest = manager.wait_for_job(&empty_dest).await.unwrap();
    let bad_name = manager.wait_for_job(&bad_name).await.unwrap();
    assert_eq!(empty_dest.status, JobStatus::Error);
    assert_eq!(bad_name.status, JobStatus::Error);
    assert!(bad_name.error.unwrap().contains("single path segment"));
}

#[tokio::test]
async fn non_recursive_job_skips_subdirectories() {
    let backend = docs_tree();
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(request("docs", &dest).recursive(false), tx);
    let state = manager.wait_for_job(&job_id).await.unwrap();

    assert_eq!(backend.list_calls(), 1);
    assert_eq!(state.total_files, 3);
    assert_eq!(state.total_bytes, 60 * KB);
    assert!(!state.recursive);
}

#[tokio::test]
async fn seed_entries_replace_the_root_listing() {
    let backend = docs_tree();
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let seed = vec![
        FileEntry::file("docs/a.txt", "a.txt", 10 * KB),
        FileEntry::directory("docs/img", "img"),
    ];
    let job_id = manager.submit_job(request("docs", &dest).with_seed_entries(seed), tx);
    let state = manager.wait_for_job(&job_id).await.unwrap();

    assert_eq!(backend.list_calls(), 1);
    assert_eq!(state.total_files, 3);
    assert_eq!(state.total_bytes, 20 * KB);
    assert_eq!(state.completed_files, 3);
}

#[tokio::test]
async fn files_land_under_destination_and_folder_name() {
    let backend = docs_tree();
    backend.set_write_files(true);
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager.submit_job(request("docs", &dest), tx);
    let events = collect_until_terminal(&mut rx).await;

    let out = dest.path().join("out");
    assert_eq!(std::fs::metadata(out.join("a.txt")).unwrap().len(), 10 * KB);
    assert_eq!(std::fs::metadata(out.join("img/y.png")).unwrap().len(), 5 * KB);

    let dests: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::FileComplete { dest_path, .. } => Some(dest_path.clone()),
            _ => None,
        })
        .collect();
    assert!(dests.contains(&out.join("img").join("x.png")));
}

#[tokio::test]
async fn scheme_prefixed_source_keeps_nested_layout() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_file("mem://store/docs/a.txt", 3);
    backend.add_file("mem://store/docs/img/a.txt", 7);
    backend.add_file("mem://store/docs/img/raw/x.png", 11);
    backend.set_write_files(true);
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(request("mem://store/docs", &dest), tx);
    let state = manager.wait_for_job(&job_id).await.unwrap();

    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.completed_files, 3);
    let out = dest.path().join("out");
    assert_eq!(std::fs::metadata(out.join("a.txt")).unwrap().len(), 3);
    assert_eq!(std::fs::metadata(out.join("img/a.txt")).unwrap().len(), 7);
    assert_eq!(std::fs::metadata(out.join("img/raw/x.png")).unwrap().len(), 11);
    assert!(!out.join("x.png").exists());
}

#[tokio::test]
async fn local_backend_copies_a_tree() {
    let src = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("photos/2024")).unwrap();
    std::fs::write(src.path().join("photos/cover.jpg"), vec![1u8; 64]).unwrap();
    std::fs::write(src.path().join("photos/2024/jan.jpg"), vec![2u8; 128]).unwrap();
    let backend = Arc::new(LocalBackend::new(src.path()));
    let manager = JobManager::new(backend, EngineConfig::default()).unwrap();
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let job_id = manager.submit_job(
        FolderDownloadRequest::new("photos", "photos", dest.path().to_string_lossy().to_string()),
        tx,
    );
    let state = manager.wait_for_job(&job_id).await.unwrap();

    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.total_files, 2);
    assert_eq!(state.downloaded_bytes, 192);
    assert_eq!(
        std::fs::read(dest.path().join("photos/2024/jan.jpg")).unwrap(),
        vec![2u8; 128]
    );
}

#[tokio::test]
async fn registry_lists_newest_first_and_removes_on_request() {
    let backend = docs_tree();
    backend.set_default_delay(Duration::from_millis(20));
    let manager = manager(&backend);
    let dest = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let older = manager.submit_job(request("docs", &dest), tx.clone());
    let newer = manager.submit_job(
        FolderDownloadRequest::new("docs", "copy", dest.path().to_string_lossy().to_string()),
        tx,
    );

    let active: Vec<String> = manager
        .list_active_jobs()
        .into_iter()
        .map(|s| s.job_id)
        .collect();
    assert_eq!(active, vec![newer.clone(), older.clone()]);

    // Snapshots are copies
    let mut snapshot = manager.get_job_state(&older).unwrap();
    snapshot.total_files = 999;
    assert_ne!(manager.get_job_state(&older).unwrap().total_files, 999);

    manager.wait_for_job(&older).await.unwrap();
    manager.wait_for_job(&newer).await.unwrap();
    assert!(manager.list_active_jobs().is_empty());
    assert_eq!(manager.list_jobs().len(), 2);

    assert!(manager.remove_job(&older));
    assert!(!manager.remove_job(&older));
    assert!(manager.get_job_state(&older).is_none());
    assert_eq!(manager.clear_finished_jobs(), 1);
    assert!(manager.list_jobs().is_empty());
    assert!(manager.wait_for_job(&newer).await.is_none());
}

#[tokio::test]
async fn unknown_job_operations_are_no_ops() {
    let backend = docs_tree();
    let manager = manager(&backend);

    assert!(!manager.cancel_job("missing"));
    assert!(manager.get_job_state("missing").is_none());
    assert!(!manager.remove_job("missing"));
}

#[test]
fn zero_concurrency_config_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let config = EngineConfig {
        concurrency: 0,
        ..EngineConfig::default()
    };
    assert!(JobManager::new(backend, config).is_err());
}
