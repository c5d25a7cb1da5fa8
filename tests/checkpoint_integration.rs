//! End-to-end resume scenario: start a run over three files, complete one,
//! simulate an interrupt, then resume and finish the rest.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use vulnhuntr::checkpoint::CheckpointStore;

fn tmp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "vulnhuntr-resume-it-{}-{}",
        std::process::id(),
        rand_suffix()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn rand_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[tokio::test]
async fn resume_after_interrupt_completes_remaining_files() {
    let dir = tmp_dir();
    let files = vec![
        PathBuf::from("a.py"),
        PathBuf::from("b.py"),
        PathBuf::from("c.py"),
    ];

    // First run: complete a.py, then "interrupt" (drop without finalizing).
    {
        let mut store = CheckpointStore::start(
            dir.clone(),
            PathBuf::from("/repo"),
            files.clone(),
            "claude-sonnet-4-20250514".into(),
            None,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        store.mark_file_complete(&files[0], None);
        store.save().unwrap();
    }

    assert!(CheckpointStore::can_resume(&dir));

    // Second run: resume and observe the completed/pending partition.
    let (mut store, _tracker) =
        CheckpointStore::resume(dir.clone(), Arc::new(AtomicBool::new(false))).unwrap();
    assert_eq!(store.completed(), &[files[0].clone()]);
    assert_eq!(store.pending(), &files[1..]);

    for f in &files[1..] {
        store.mark_file_complete(f, None);
    }
    store.finalize(true).unwrap();

    assert!(!CheckpointStore::can_resume(&dir));
    assert!(!dir.join("checkpoint.json").exists());
}

#[tokio::test]
async fn partial_completion_preserves_checkpoint_on_finalize() {
    let dir = tmp_dir();
    let files = vec![PathBuf::from("a.py"), PathBuf::from("b.py")];

    let mut store = CheckpointStore::start(
        dir.clone(),
        PathBuf::from("/repo"),
        files.clone(),
        "claude-sonnet-4-20250514".into(),
        None,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();
    store.mark_file_complete(&files[0], None);
    store.finalize(false).unwrap();

    assert!(CheckpointStore::can_resume(&dir));
    let (resumed, _) = CheckpointStore::resume(dir, Arc::new(AtomicBool::new(false))).unwrap();
    assert_eq!(resumed.completed(), &[files[0].clone()]);
    assert_eq!(resumed.pending(), &[files[1].clone()]);
}
