use super::types::{TaskId, UploadMode, UploadOptions, UploadStatus, UploadTask};
use super::errors::UploadError;

#[test]
fn test_upload_status_transition() {
    use UploadStatus::*;

    // valid
    assert!(Enqueued.can_transition_to(Running));
    assert!(Enqueued.can_transition_to(Paused));
    assert!(Running.can_transition_to(Completed));
    assert!(Running.can_transition_to(Paused));
    assert!(Paused.can_transition_to(Enqueued));
    assert!(Failed.can_transition_to(Enqueued));

    // invalid
    assert!(!Canceled.can_transition_to(Enqueued));
    assert!(!Canceled.can_transition_to(Running));
    assert!(!Completed.can_transition_to(Running));
    assert!(!Failed.can_transition_to(Running));
    assert!(!Enqueued.can_transition_to(Completed));
}

#[test]
fn test_terminal_states() {
    assert!(UploadStatus::Completed.is_terminal());
    assert!(UploadStatus::Failed.is_terminal());
    assert!(UploadStatus::Canceled.is_terminal());
    assert!(!UploadStatus::Paused.is_terminal());
    assert!(!UploadStatus::Running.is_terminal());
}

#[test]
fn test_task_id_generation() {
    let id1 = TaskId::new();
    let id2 = TaskId::new();

    assert_ne!(id1, id2);
    assert!(!id1.to_string().is_empty());
    assert!(TaskId::from("  ").is_empty());
}

#[test]
fn test_options_defaults() {
    let options = UploadOptions::new("/data/photo.jpg", "https://example.com/upload");

    assert_eq!(options.mode, UploadMode::Direct);
    assert_eq!(options.chunk_size, 1024 * 1024);
    assert_eq!(options.max_parallel_uploads, 2);
    assert_eq!(options.max_retries, 3);
    assert!(options.adaptive_network);
    assert!(options.show_notification);
    assert_eq!(options.file_name(), "photo.jpg");
    assert!(options.validate().is_ok());
}

#[test]
fn test_options_validation() {
    let base = UploadOptions::new("/data/photo.jpg", "https://example.com/upload");

    let bad = [
        UploadOptions::new("/data/photo.jpg", "not a url"),
        UploadOptions::new("/data/photo.jpg", "ftp://example.com/upload"),
        base.clone().chunked(0),
        base.clone().max_parallel_uploads(0),
        base.clone().header("bad header", "x"),
    ];

    for options in bad {
        assert!(
            matches!(options.validate(), Err(UploadError::InvalidConfig(_))),
            "accepted {:?}",
            options
        );
    }
}

#[test]
fn test_for_file_keeps_settings() {
    let template = UploadOptions::new("/data/a.bin", "https://example.com/upload")
        .chunked(4096)
        .field("album", "holiday");
    let other = template.for_file("/data/b.bin");

    assert_eq!(other.file_name(), "b.bin");
    assert_eq!(other.chunk_size, 4096);
    assert_eq!(other.mode, UploadMode::Chunked);
    assert_eq!(other.extra_fields, template.extra_fields);
}

#[test]
fn test_snapshot_reflects_record() {
    let options = UploadOptions::new("/data/a.bin", "https://example.com/upload");
    let mut task = UploadTask::new(TaskId::from("task-1"), options);
    task.progress = 40;
    task.error = Some("Server error: status code 500".to_string());

    let snapshot = task.snapshot();
    assert_eq!(snapshot.task_id, TaskId::from("task-1"));
    assert_eq!(snapshot.status, UploadStatus::Enqueued);
    assert_eq!(snapshot.progress, 40);
    assert_eq!(snapshot.error_message.as_deref(), Some("Server error: status code 500"));
}
