#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use common::{EngineMode, FakeDesktop, FakeEngine, settle, start};
use fetchforge::downloader::models::stage;
use fetchforge::downloader::{FetchError, FileStatus, ImportMode, ResumeStatus, Task, TaskStatus};

#[tokio::test]
async fn test_submit_dedups_and_downloads() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;

    let created = manager
        .submit("grab this https://example.com/a and also https://example.com/a again")
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].url, "https://example.com/a");
    assert_eq!(created[0].status, TaskStatus::Queued);
    assert_eq!(created[0].stage, stage::PARSE_URL);

    settle(&manager).await;

    let task = manager.task(&created[0].id).unwrap();
    assert_eq!(task.status, TaskStatus::Success, "{}", task.error_message);
    assert_eq!(task.stage, stage::FINALIZE);
    assert_eq!(task.progress, "100%");
    // 链接推导出的标题不是占位，元数据不会覆盖它
    assert_eq!(task.title, "a");
    assert_eq!(task.duration, 12);
    assert_eq!((task.width, task.height), (1280, 720));
    assert_eq!(task.filesize, "fake media".len() as u64);
    assert!(task.output_path.ends_with("Clip a.mp4"));
    assert!(!task.missing_output);
    assert!(task.error_message.is_empty());

    let expected_dir = manager.settings().output_dir_for(task.created_at);
    assert!(task.output_path.starts_with(&*expected_dir.to_string_lossy()));
    assert_eq!(manager.file_status(&task.id).unwrap(), FileStatus::Ok);

    let downloads = engine.download_invocations();
    assert_eq!(downloads.len(), 1);
    assert!(downloads[0].contains("--newline"));
    assert!(downloads[0].contains("--progress-template"));
    assert!(!downloads[0].contains("--continue"));
    assert!(manager.last_command().contains("https://example.com/a"));

    // 创建时预取一次，运行开始时再解析一次
    let metadata_calls = || {
        engine
            .invocations()
            .into_iter()
            .filter(|line| line.contains(" -J "))
            .count()
    };
    for _ in 0..250 {
        if metadata_calls() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(metadata_calls(), 2);
}

#[tokio::test]
async fn test_submit_without_links_creates_nothing() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;
    let created = manager.submit("nothing to see here").await.unwrap();
    assert!(created.is_empty());
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn test_engine_failure_records_command_and_stderr() {
    let engine = FakeEngine::new(EngineMode::Fail);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;
    let mut events = manager.subscribe();

    let created = manager.submit("https://media.test/v/blocked").await.unwrap();
    settle(&manager).await;

    let task = manager.task(&created[0].id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.stage, stage::FINALIZE);
    assert!(task.error_message.contains("yt-dlp failed (exit code 1)"));
    assert!(task.error_message.contains("Command:"));
    assert!(task.error_message.contains(&*engine.script.to_string_lossy()));
    assert!(task.error_message.contains("https://media.test/v/blocked"));
    assert!(task.error_message.contains("403 Forbidden"));
    assert!(task.error_message.contains("Stderr:"));
    assert!(
        task.error_message
            .contains("WARNING: [generic] blocked: retrying with fallback client")
    );
    assert!(task.output_path.is_empty());

    // stderr 上的进度行同样会被解析并推送
    let mut progress_seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.task().id == created[0].id && !event.task().progress.is_empty() {
            progress_seen.push(event.task().progress.clone());
        }
    }
    assert!(progress_seen.contains(&"30.0%".to_string()), "{:?}", progress_seen);
}

#[tokio::test]
async fn test_running_tasks_never_exceed_pool_size() {
    let engine = FakeEngine::new(EngineMode::Slow);
    let mut settings = engine.settings();
    settings.pool_size = 2;
    let manager = start(settings, Arc::new(FakeDesktop::default())).await;

    let created = manager
        .submit(
            "https://media.test/v/one https://media.test/v/two https://media.test/v/three https://media.test/v/four",
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 4);

    let watcher = manager.clone();
    let watch = tokio::spawn(async move {
        let mut max_running = 0;
        loop {
            let tasks = watcher.list();
            let running = tasks.iter().filter(|t| t.status == TaskStatus::Running).count();
            max_running = max_running.max(running);
            if tasks.iter().all(|t| t.status.is_terminal()) {
                return max_running;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    settle(&manager).await;
    let max_running = tokio::time::timeout(Duration::from_secs(5), watch)
        .await
        .unwrap()
        .unwrap();
    assert!(max_running >= 1);
    assert!(max_running <= 2, "同时运行了 {} 个任务", max_running);
    assert!(manager.list().iter().all(|t| t.status == TaskStatus::Success));
}

#[tokio::test]
async fn test_resume_passes_continue_flag() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;

    let created = manager.submit("https://media.test/v/again").await.unwrap();
    settle(&manager).await;

    let requeued = manager.resume(&created[0].id).await.unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert_eq!(requeued.stage, stage::RESUME);
    assert!(requeued.resume);
    assert!(requeued.progress.is_empty());
    settle(&manager).await;

    let downloads = engine.download_invocations();
    assert_eq!(downloads.len(), 2);
    assert!(downloads[1].contains("--continue"));

    let task = manager.task(&created[0].id).unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert!(!task.resume);
}

#[tokio::test]
async fn test_resume_rejects_running_task_unless_forced() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;

    let now = Utc::now();
    let record = Task {
        id: "busy".to_string(),
        url: "https://media.test/v/busy".to_string(),
        title: "Busy clip".to_string(),
        status: TaskStatus::Running,
        created_at: now,
        updated_at: now,
        ..Task::default()
    };
    let payload = serde_json::to_string(&vec![record]).unwrap();
    manager.import(&payload, ImportMode::Merge, false).await.unwrap();

    assert_eq!(manager.resume_status("busy").await.unwrap(), ResumeStatus::None);
    assert!(matches!(
        manager.resume("busy").await,
        Err(FetchError::AlreadyRunning(_))
    ));
    assert_eq!(manager.task("busy").unwrap().status, TaskStatus::Running);

    let forced = manager.force_resume("busy").await.unwrap();
    assert_eq!(forced.stage, stage::FORCE_RESUME);
    assert_eq!(forced.status, TaskStatus::Queued);
    settle(&manager).await;
    assert_eq!(manager.task("busy").unwrap().status, TaskStatus::Success);
    assert!(engine.download_invocations()[0].contains("--continue"));
}

#[tokio::test]
async fn test_force_resume_during_run_starts_new_run() {
    let engine = FakeEngine::new(EngineMode::Slow);
    let mut settings = engine.settings();
    settings.pool_size = 1;
    let manager = start(settings, Arc::new(FakeDesktop::default())).await;

    let created = manager.submit("https://media.test/v/overlap").await.unwrap();
    let id = created[0].id.clone();
    let running = tokio::time::timeout(Duration::from_secs(10), async {
        while manager.task(&id).unwrap().status != TaskStatus::Running {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(running.is_ok(), "任务没有进入运行状态");

    let forced = manager.force_resume(&id).await.unwrap();
    assert_eq!(forced.status, TaskStatus::Queued);
    assert_eq!(forced.stage, stage::FORCE_RESUME);
    settle(&manager).await;

    let downloads = engine.download_invocations();
    assert_eq!(downloads.len(), 2, "{:?}", downloads);
    assert!(!downloads[0].contains("--continue"));
    assert!(downloads[1].contains("--continue"));

    let task = manager.task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert!(!task.resume);
}

#[tokio::test]
async fn test_queue_overflow_fails_fast_and_keeps_task() {
    let engine = FakeEngine::new(EngineMode::Slow);
    let mut settings = engine.settings();
    settings.pool_size = 1;
    settings.queue_capacity = 1;
    let tasks_file = settings.tasks_file();
    let manager = start(settings, Arc::new(FakeDesktop::default())).await;

    let submitted = tokio::time::timeout(
        Duration::from_secs(5),
        manager.submit("https://media.test/v/q1 https://media.test/v/q2 https://media.test/v/q3"),
    )
    .await
    .expect("队列满时提交不应阻塞");
    let overflowed = match submitted {
        Err(FetchError::QueueFull(id)) => id,
        other => panic!("期望 QueueFull，实际为 {:?}", other.map(|t| t.len())),
    };

    assert_eq!(manager.list().len(), 3);
    assert_eq!(manager.task(&overflowed).unwrap().status, TaskStatus::Queued);

    // 计数平衡时，即使有任务没能入队也能等到空闲
    settle(&manager).await;
    let tasks = manager.list();
    assert!(tasks.iter().any(|t| t.status == TaskStatus::Success));
    assert_eq!(manager.task(&overflowed).unwrap().status, TaskStatus::Queued);
    assert!(engine.download_invocations().len() < 3);

    let saved: Vec<Task> = serde_json::from_str(&std::fs::read_to_string(&tasks_file).unwrap()).unwrap();
    assert_eq!(saved.len(), 3);
    let saved_overflowed = saved.iter().find(|t| t.id == overflowed).unwrap();
    assert_eq!(saved_overflowed.status, TaskStatus::Queued);

    let requeued = manager.resume(&overflowed).await.unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    settle(&manager).await;
    assert_eq!(manager.task(&overflowed).unwrap().status, TaskStatus::Success);
}

#[tokio::test]
async fn test_stale_running_task_can_resume() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;

    let long_ago = Utc::now() - TimeDelta::minutes(10);
    let record = Task {
        id: "stale".to_string(),
        url: "https://media.test/v/stale".to_string(),
        title: "Stale clip".to_string(),
        status: TaskStatus::Running,
        created_at: long_ago,
        updated_at: long_ago,
        ..Task::default()
    };
    let payload = serde_json::to_string(&vec![record]).unwrap();
    manager.import(&payload, ImportMode::Replace, false).await.unwrap();

    let requeued = manager.resume("stale").await.unwrap();
    assert_eq!(requeued.stage, stage::RESUME);
    settle(&manager).await;
    assert_eq!(manager.task("stale").unwrap().status, TaskStatus::Success);
}

#[tokio::test]
async fn test_import_overwrite_downloaded_requeues() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;

    let payload = r#"[{"id":"x","url":"https://media.test/v/redo","status":"Success","outputPath":"/gone","errorMessage":"old"}]"#;
    let tasks = manager.import(payload, ImportMode::Merge, true).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Queued);
    assert!(tasks[0].output_path.is_empty());
    assert!(tasks[0].error_message.is_empty());

    settle(&manager).await;
    let task = manager.task("x").unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert!(task.output_path.ends_with("Clip redo.mp4"));
    assert_eq!(engine.download_invocations().len(), 1);
}

#[tokio::test]
async fn test_import_rejects_bad_payloads() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;
    manager.submit("https://media.test/v/keep").await.unwrap();
    settle(&manager).await;

    let result = manager
        .import(r#"[{"id":"ok"},{"url":"https://media.test/v/noid"}]"#, ImportMode::Replace, false)
        .await;
    assert!(matches!(result, Err(FetchError::InvalidPayload(_))));
    assert_eq!(manager.list().len(), 1);
    assert!("sideways".parse::<ImportMode>().is_err());
}

#[tokio::test]
async fn test_merge_only_takes_newer_records() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;
    let created = manager.submit("https://media.test/v/merge").await.unwrap();
    settle(&manager).await;
    let current = manager.task(&created[0].id).unwrap();

    let mut older = current.clone();
    older.title = "Older title".to_string();
    older.updated_at = current.updated_at - TimeDelta::seconds(5);
    older.created_at = current.created_at - TimeDelta::days(3);
    let payload = serde_json::to_string(&vec![older]).unwrap();
    manager.import(&payload, ImportMode::Merge, false).await.unwrap();
    assert_eq!(manager.task(&current.id).unwrap(), current);

    let mut newer = current.clone();
    newer.title = "Newer title".to_string();
    newer.updated_at = current.updated_at + TimeDelta::seconds(5);
    newer.created_at = current.created_at - TimeDelta::days(3);
    let payload = serde_json::to_string(&vec![newer]).unwrap();
    let tasks = manager.import(&payload, ImportMode::Merge, false).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let merged = manager.task(&current.id).unwrap();
    assert_eq!(merged.title, "Newer title");
    assert_eq!(merged.created_at, current.created_at);
}

#[tokio::test]
async fn test_export_then_replace_import_round_trips() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;
    manager
        .submit("https://media.test/v/first https://media.test/v/second")
        .await
        .unwrap();
    settle(&manager).await;

    let export_dir = tempfile::tempdir().unwrap();
    let path = manager.export_to_dir(export_dir.path()).await.unwrap();
    assert!(path.file_name().unwrap().to_string_lossy().starts_with("fetchforge-tasks-"));
    let payload = std::fs::read_to_string(&path).unwrap();
    assert_eq!(payload, manager.export_json().unwrap());

    let other = FakeEngine::new(EngineMode::Ok);
    let restored = start(other.settings(), Arc::new(FakeDesktop::default())).await;
    let tasks = restored.import(&payload, ImportMode::Replace, false).await.unwrap();
    assert_eq!(tasks, manager.list());
    assert_eq!(restored.list(), manager.list());
}

#[tokio::test]
async fn test_delete_trashes_output_and_persists() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let desktop = Arc::new(FakeDesktop::default());
    let manager = start(engine.settings(), desktop.clone()).await;
    let created = manager.submit("https://media.test/v/gone").await.unwrap();
    settle(&manager).await;
    let task = manager.task(&created[0].id).unwrap();

    manager.delete(&task.id).await.unwrap();
    assert_eq!(desktop.trashed(), vec![std::path::PathBuf::from(&task.output_path)]);
    assert!(matches!(manager.task(&task.id), Err(FetchError::NotFound(_))));
    assert!(matches!(manager.delete(&task.id).await, Err(FetchError::NotFound(_))));

    drop(manager);
    let reopened = start(engine.settings(), Arc::new(FakeDesktop::default())).await;
    assert!(reopened.list().is_empty());
}

#[tokio::test]
async fn test_delete_failure_keeps_task() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::failing())).await;
    let created = manager.submit("https://media.test/v/stuck").await.unwrap();
    settle(&manager).await;

    let result = manager.delete(&created[0].id).await;
    assert!(matches!(result, Err(FetchError::DeletionFailed(_))));
    assert_eq!(manager.task(&created[0].id).unwrap().status, TaskStatus::Success);
}

#[tokio::test]
async fn test_file_status_and_open_file() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let desktop = Arc::new(FakeDesktop::default());
    let manager = start(engine.settings(), desktop.clone()).await;

    let payload = r#"[
        {"id":"missing","url":"https://media.test/v/missing","status":"Success","outputPath":"/definitely/gone.mp4"},
        {"id":"pending","url":"https://media.test/v/pending","status":"Failed"}
    ]"#;
    manager.import(payload, ImportMode::Replace, false).await.unwrap();

    assert_eq!(manager.file_status("missing").unwrap(), FileStatus::Missing);
    assert!(manager.task("missing").unwrap().missing_output);
    assert!(matches!(manager.open_file("missing").await, Err(FetchError::FileMissing(_))));

    assert_eq!(manager.file_status("pending").unwrap(), FileStatus::Pending);
    assert!(matches!(manager.open_file("pending").await, Err(FetchError::OutputPending)));
    assert!(matches!(manager.file_status("nope"), Err(FetchError::NotFound(_))));

    let created = manager.submit("https://media.test/v/shown").await.unwrap();
    settle(&manager).await;
    let task = manager.task(&created[0].id).unwrap();
    manager.open_file(&task.id).await.unwrap();
    manager.open_folder(&task.id).await.unwrap();
    let opened = desktop.opened();
    let output = std::path::PathBuf::from(&task.output_path);
    assert_eq!(opened, vec![output.clone(), output.parent().unwrap().to_path_buf()]);

    manager.open_path(&output).await.unwrap();
    assert_eq!(desktop.opened().last().unwrap(), output.parent().unwrap());
    assert!(matches!(
        manager.open_path(std::path::Path::new("/definitely/not/here")).await,
        Err(FetchError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_active_profile_persists_across_restart() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;
    assert_eq!(manager.active_profile().id, "default");
    assert_eq!(manager.list_profiles().len(), 3);

    assert!(matches!(
        manager.set_active_profile("nope").await,
        Err(FetchError::ProfileNotFound(_))
    ));
    manager.set_active_profile("audio-only").await.unwrap();
    drop(manager);

    let reopened = start(engine.settings(), Arc::new(FakeDesktop::default())).await;
    assert_eq!(reopened.active_profile().id, "audio-only");
    reopened.submit("https://media.test/v/song").await.unwrap();
    settle(&reopened).await;
    assert!(engine.download_invocations()[0].contains("-x --audio-format mp3"));
}

#[tokio::test]
async fn test_restart_restores_order_without_running_queued() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let settings = engine.settings();
    std::fs::create_dir_all(&settings.config_dir).unwrap();
    std::fs::write(
        settings.tasks_file(),
        r#"[
            {"id":"c","url":"https://media.test/v/c","status":"Queued"},
            {"id":"a","url":"https://media.test/v/a","status":"Failed","errorMessage":"boom"},
            {"id":"b","url":"https://media.test/v/b","status":"Success"}
        ]"#,
    )
    .unwrap();

    let manager = start(settings, Arc::new(FakeDesktop::default())).await;
    let ids: Vec<String> = manager.list().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    settle(&manager).await;
    assert_eq!(manager.task("c").unwrap().status, TaskStatus::Queued);
    assert!(engine.invocations().is_empty());
}

#[tokio::test]
async fn test_events_report_each_transition() {
    let engine = FakeEngine::new(EngineMode::Ok);
    let manager = start(engine.settings(), Arc::new(FakeDesktop::default())).await;
    let mut events = manager.subscribe();

    let created = manager.submit("https://media.test/v/watched").await.unwrap();
    settle(&manager).await;

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.name(), "task-update");
        if event.task().id == created[0].id {
            statuses.push(event.task().status);
        }
    }
    assert_eq!(statuses.first(), Some(&TaskStatus::Queued));
    assert_eq!(statuses.last(), Some(&TaskStatus::Success));
    assert!(statuses.contains(&TaskStatus::Running));
}
