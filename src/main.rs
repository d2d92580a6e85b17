use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::debug;

use fetchforge::common::desktop::SystemDesktop;
use fetchforge::common::logger::PrettyLogger;
use fetchforge::common::progress::TaskProgress;
use fetchforge::downloader::{DownloadManager, Task, TaskEvent};
use fetchforge::{Settings, log_error, log_info, log_success, log_warning};

mod cli;

use cli::{Cli, Command};

/// 等待一组任务全部结束，期间显示进度条
async fn follow(manager: &DownloadManager, mut events: Receiver<TaskEvent>, tasks: &[Task]) -> Vec<Task> {
    let mut progress = TaskProgress::new();
    for task in tasks {
        progress.track(task);
    }
    // 订阅之前可能已经有状态变化，先同步一次
    sync(manager, &mut progress);

    let idle = manager.wait_idle();
    tokio::pin!(idle);
    while !progress.is_done() {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => progress.update(event.task()),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("事件积压，跳过了 {} 条，重新同步", skipped);
                    sync(manager, &mut progress);
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut idle => {
                sync(manager, &mut progress);
                break;
            }
        }
    }

    tasks
        .iter()
        .filter_map(|t| manager.task(&t.id).ok())
        .collect()
}

fn sync(manager: &DownloadManager, progress: &mut TaskProgress) {
    for id in progress.tracked_ids() {
        if let Ok(task) = manager.task(&id) {
            progress.update(&task);
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // 初始化日志
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        log_error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::from_env();
    if let Some(concurrency) = args.concurrency {
        settings.pool_size = concurrency.max(1);
    }
    let manager = DownloadManager::start(settings, Arc::new(SystemDesktop)).await;

    match args.command {
        Command::Add { text } => {
            let events = manager.subscribe();
            let created = manager.submit(&text.join("\n")).await?;
            if created.is_empty() {
                log_warning!("没有在输入中找到链接");
                return Ok(());
            }
            log_info!("已添加 {} 个任务，使用方案: {}", created.len(), manager.active_profile().name);
            let finished = follow(&manager, events, &created).await;
            debug!("最近一次下载命令: {}", manager.last_command());
            PrettyLogger::completion_summary(&finished);
        }
        Command::List => {
            let tasks = manager.list();
            if tasks.is_empty() {
                log_info!("还没有任务");
            }
            for task in &tasks {
                PrettyLogger::task_row(task);
            }
        }
        Command::Status { id } => {
            let task = manager.task(&id)?;
            PrettyLogger::task_row(&task);
            PrettyLogger::separator();
            log_info!("文件状态: {:?}", manager.file_status(&id)?);
            log_info!("续传状态: {:?}", manager.resume_status(&id).await?);
        }
        Command::Resume { id, force } => {
            let events = manager.subscribe();
            let task = if force {
                manager.force_resume(&id).await?
            } else {
                manager.resume(&id).await?
            };
            let finished = follow(&manager, events, std::slice::from_ref(&task)).await;
            PrettyLogger::completion_summary(&finished);
        }
        Command::Delete { id } => {
            manager.delete(&id).await?;
            log_success!("已删除任务 {}", id);
        }
        Command::Open { id, folder } => {
            if folder {
                manager.open_folder(&id).await?;
            } else {
                manager.open_file(&id).await?;
            }
        }
        Command::OpenPath { path } => {
            manager.open_path(&path).await?;
        }
        Command::Profiles => {
            let active = manager.active_profile();
            for profile in manager.list_profiles() {
                let marker = if profile.id == active.id { "*".green() } else { " ".normal() };
                println!("{} {} {} {}", marker, profile.id.bold(), profile.name, profile.args.join(" ").bright_black());
            }
        }
        Command::UseProfile { id } => {
            let profile = manager.set_active_profile(&id).await?;
            log_success!("已切换到方案: {}", profile.name);
        }
        Command::Export { output_dir } => {
            let path = match output_dir {
                Some(dir) => manager.export_to_dir(&dir).await?,
                None => manager.export_to_file().await?,
            };
            PrettyLogger::file_info("导出文件", path.display().to_string());
        }
        Command::Import {
            file,
            mode,
            overwrite_downloaded,
        } => {
            let payload = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("无法读取导入文件 {:?}", file))?;
            let events = manager.subscribe();
            let tasks = manager.import(&payload, mode, overwrite_downloaded).await?;
            log_success!("导入完成，共 {} 个任务", tasks.len());
            let pending: Vec<Task> = tasks.into_iter().filter(|t| !t.status.is_terminal()).collect();
            if !pending.is_empty() {
                // 只有新入队的任务会运行，其余排队任务保持原状
                let finished = follow(&manager, events, &pending).await;
                PrettyLogger::completion_summary(&finished);
            }
        }
    }
    Ok(())
}
