use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

use super::manager::ManagerInner;
use super::models::{Task, TaskStatus, stage};
use crate::common::fs::newest_file;
use crate::engine::progress::ProgressUpdate;

/// 启动固定数量的 worker，共同消费同一个任务队列。
/// worker 只持有弱引用，管理器释放后队列关闭，worker 随之退出。
pub(crate) fn spawn_workers(inner: &Arc<ManagerInner>, queue: mpsc::Receiver<String>) {
    let queue = Arc::new(Mutex::new(queue));
    let pool_size = inner.settings.pool_size.max(1);
    for worker in 0..pool_size {
        let queue = Arc::clone(&queue);
        let inner = Arc::downgrade(inner);
        tokio::spawn(async move {
            worker_loop(worker, inner, queue).await;
        });
    }
    debug!("已启动 {} 个下载 worker", pool_size);
}

async fn worker_loop(
    worker: usize,
    inner: Weak<ManagerInner>,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
) {
    loop {
        let next = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(id) = next else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        debug!("worker {} 取到任务 {}", worker, id);
        run_task(&inner, &id).await;
        inner.finish_one();
    }
    debug!("worker {} 退出", worker);
}

/// 创建任务后异步预取一次元数据，不阻塞入队。
/// 运行开始时还会再解析一次，预取结果可能被覆盖，这是有意的重复获取。
pub(crate) fn spawn_prefetch(inner: &Arc<ManagerInner>, task: &Task) {
    let inner = Arc::clone(inner);
    let id = task.id.clone();
    let url = task.url.clone();
    tokio::spawn(async move {
        let Some(metadata) = inner.engine.fetch_metadata(&url).await else {
            debug!("预取元数据失败: {}", url);
            return;
        };
        // 任务已结束时不再覆盖收尾阶段写入的实际文件信息
        let updated = inner
            .store
            .modify(&id, |t| !t.status.is_terminal() && metadata.apply_to(t));
        if let Some(updated) = updated {
            inner.publish(&updated).await;
        }
    });
}

/// 一个任务的完整生命周期：解析元数据 → 下载 → 收尾
pub(crate) async fn run_task(inner: &ManagerInner, id: &str) {
    let mut resume_requested = false;
    let started = inner.store.modify(id, |task| {
        // 重复入队的条目在这里被过滤掉；带续传标记的条目即使上一轮
        // 已经结束也要重新运行
        if task.status != TaskStatus::Queued && !task.resume {
            return false;
        }
        resume_requested = task.resume;
        task.resume = false;
        task.status = TaskStatus::Running;
        task.stage = stage::RESOLVE_METADATA.to_string();
        task.progress.clear();
        task.speed.clear();
        task.eta.clear();
        task.error_message.clear();
        true
    });
    let Some(task) = started else {
        debug!("任务 {} 已删除或没有待运行的请求，跳过", id);
        return;
    };
    info!("开始处理任务: {} ({})", task.id, task.url);
    inner.publish(&task).await;

    if let Some(metadata) = inner.engine.fetch_metadata(&task.url).await {
        if let Some(updated) = inner.store.modify(id, |t| metadata.apply_to(t)) {
            inner.publish(&updated).await;
        }
    }

    let output_dir = inner.settings.output_dir_for(task.created_at);
    if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
        fail_task(
            inner,
            id,
            format!("failed to create output directory {}: {}", output_dir.display(), e),
        )
        .await;
        return;
    }

    let Some(task) = inner
        .store
        .update(id, |t| t.stage = stage::DOWNLOAD.to_string())
    else {
        return;
    };
    inner.publish(&task).await;

    let profile = inner.active_profile();
    let args = inner
        .engine
        .download_args(&task.url, &output_dir, &profile.args, resume_requested);
    let command_line = inner.engine.command_line(&args);
    info!("执行下载命令: {}", command_line);
    inner.record_command(command_line);

    let run_started = SystemTime::now();
    let (tx, rx) = mpsc::unbounded_channel();
    let (result, ()) = tokio::join!(
        inner.engine.run_with_progress(&args, tx),
        apply_progress(inner, id, rx),
    );

    if let Err(failure) = result {
        fail_task(inner, id, failure.to_string()).await;
        return;
    }

    let Some(task) = inner
        .store
        .update(id, |t| t.stage = stage::FINALIZE.to_string())
    else {
        return;
    };
    inner.publish(&task).await;

    let output = locate_output(output_dir, run_started).await;
    let output_size = match &output {
        Some(path) => tokio::fs::metadata(path)
            .await
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len()),
        None => None,
    };

    let finished = inner.store.update(id, |t| {
        t.status = TaskStatus::Success;
        t.stage = stage::FINALIZE.to_string();
        t.error_message.clear();
        t.output_path = output
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(stem) = output.as_ref().and_then(|p| p.file_stem()) {
            if t.has_placeholder_title() {
                t.title = stem.to_string_lossy().into_owned();
            }
        }
        if let Some(size) = output_size {
            t.filesize = size;
        }
        t.refresh_missing_output();
        t.progress = "100%".to_string();
    });
    if let Some(task) = finished {
        info!("✅ 任务完成: {} -> {}", task.id, task.output_path);
        inner.publish(&task).await;
    }
}

/// 优先取本次运行开始后修改的最新文件，否则取目录中最新的文件
async fn locate_output(output_dir: PathBuf, run_started: SystemTime) -> Option<PathBuf> {
    tokio::task::spawn_blocking(move || {
        newest_file(&output_dir, Some(run_started)).or_else(|| newest_file(&output_dir, None))
    })
    .await
    .ok()
    .flatten()
}

async fn apply_progress(
    inner: &ManagerInner,
    id: &str,
    mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
) {
    while let Some(update) = updates.recv().await {
        if let Some(task) = inner.store.modify(id, |t| update.apply_to(t)) {
            inner.publish(&task).await;
        }
    }
}

pub(crate) async fn fail_task(inner: &ManagerInner, id: &str, message: String) {
    error!("❌ 任务失败: {}\n{}", id, message);
    let failed = inner.store.update(id, |t| {
        t.status = TaskStatus::Failed;
        t.stage = stage::FINALIZE.to_string();
        t.error_message = message;
    });
    if let Some(task) = failed {
        inner.publish(&task).await;
    }
}
