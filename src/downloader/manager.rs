use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Local, Utc};
use tokio::sync::{Notify, broadcast, mpsc};
use tracing::{debug, info, warn};

use super::core;
use super::error::{FetchError, Result};
use super::import::parse_payload;
use super::models::{FileStatus, ImportMode, ResumeStatus, Task, TaskEvent, TaskStatus, stage};
use super::resume;
use super::storage::Storage;
use super::store::TaskStore;
use crate::common::desktop::Desktop;
use crate::common::fs::write_atomic;
use crate::config::{AppConfig, Settings};
use crate::engine::YtDlp;
use crate::engine::profile::{DEFAULT_PROFILE_ID, Profile, builtin_profiles, find_profile, profile_or_default};
use crate::parser::extract_urls;

const EVENT_CAPACITY: usize = 256;

pub(crate) struct ManagerInner {
    pub(crate) settings: Settings,
    pub(crate) store: TaskStore,
    pub(crate) storage: Storage,
    pub(crate) engine: YtDlp,
    desktop: Arc<dyn Desktop>,
    events: broadcast::Sender<TaskEvent>,
    queue: mpsc::Sender<String>,
    active_profile: Mutex<String>,
    last_command: Mutex<String>,
    // 已入队但 worker 尚未处理完的条目数
    pending: AtomicUsize,
    idle: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ManagerInner {
    fn emit(&self, task: &Task) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.events.send(TaskEvent::Update(task.clone()));
    }

    /// 推送事件并保存快照
    pub(crate) async fn publish(&self, task: &Task) {
        self.emit(task);
        self.storage.save_tasks(&self.store).await;
    }

    pub(crate) fn active_profile(&self) -> Profile {
        profile_or_default(&lock(&self.active_profile))
    }

    pub(crate) fn record_command(&self, command_line: String) {
        *lock(&self.last_command) = command_line;
    }

    /// worker 处理完一个队列条目（无论运行还是跳过）后调用
    pub(crate) fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn enqueue(&self, id: &str) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.queue.try_send(id.to_string()).map_err(|e| {
            self.finish_one();
            let id = match e {
                mpsc::error::TrySendError::Full(id) | mpsc::error::TrySendError::Closed(id) => id,
            };
            warn!("下载队列已满，任务 {} 未入队", id);
            FetchError::QueueFull(id)
        })
    }

    /// 逐个入队，返回第一个失败；其余任务仍会尝试入队
    fn enqueue_all<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.enqueue(id) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// 下载任务管理器：任务的唯一入口。可随意 clone，所有副本共享同一个状态。
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

impl DownloadManager {
    /// 恢复持久化的任务和配置，并启动 worker 池。
    /// 恢复出来的排队任务不会自动入队，需要手动恢复下载。
    pub async fn start(settings: Settings, desktop: Arc<dyn Desktop>) -> Self {
        let storage = Storage::new(settings.tasks_file(), settings.config_file());

        let store = TaskStore::new();
        let restored = storage.load_tasks().await;
        info!("从 {:?} 恢复了 {} 个任务", storage.tasks_path(), restored.len());
        store.restore(restored);

        let config = storage.load_config().await;
        let active_profile = if find_profile(&config.active_profile_id).is_some() {
            config.active_profile_id
        } else {
            warn!("未知的下载方案 {}，使用默认方案", config.active_profile_id);
            DEFAULT_PROFILE_ID.to_string()
        };

        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = YtDlp::new(settings.engine_path.clone(), settings.engine_args.clone());
        debug!("下载引擎: {:?}", engine.program());

        let inner = Arc::new(ManagerInner {
            settings,
            store,
            storage,
            engine,
            desktop,
            events,
            queue: queue_tx,
            active_profile: Mutex::new(active_profile),
            last_command: Mutex::new(String::new()),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        core::spawn_workers(&inner, queue_rx);
        Self { inner }
    }

    /// 等待队列清空且没有正在运行的任务
    pub async fn wait_idle(&self) {
        loop {
            // 先创建 Notified，避免检查计数和等待之间漏掉通知
            let notified = self.inner.idle.notified();
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// 订阅任务更新事件
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// 从任意文本中提取链接并创建任务，去重后按出现顺序返回
    pub async fn submit(&self, text: &str) -> Result<Vec<Task>> {
        let urls = extract_urls(text);
        if urls.is_empty() {
            debug!("输入中没有可识别的链接");
            return Ok(Vec::new());
        }

        let created = self.inner.store.create(&urls);
        for task in &created {
            self.inner.emit(task);
        }
        self.inner.storage.save_tasks(&self.inner.store).await;

        for task in &created {
            core::spawn_prefetch(&self.inner, task);
        }
        self.inner
            .enqueue_all(created.iter().map(|t| t.id.as_str()))?;
        info!("已添加 {} 个下载任务", created.len());
        Ok(created)
    }

    pub fn list(&self) -> Vec<Task> {
        self.inner.store.list()
    }

    pub fn task(&self, id: &str) -> Result<Task> {
        self.inner
            .store
            .get(id)
            .ok_or_else(|| FetchError::NotFound(id.to_string()))
    }

    /// 删除任务；已下载的文件先移到回收站，失败时任务保持不变
    pub async fn delete(&self, id: &str) -> Result<()> {
        let task = self.task(id)?;
        if let Some(path) = task.output_file().filter(|p| p.is_file()) {
            self.inner
                .desktop
                .move_to_trash(path)
                .await
                .map_err(|e| FetchError::DeletionFailed(format!("{}: {}", path.display(), e)))?;
            debug!("已将 {:?} 移到回收站", path);
        }
        self.inner.store.remove(id);
        self.inner.storage.save_tasks(&self.inner.store).await;
        info!("已删除任务 {}", id);
        Ok(())
    }

    /// 打开任务所在的目录；还没有输出文件时打开按日期划分的下载目录
    pub async fn open_folder(&self, id: &str) -> Result<()> {
        let task = self.task(id)?;
        let dir = match task.output_file().and_then(Path::parent) {
            Some(parent) => parent.to_path_buf(),
            None => self.inner.settings.output_dir_for(task.created_at),
        };
        if !dir.is_dir() {
            return Err(FetchError::NotFound(dir.display().to_string()));
        }
        self.inner.desktop.open(&dir).await?;
        Ok(())
    }

    pub async fn open_file(&self, id: &str) -> Result<()> {
        let task = self.task(id)?;
        let path = task.output_file().ok_or(FetchError::OutputPending)?;
        if !path.is_file() {
            return Err(FetchError::FileMissing(path.to_path_buf()));
        }
        self.inner.desktop.open(path).await?;
        Ok(())
    }

    /// 打开任意路径；传入文件时打开其所在目录
    pub async fn open_path(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(FetchError::InvalidPayload("路径不能为空".to_string()));
        }
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| FetchError::NotFound(path.display().to_string()))?;
        let target = if meta.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        self.inner.desktop.open(target).await?;
        Ok(())
    }

    pub fn file_status(&self, id: &str) -> Result<FileStatus> {
        let task = self.task(id)?;
        Ok(match task.output_file() {
            None => FileStatus::Pending,
            Some(path) if path.is_file() => FileStatus::Ok,
            Some(_) => FileStatus::Missing,
        })
    }

    pub async fn resume_status(&self, id: &str) -> Result<ResumeStatus> {
        let task = self.task(id)?;
        let output_dir = self.inner.settings.output_dir_for(task.created_at);
        let grace = self.inner.settings.running_grace;
        let fallback = self.inner.settings.partial_fallback;
        let status = tokio::task::spawn_blocking(move || {
            resume::resume_status(&task, &output_dir, Utc::now(), grace, fallback)
        })
        .await
        .unwrap_or_else(|e| {
            warn!("检查续传状态失败: {}", e);
            ResumeStatus::None
        });
        Ok(status)
    }

    /// 重新排队并带上续传参数；任务仍在运行时拒绝
    pub async fn resume(&self, id: &str) -> Result<Task> {
        self.requeue(id, false).await
    }

    /// 不检查运行状态，强制重新排队
    pub async fn force_resume(&self, id: &str) -> Result<Task> {
        self.requeue(id, true).await
    }

    async fn requeue(&self, id: &str, force: bool) -> Result<Task> {
        let now = Utc::now();
        let grace = self.inner.settings.running_grace;
        let task = self.inner.store.transition(id, |task| {
            if !force && task.is_actively_running(now, grace) {
                return Err(FetchError::AlreadyRunning(task.id.clone()));
            }
            task.status = TaskStatus::Queued;
            task.stage = if force {
                stage::FORCE_RESUME
            } else {
                stage::RESUME
            }
            .to_string();
            task.progress.clear();
            task.speed.clear();
            task.eta.clear();
            task.error_message.clear();
            task.resume = true;
            Ok(())
        })?;
        self.inner.publish(&task).await;
        self.inner.enqueue(&task.id)?;
        info!("任务 {} 已重新排队 (force={})", task.id, force);
        Ok(task)
    }

    pub fn list_profiles(&self) -> Vec<Profile> {
        builtin_profiles()
    }

    pub fn active_profile(&self) -> Profile {
        self.inner.active_profile()
    }

    pub async fn set_active_profile(&self, id: &str) -> Result<Profile> {
        let profile = find_profile(id).ok_or_else(|| FetchError::ProfileNotFound(id.to_string()))?;
        *lock(&self.inner.active_profile) = profile.id.clone();
        self.inner
            .storage
            .save_config(&AppConfig {
                active_profile_id: profile.id.clone(),
            })
            .await;
        info!("下载方案已切换为 {}", profile.name);
        Ok(profile)
    }

    /// 最近一次执行的下载命令，仅用于诊断
    pub fn last_command(&self) -> String {
        lock(&self.inner.last_command).clone()
    }

    /// 以创建顺序导出所有任务
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.inner.store.list())?)
    }

    /// 导出到系统下载目录，没有时退回到配置目录下的 exports
    pub async fn export_to_file(&self) -> Result<PathBuf> {
        let dir = dirs::download_dir().unwrap_or_else(|| self.inner.settings.config_dir.join("exports"));
        self.export_to_dir(&dir).await
    }

    pub async fn export_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let json = self.export_json()?;
        let path = dir.join(format!(
            "fetchforge-tasks-{}.json",
            Local::now().format("%Y-%m-%d")
        ));
        write_atomic(&path, json.as_bytes()).await?;
        info!("已导出 {} 个任务到 {:?}", self.inner.store.len(), path);
        Ok(path)
    }

    /// 导入任务记录，返回导入后的完整列表。
    /// merge 只用更新时间更晚的记录覆盖已有任务；replace 整体替换。
    pub async fn import(&self, payload: &str, mode: ImportMode, overwrite_downloaded: bool) -> Result<Vec<Task>> {
        let records = parse_payload(payload, overwrite_downloaded)?;
        let count = records.len();
        let reconciled = match mode {
            ImportMode::Merge => self.inner.store.merge(records),
            ImportMode::Replace => self.inner.store.replace(records),
        };
        for task in &reconciled.changed {
            self.inner.emit(task);
        }
        self.inner.storage.save_tasks(&self.inner.store).await;
        self.inner
            .enqueue_all(reconciled.enqueue.iter().map(String::as_str))?;
        info!(
            "导入 {} 条记录 ({:?})，{} 个任务变更，{} 个任务入队",
            count,
            mode,
            reconciled.changed.len(),
            reconciled.enqueue.len()
        );
        Ok(reconciled.tasks)
    }
}
