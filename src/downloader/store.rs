use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use itertools::Itertools;

use super::error::{FetchError, Result};
use super::models::{Task, TaskStatus};

#[derive(Debug, Default)]
struct StoreInner {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

impl StoreInner {
    fn snapshot(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }

    /// 新 id 追加到末尾，已有 id 原位覆盖
    fn upsert(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }
}

/// 导入合并后的结果
#[derive(Debug, Default)]
pub struct Reconciled {
    /// 合并后的完整任务列表
    pub tasks: Vec<Task>,
    /// 本次被写入的记录
    pub changed: Vec<Task>,
    /// 需要进入下载队列的任务
    pub enqueue: Vec<String>,
}

/// 任务的唯一内存登记处，所有读写都经过同一把锁；
/// 锁只在内存操作期间持有，对外只返回副本
#[derive(Debug, Default)]
pub struct TaskStore {
    inner: Mutex<StoreInner>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 每个不重复的链接建一个排队中的任务
    pub fn create(&self, urls: &[String]) -> Vec<Task> {
        let now = Utc::now();
        let created: Vec<Task> = urls.iter().unique().map(|url| Task::new(url, now)).collect();

        let mut inner = self.lock();
        for task in &created {
            inner.upsert(task.clone());
        }
        created
    }

    pub fn list(&self) -> Vec<Task> {
        self.lock().snapshot()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 修改任务并刷新更新时间；任务不存在时返回 None
    pub fn update(&self, id: &str, f: impl FnOnce(&mut Task)) -> Option<Task> {
        self.modify(id, |task| {
            f(task);
            true
        })
    }

    /// 闭包返回 true 才算修改成功，此时刷新更新时间并返回副本
    pub fn modify(&self, id: &str, f: impl FnOnce(&mut Task) -> bool) -> Option<Task> {
        let mut inner = self.lock();
        let task = inner.tasks.get_mut(id)?;
        if !f(task) {
            return None;
        }
        task.touch();
        Some(task.clone())
    }

    /// 带前置检查的状态迁移，检查失败时任务保持不变
    pub fn transition(&self, id: &str, f: impl FnOnce(&mut Task) -> Result<()>) -> Result<Task> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| FetchError::NotFound(id.to_string()))?;
        let mut next = task.clone();
        f(&mut next)?;
        next.touch();
        *task = next.clone();
        Ok(next)
    }

    pub fn remove(&self, id: &str) -> Option<Task> {
        let mut inner = self.lock();
        let removed = inner.tasks.remove(id)?;
        inner.order.retain(|existing| existing != id);
        Some(removed)
    }

    /// 启动时从快照恢复
    pub fn restore(&self, tasks: Vec<Task>) {
        let mut inner = self.lock();
        *inner = StoreInner::default();
        for task in tasks {
            inner.upsert(task);
        }
    }

    /// 合并导入：已有 id 只在导入记录更新时间更新时覆盖（保留原创建时间），
    /// 新 id 追加到末尾；只有新插入且排队中的任务需要入队
    pub fn merge(&self, incoming: Vec<Task>) -> Reconciled {
        let mut inner = self.lock();
        let mut changed = Vec::new();
        let mut enqueue = Vec::new();
        for mut task in incoming {
            match inner.tasks.get_mut(&task.id) {
                Some(existing) => {
                    if task.updated_at > existing.updated_at {
                        task.created_at = existing.created_at;
                        *existing = task.clone();
                        changed.push(task);
                    }
                }
                None => {
                    if task.status == TaskStatus::Queued && !enqueue.contains(&task.id) {
                        enqueue.push(task.id.clone());
                    }
                    inner.upsert(task.clone());
                    changed.push(task);
                }
            }
        }
        Reconciled {
            tasks: inner.snapshot(),
            changed,
            enqueue,
        }
    }

    /// 替换导入：丢弃全部任务，按导入顺序重建
    pub fn replace(&self, incoming: Vec<Task>) -> Reconciled {
        let mut inner = self.lock();
        *inner = StoreInner::default();
        for task in incoming {
            inner.upsert(task);
        }
        let tasks = inner.snapshot();
        let enqueue = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .map(|t| t.id.clone())
            .collect();
        Reconciled {
            changed: tasks.clone(),
            tasks,
            enqueue,
        }
    }
}
