use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::models::Task;
use super::store::TaskStore;
use crate::common::fs::write_atomic;
use crate::config::AppConfig;

/// 任务快照与配置文件的读写；写入尽力而为，失败只记日志
#[derive(Debug)]
pub struct Storage {
    tasks_path: PathBuf,
    config_path: PathBuf,
    // 串行化写入，保证最后落盘的总是最新快照
    write_lock: Mutex<()>,
}

impl Storage {
    pub fn new(tasks_path: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            tasks_path: tasks_path.into(),
            config_path: config_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn tasks_path(&self) -> &Path {
        &self.tasks_path
    }

    /// 保存整个任务列表的快照
    pub async fn save_tasks(&self, store: &TaskStore) {
        let _guard = self.write_lock.lock().await;
        let snapshot = store.list();
        let data = match serde_json::to_vec_pretty(&snapshot) {
            Ok(data) => data,
            Err(e) => {
                warn!("序列化任务快照失败: {}", e);
                return;
            }
        };
        if let Err(e) = write_atomic(&self.tasks_path, &data).await {
            warn!("保存任务快照失败 {:?}: {}", self.tasks_path, e);
        }
    }

    /// 读取任务快照；文件不存在或损坏时返回空列表
    pub async fn load_tasks(&self) -> Vec<Task> {
        let data = match tokio::fs::read(&self.tasks_path).await {
            Ok(data) => data,
            Err(e) => {
                debug!("没有可恢复的任务快照 {:?}: {}", self.tasks_path, e);
                return Vec::new();
            }
        };
        match serde_json::from_slice::<Vec<Task>>(&data) {
            Ok(mut tasks) => {
                tasks.retain(|t| !t.id.trim().is_empty());
                for task in &mut tasks {
                    task.refresh_missing_output();
                }
                tasks
            }
            Err(e) => {
                warn!("任务快照已损坏，忽略 {:?}: {}", self.tasks_path, e);
                Vec::new()
            }
        }
    }

    pub async fn save_config(&self, config: &AppConfig) {
        let _guard = self.write_lock.lock().await;
        let data = match serde_json::to_vec_pretty(config) {
            Ok(data) => data,
            Err(e) => {
                warn!("序列化配置失败: {}", e);
                return;
            }
        };
        if let Err(e) = write_atomic(&self.config_path, &data).await {
            warn!("保存配置失败 {:?}: {}", self.config_path, e);
        }
    }

    pub async fn load_config(&self) -> AppConfig {
        match tokio::fs::read(&self.config_path).await {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                warn!("配置文件已损坏，使用默认配置: {}", e);
                AppConfig::default()
            }),
            Err(_) => AppConfig::default(),
        }
    }
}
