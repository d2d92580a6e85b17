use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::error::FetchError;
use super::resume::is_placeholder_title;
use crate::parser::url_parser::{default_title_from_url, source_host_from_url};

// 任务各阶段的显示名称
pub mod stage {
    pub const PARSE_URL: &str = "Parse URL";
    pub const RESOLVE_METADATA: &str = "Resolve metadata";
    pub const DOWNLOAD: &str = "Download";
    pub const FINALIZE: &str = "Finalize";
    pub const RESUME: &str = "Resume";
    pub const FORCE_RESUME: &str = "Force Resume";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TaskStatus {
    #[default]
    Queued,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

/// 一次下载请求，从创建到结束的完整记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: String,
    pub url: String,
    pub title: String,
    pub source_host: String,
    pub status: TaskStatus,
    pub stage: String,
    pub progress: String,
    pub speed: String,
    pub eta: String,
    pub output_path: String,
    pub missing_output: bool,
    pub error_message: String,
    pub resume: bool,
    pub duration: u64,
    pub filesize: u64,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(url: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            url: url.to_string(),
            title: default_title_from_url(url),
            source_host: source_host_from_url(url),
            status: TaskStatus::Queued,
            stage: stage::PARSE_URL.to_string(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// 更新时间只前进不后退
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// 标题是否仍是占位内容，由链接推导出的默认标题不算
    pub fn has_placeholder_title(&self) -> bool {
        is_placeholder_title(&self.title)
    }

    pub fn is_actively_running(&self, now: DateTime<Utc>, grace: TimeDelta) -> bool {
        self.status == TaskStatus::Running && now.signed_duration_since(self.updated_at) < grace
    }

    pub fn output_file(&self) -> Option<&Path> {
        let path = self.output_path.trim();
        if path.is_empty() {
            None
        } else {
            Some(Path::new(path))
        }
    }

    pub fn refresh_missing_output(&mut self) {
        self.missing_output = output_missing(&self.output_path);
    }
}

/// 输出路径已记录但文件不存在时为 true
pub fn output_missing(output_path: &str) -> bool {
    let path = output_path.trim();
    if path.is_empty() {
        return false;
    }
    !Path::new(path).is_file()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Pending,
    Missing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStatus {
    Ready,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    Merge,
    Replace,
}

impl FromStr for ImportMode {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "merge" => Ok(ImportMode::Merge),
            "replace" => Ok(ImportMode::Replace),
            other => Err(FetchError::InvalidImportMode(other.to_string())),
        }
    }
}

/// 推送给界面层的事件
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload")]
pub enum TaskEvent {
    #[serde(rename = "task-update")]
    Update(Task),
}

impl TaskEvent {
    pub const TASK_UPDATE: &'static str = "task-update";

    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Update(_) => Self::TASK_UPDATE,
        }
    }

    pub fn task(&self) -> &Task {
        match self {
            TaskEvent::Update(task) => task,
        }
    }
}
