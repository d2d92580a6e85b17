use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::ENGINE_NAME;
use crate::engine::profile::DEFAULT_PROFILE_ID;

/// 同时运行的下载数
pub const DEFAULT_POOL_SIZE: usize = 3;

/// 等待队列容量，超出时入队失败而不是阻塞调用方
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Running 状态在这个时间内有更新，视为仍有 worker 在处理
pub const RUNNING_GRACE_SECONDS: i64 = 30;

/// 续传判断的兜底窗口：任务创建前这么久以内修改过的未完成文件
pub const PARTIAL_FALLBACK_SECONDS: i64 = 60;

pub const ENV_HOME: &str = "FETCHFORGE_HOME";
pub const ENV_ENGINE_PATH: &str = "FETCHFORGE_YTDLP_PATH";
pub const ENV_ENGINE_ARGS: &str = "FETCHFORGE_YTDLP_ARGS";

const TASKS_FILE: &str = "tasks.json";
const CONFIG_FILE: &str = "config.json";

/// 启动时确定、之后只读的运行配置
#[derive(Debug, Clone)]
pub struct Settings {
    /// 配置目录，存放任务快照和 config.json
    pub config_dir: PathBuf,
    /// 下载根目录，按任务创建日期分子目录
    pub download_dir: PathBuf,
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub running_grace: TimeDelta,
    pub partial_fallback: TimeDelta,
    pub engine_path: PathBuf,
    pub engine_args: Vec<String>,
}

impl Settings {
    /// 以指定目录为配置目录，其余取默认值
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            download_dir: config_dir.join("downloads"),
            engine_path: PathBuf::from(ENGINE_NAME),
            config_dir,
            pool_size: DEFAULT_POOL_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            running_grace: TimeDelta::seconds(RUNNING_GRACE_SECONDS),
            partial_fallback: TimeDelta::seconds(PARTIAL_FALLBACK_SECONDS),
            engine_args: Vec::new(),
        }
    }

    /// 从环境变量读取配置
    pub fn from_env() -> Self {
        let config_dir = std::env::var(ENV_HOME)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_config_dir);

        let mut settings = Self::with_config_dir(config_dir);
        settings.engine_path = resolve_engine_path(
            std::env::var(ENV_ENGINE_PATH).ok().as_deref(),
            &settings.config_dir,
        );
        settings.engine_args = parse_extra_args(&std::env::var(ENV_ENGINE_ARGS).unwrap_or_default());
        debug!("使用配置: {:?}", settings);
        settings
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.config_dir.join(TASKS_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// 任务的输出目录，按创建日期（本地时间）分桶
    pub fn output_dir_for(&self, created_at: DateTime<Utc>) -> PathBuf {
        let bucket = created_at.with_timezone(&Local).format("%Y-%m-%d").to_string();
        self.download_dir.join(bucket)
    }
}

fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fetchforge")
}

/// 环境变量里的额外参数，按空白切分
pub fn parse_extra_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// 查找 yt-dlp：环境变量 → PATH → 常见安装位置 → 裸命令名
pub fn resolve_engine_path(env_override: Option<&str>, config_dir: &Path) -> PathBuf {
    if let Some(path) = env_override.map(str::trim).filter(|p| !p.is_empty()) {
        if Path::new(path).is_file() {
            return PathBuf::from(path);
        }
        debug!("{} 指向的文件不存在: {}", ENV_ENGINE_PATH, path);
    }

    if let Some(found) = search_path(ENGINE_NAME) {
        return found;
    }

    let mut candidates: Vec<PathBuf> = ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"]
        .iter()
        .map(|dir| Path::new(dir).join(ENGINE_NAME))
        .collect();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(ENGINE_NAME));
        candidates.push(exe_dir.join("..").join("Resources").join(ENGINE_NAME));
    }
    candidates.push(config_dir.join("bin").join(ENGINE_NAME));

    candidates
        .into_iter()
        .find(|c| c.is_file())
        .unwrap_or_else(|| PathBuf::from(ENGINE_NAME))
}

fn search_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let unix = dir.join(name);
        if unix.is_file() {
            return Some(unix);
        }
        let windows = dir.join(format!("{name}.exe"));
        windows.is_file().then_some(windows)
    })
}

/// 持久化的用户配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub active_profile_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            active_profile_id: DEFAULT_PROFILE_ID.to_string(),
        }
    }
}
