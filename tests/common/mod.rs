#![allow(dead_code)]

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fetchforge::common::desktop::Desktop;
use fetchforge::downloader::DownloadManager;
use fetchforge::Settings;

/// 假的 yt-dlp 行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Ok,
    Slow,
    Fail,
}

/// 用 shell 脚本模拟 yt-dlp：记录参数、输出元数据或进度，并写出假文件
pub struct FakeEngine {
    pub home: TempDir,
    pub script: PathBuf,
    pub log: PathBuf,
}

impl FakeEngine {
    pub fn new(mode: EngineMode) -> Self {
        let home = tempfile::tempdir().unwrap();
        let script = home.path().join("fake-yt-dlp");
        let log = home.path().join("engine.log");
        let mode = match mode {
            EngineMode::Ok => "ok",
            EngineMode::Slow => "slow",
            EngineMode::Fail => "fail",
        };
        let body = format!(
            r#"#!/bin/sh
printf '%s\n' "$*" >> '{log}'
out=""
url=""
meta=0
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  if [ "$arg" = "-J" ]; then meta=1; fi
  prev="$arg"
  url="$arg"
done
name=$(basename "$url")
if [ "$meta" = "1" ]; then
  printf '{{"title":"Clip %s","duration":12,"width":1280,"height":720}}\n' "$name"
  exit 0
fi
if [ '{mode}' = "fail" ]; then
  echo "progress: 30.0%|1.00MiB/s|00:05" >&2
  echo "WARNING: [generic] $name: retrying with fallback client" >&2
  echo "ERROR: [generic] $name: HTTP Error 403 Forbidden" >&2
  exit 1
fi
if [ '{mode}' = "slow" ]; then sleep 1; fi
dir=$(dirname "$out")
mkdir -p "$dir"
echo "progress: 10.0%|1.00MiB/s|00:09"
echo "progress: 55.5%|2.00MiB/s|00:04"
echo "progress:100.0%|2.00MiB/s|00:00"
printf 'fake media' > "$dir/Clip $name.mp4"
exit 0
"#,
            log = log.display(),
            mode = mode,
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { home, script, log }
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::with_config_dir(self.home.path().join("config"));
        settings.download_dir = self.home.path().join("downloads");
        settings.engine_path = self.script.clone();
        settings
    }

    /// 每次调用的参数，一行一次
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn download_invocations(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| !line.contains(" -J "))
            .collect()
    }
}

/// 记录打开和回收操作，不触碰真实桌面环境
#[derive(Default)]
pub struct FakeDesktop {
    pub opened: Mutex<Vec<PathBuf>>,
    pub trashed: Mutex<Vec<PathBuf>>,
    pub fail_trash: bool,
}

impl FakeDesktop {
    pub fn failing() -> Self {
        Self {
            fail_trash: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }

    pub fn trashed(&self) -> Vec<PathBuf> {
        self.trashed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Desktop for FakeDesktop {
    async fn open(&self, target: &Path) -> io::Result<()> {
        self.opened.lock().unwrap().push(target.to_path_buf());
        Ok(())
    }

    async fn move_to_trash(&self, target: &Path) -> io::Result<()> {
        if self.fail_trash {
            return Err(io::Error::other("trash unavailable"));
        }
        self.trashed.lock().unwrap().push(target.to_path_buf());
        std::fs::remove_file(target)
    }
}

pub async fn start(settings: Settings, desktop: Arc<FakeDesktop>) -> DownloadManager {
    DownloadManager::start(settings, desktop).await
}

/// 等待队列清空，超时视为失败
pub async fn settle(manager: &DownloadManager) {
    tokio::time::timeout(Duration::from_secs(20), manager.wait_idle())
        .await
        .expect("下载队列没有在超时前清空");
}
