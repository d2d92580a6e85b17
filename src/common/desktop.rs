use std::io;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// 平台相关的文件操作：用默认程序打开、移到回收站
#[async_trait]
pub trait Desktop: Send + Sync {
    async fn open(&self, target: &Path) -> io::Result<()>;
    async fn move_to_trash(&self, target: &Path) -> io::Result<()>;
}

/// 调用系统命令实现
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDesktop;

impl SystemDesktop {
    fn open_command(target: &Path) -> Command {
        let mut cmd = if cfg!(target_os = "macos") {
            Command::new("open")
        } else if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/c", "start", ""]);
            cmd
        } else {
            Command::new("xdg-open")
        };
        cmd.arg(target);
        cmd
    }

    fn trash_command(target: &Path) -> Command {
        let target = target.to_string_lossy();
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("osascript");
            cmd.arg("-e").arg(format!(
                "tell application \"Finder\" to delete POSIX file {:?}",
                target
            ));
            cmd
        } else if cfg!(windows) {
            let mut cmd = Command::new("powershell");
            cmd.args(["-NoProfile", "-Command"]).arg(format!(
                "Add-Type -AssemblyName Microsoft.VisualBasic; \
                 [Microsoft.VisualBasic.FileIO.FileSystem]::DeleteFile({:?},'OnlyErrorDialogs','SendToRecycleBin')",
                target
            ));
            cmd
        } else {
            let mut cmd = Command::new("gio");
            cmd.arg("trash").arg(&*target);
            cmd
        }
    }
}

#[async_trait]
impl Desktop for SystemDesktop {
    async fn open(&self, target: &Path) -> io::Result<()> {
        debug!("打开: {:?}", target);
        // 不等待外部程序退出
        Self::open_command(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    }

    async fn move_to_trash(&self, target: &Path) -> io::Result<()> {
        debug!("移到回收站: {:?}", target);
        let output = Self::trash_command(target)
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "{} ({})",
                String::from_utf8_lossy(&output.stderr).trim(),
                output.status
            )))
        }
    }
}
