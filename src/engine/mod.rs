use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::downloader::error::FetchError;
use crate::parser::metadata::{MediaMetadata, parse_metadata};
use progress::{PROGRESS_TEMPLATE, ProgressUpdate, parse_progress_line};

pub mod profile;
pub mod progress;

pub const ENGINE_NAME: &str = "yt-dlp";

/// yt-dlp 命令行的封装，只负责拼参数、起进程和收集输出
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    extra_args: Vec<String>,
}

/// 进程正常退出时收集到的输出
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub stdout: String,
    pub stderr: String,
}

/// 进程启动失败或非零退出
#[derive(Debug, Clone)]
pub struct EngineFailure {
    pub exit_code: Option<i32>,
    pub command_line: String,
    pub stdout: String,
    pub stderr: String,
    pub error: String,
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", ENGINE_NAME)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {})", code)?;
        }
        write!(f, "\nCommand: {}", self.command_line)?;

        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        if !stdout.is_empty() {
            write!(f, "\nStdout:\n{}", stdout)?;
        }
        if !stderr.is_empty() {
            write!(f, "\nStderr:\n{}", stderr)?;
        }
        if stdout.is_empty() && stderr.is_empty() {
            write!(f, "\nError: {}", self.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineFailure {}

impl From<EngineFailure> for FetchError {
    fn from(failure: EngineFailure) -> Self {
        FetchError::EngineFailure(failure.to_string())
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// 下载参数：进度模板 + 配置方案参数 + 环境变量参数 + 续传标记 + 输出模板 + 链接
    pub fn download_args(
        &self,
        url: &str,
        output_dir: &Path,
        profile_args: &[String],
        resume: bool,
    ) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
        ];
        args.extend(profile_args.iter().cloned());
        args.extend(self.extra_args.iter().cloned());
        if resume {
            args.push("--continue".to_string());
        }
        args.push("-o".to_string());
        args.push(
            output_dir
                .join("%(title)s.%(ext)s")
                .to_string_lossy()
                .into_owned(),
        );
        args.push(url.to_string());
        args
    }

    pub fn metadata_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = ["--skip-download", "--no-warnings", "--no-playlist", "-J"]
            .iter()
            .map(|a| a.to_string())
            .collect();
        args.extend(self.extra_args.iter().cloned());
        args.push(url.to_string());
        args
    }

    pub fn command_line(&self, args: &[String]) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        {
            // 避免 Windows 下弹出控制台窗口
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }

    /// 以仅元数据模式调用引擎；失败或输出无法解析时返回 None
    pub async fn fetch_metadata(&self, url: &str) -> Option<MediaMetadata> {
        if url.trim().is_empty() {
            return None;
        }
        let args = self.metadata_args(url);
        let output = match self.command(&args).output().await {
            Ok(output) => output,
            Err(e) => {
                debug!("元数据获取失败，无法启动 {}: {}", ENGINE_NAME, e);
                return None;
            }
        };
        if !output.status.success() {
            debug!("元数据获取失败: {} 退出状态 {}", url, output.status);
            return None;
        }
        parse_metadata(&output.stdout, url)
    }

    /// 运行下载进程，同时读取 stdout 和 stderr 并实时解析进度。
    /// 两个输出流都读完且进程退出后才返回。
    pub async fn run_with_progress(
        &self,
        args: &[String],
        progress: UnboundedSender<ProgressUpdate>,
    ) -> Result<EngineOutput, EngineFailure> {
        let command_line = self.command_line(args);
        let mut child = match self.command(args).spawn() {
            Ok(child) => child,
            Err(e) => {
                return Err(EngineFailure {
                    exit_code: None,
                    command_line,
                    stdout: String::new(),
                    stderr: String::new(),
                    error: e.to_string(),
                });
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, stdout, stderr) = tokio::join!(
            child.wait(),
            read_stream(stdout, &progress),
            read_stream(stderr, &progress),
        );

        match status {
            Ok(status) if status.success() => Ok(EngineOutput { stdout, stderr }),
            Ok(status) => Err(EngineFailure {
                exit_code: status.code(),
                command_line,
                stdout,
                stderr,
                error: status.to_string(),
            }),
            Err(e) => Err(EngineFailure {
                exit_code: None,
                command_line,
                stdout,
                stderr,
                error: e.to_string(),
            }),
        }
    }
}

/// 按行读取输出流，原样保存每一行，遇到进度行就发出去
async fn read_stream<R>(reader: Option<R>, progress: &UnboundedSender<ProgressUpdate>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };
    let mut reader = BufReader::new(reader);
    let mut captured = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                captured.push_str(line);
                captured.push('\n');
                if let Some(update) = parse_progress_line(line) {
                    let _ = progress.send(update);
                }
            }
            Err(e) => {
                warn!("读取 {} 输出失败: {}", ENGINE_NAME, e);
                break;
            }
        }
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> YtDlp {
        YtDlp::new("/opt/bin/yt-dlp", vec!["--proxy".to_string(), "socks5://x".to_string()])
    }

    #[test]
    fn test_download_args_order() {
        let profile = vec!["-x".to_string()];
        let args = engine().download_args(
            "https://example.com/v",
            Path::new("/data/2024-01-02"),
            &profile,
            true,
        );
        assert_eq!(&args[..3], &["--newline", "--progress-template", PROGRESS_TEMPLATE]);
        assert_eq!(args[3], "-x");
        assert_eq!(&args[4..6], &["--proxy", "socks5://x"]);
        assert_eq!(args[6], "--continue");
        assert_eq!(args[7], "-o");
        assert!(args[8].ends_with("%(title)s.%(ext)s"));
        assert_eq!(args[9], "https://example.com/v");

        let args = engine().download_args("https://example.com/v", Path::new("/d"), &[], false);
        assert!(!args.contains(&"--continue".to_string()));
    }

    #[test]
    fn test_metadata_args() {
        let args = engine().metadata_args("https://example.com/v");
        assert_eq!(
            args,
            vec![
                "--skip-download",
                "--no-warnings",
                "--no-playlist",
                "-J",
                "--proxy",
                "socks5://x",
                "https://example.com/v"
            ]
        );
    }

    #[test]
    fn test_failure_message_layout() {
        let failure = EngineFailure {
            exit_code: Some(1),
            command_line: "yt-dlp -J https://x".to_string(),
            stdout: "\n".to_string(),
            stderr: "ERROR: 403 Forbidden\n".to_string(),
            error: "exit status: 1".to_string(),
        };
        let message = failure.to_string();
        assert_eq!(
            message,
            "yt-dlp failed (exit code 1)\nCommand: yt-dlp -J https://x\nStderr:\nERROR: 403 Forbidden"
        );

        let failure = EngineFailure {
            exit_code: None,
            command_line: "missing-binary".to_string(),
            stdout: String::new(),
            stderr: String::new(),
            error: "No such file or directory".to_string(),
        };
        assert!(failure.to_string().ends_with("Error: No such file or directory"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_failure_not_panic() {
        let engine = YtDlp::new("/definitely/not/here/yt-dlp", Vec::new());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let failure = engine.run_with_progress(&["--version".to_string()], tx).await.unwrap_err();
        assert!(failure.exit_code.is_none());
        assert!(failure.command_line.starts_with("/definitely/not/here/yt-dlp"));
        assert!(engine.fetch_metadata("https://example.com").await.is_none());
    }
}
