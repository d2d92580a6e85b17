use colored::*;

use crate::downloader::models::{Task, TaskStatus};

/// 漂亮的终端输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示错误消息
    pub fn error(message: impl AsRef<str>) {
        eprintln!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示文件信息
    pub fn file_info(label: impl AsRef<str>, path: impl AsRef<str>) {
        println!("{} {}: {}", "📁".blue().bold(), label.as_ref().bold(), path.as_ref());
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    /// 任务列表中的一行
    pub fn task_row(task: &Task) {
        let status = match task.status {
            TaskStatus::Queued => "排队中".bright_black(),
            TaskStatus::Running => "下载中".cyan(),
            TaskStatus::Success => "已完成".green(),
            TaskStatus::Failed => "失败".red(),
        };
        println!(
            "{} {} {} {}",
            task.id.bright_black(),
            status.bold(),
            task.title.bold(),
            task.progress
        );
        println!("    {} {}", task.stage.cyan(), task.url.bright_black());
        if !task.output_path.is_empty() {
            let marker = if task.missing_output {
                "(文件已丢失)".red()
            } else {
                "".normal()
            };
            println!("    {} {}", task.output_path, marker);
        }
        if let Some(line) = task.error_message.lines().next() {
            println!("    {}", line.red());
        }
    }

    /// 显示完成总结
    pub fn completion_summary(tasks: &[Task]) {
        let succeeded = tasks.iter().filter(|t| t.status == TaskStatus::Success).count();
        let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
        println!(
            "\n{} 成功 {} 个，失败 {} 个",
            "🎉 下载结束".green().bold(),
            succeeded.to_string().green(),
            failed.to_string().red()
        );
        for task in tasks.iter().filter(|t| t.status == TaskStatus::Failed) {
            println!("  {} {}", task.id.bright_black(), task.error_message.lines().next().unwrap_or_default());
        }
    }
}

/// 便捷宏用于漂亮的日志输出
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}
