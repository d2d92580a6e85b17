use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};

use super::models::{ResumeStatus, Task};
use crate::common::fs::walk_files;

pub const PLACEHOLDER_TITLE: &str = "Pending title";

/// 标题是否只是占位：空、占位文本、纯数字，或不少于 12 位的十六进制串
pub fn is_placeholder_title(title: &str) -> bool {
    let title = title.trim();
    if title.is_empty() || title == PLACEHOLDER_TITLE {
        return true;
    }
    if title.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    title.chars().all(|c| c.is_ascii_hexdigit()) && title.chars().count() >= 12
}

/// 转小写并去掉所有非字母数字字符
pub fn normalize_for_match(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// yt-dlp 的未完成文件：名字里带 `.part`，或以 `.ytdl` 结尾
pub fn is_partial_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains(".part") || lower.ends_with(".ytdl")
}

/// 已有输出文件比记录的大小小，说明下载中断过
pub fn has_truncated_output(output_path: &str, recorded_size: u64) -> bool {
    let path = output_path.trim();
    if path.is_empty() {
        return false;
    }
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len() < recorded_size,
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct PartialFile {
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
}

pub fn scan_partial_files(dir: &Path) -> Vec<PartialFile> {
    walk_files(dir)
        .into_iter()
        .filter_map(|(path, meta)| {
            let name = path.file_name()?.to_string_lossy().into_owned();
            if !is_partial_file(&name) {
                return None;
            }
            Some(PartialFile {
                name,
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            })
        })
        .collect()
}

/// 在未完成文件中查找与标题匹配的；找不到时，只要有任务创建前
/// `fallback` 以内修改过的未完成文件也视为可续传
pub fn match_partial_files(
    partials: &[PartialFile],
    title: &str,
    created_at: DateTime<Utc>,
    fallback: TimeDelta,
) -> bool {
    let normalized_title = normalize_for_match(title);
    if normalized_title.is_empty() {
        return false;
    }

    if partials
        .iter()
        .any(|p| normalize_for_match(&p.name).contains(&normalized_title))
    {
        return true;
    }

    let cutoff = created_at - fallback;
    partials
        .iter()
        .any(|p| p.modified.is_some_and(|modified| modified >= cutoff))
}

/// 判断任务能否续传
pub fn resume_status(
    task: &Task,
    output_dir: &Path,
    now: DateTime<Utc>,
    grace: TimeDelta,
    fallback: TimeDelta,
) -> ResumeStatus {
    if task.is_actively_running(now, grace) {
        return ResumeStatus::None;
    }

    if has_truncated_output(&task.output_path, task.filesize) {
        return ResumeStatus::Ready;
    }

    if task.has_placeholder_title() {
        return ResumeStatus::None;
    }

    let partials = scan_partial_files(output_dir);
    if match_partial_files(&partials, &task.title, task.created_at, fallback) {
        ResumeStatus::Ready
    } else {
        ResumeStatus::None
    }
}
