use crate::downloader::models::Task;

pub const PROGRESS_PREFIX: &str = "progress:";

/// 传给 yt-dlp `--progress-template` 的模板
pub const PROGRESS_TEMPLATE: &str =
    "progress:%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: String,
    pub speed: String,
    pub eta: String,
}

impl ProgressUpdate {
    /// 只有至少一个字段变化时才写入，返回是否写入
    pub fn apply_to(&self, task: &mut Task) -> bool {
        if task.progress == self.percent && task.speed == self.speed && task.eta == self.eta {
            return false;
        }
        task.progress = self.percent.clone();
        task.speed = self.speed.clone();
        task.eta = self.eta.clone();
        true
    }
}

/// 解析 `progress:<percent>|<speed>|<eta>` 行，其余行返回 None
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let body = line.strip_prefix(PROGRESS_PREFIX)?.trim();
    if body.is_empty() {
        return None;
    }
    let mut parts = body.splitn(3, '|').map(str::trim);
    Some(ProgressUpdate {
        percent: parts.next().unwrap_or_default().to_string(),
        speed: parts.next().unwrap_or_default().to_string(),
        eta: parts.next().unwrap_or_default().to_string(),
    })
}
