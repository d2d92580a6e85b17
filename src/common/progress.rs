use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::downloader::models::{Task, TaskStatus};

const BAR_LENGTH: u64 = 1000;

/// 终端里跟踪一组任务的进度条
pub struct TaskProgress {
    multi_pb: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl Default for TaskProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskProgress {
    pub fn new() -> Self {
        Self {
            multi_pb: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    /// 只跟踪还没结束的任务
    pub fn track(&mut self, task: &Task) {
        if task.status.is_terminal() || self.bars.contains_key(&task.id) {
            return;
        }
        let pb = self.multi_pb.add(ProgressBar::new(BAR_LENGTH));
        let style = ProgressStyle::default_bar()
            .template("{msg:40} [{elapsed_precise}] {wide_bar} {percent}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(task.title.clone());
        self.bars.insert(task.id.clone(), pb);
    }

    pub fn update(&mut self, task: &Task) {
        let Some(pb) = self.bars.get(&task.id) else {
            return;
        };
        if pb.is_finished() {
            return;
        }
        if let Some(percent) = parse_percent(&task.progress) {
            pb.set_position((percent * BAR_LENGTH as f64 / 100.0) as u64);
        }
        match task.status {
            TaskStatus::Success => pb.finish_with_message(format!("✓ {}", task.title)),
            TaskStatus::Failed => pb.abandon_with_message(format!("✗ {}", task.title)),
            _ => {
                let mut message = format!("{} · {}", task.title, task.stage);
                if !task.speed.is_empty() {
                    message.push_str(&format!(" {}", task.speed));
                }
                if !task.eta.is_empty() {
                    message.push_str(&format!(" ETA {}", task.eta));
                }
                pb.set_message(message);
            }
        }
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        self.bars.keys().cloned().collect()
    }

    pub fn is_done(&self) -> bool {
        self.bars.values().all(ProgressBar::is_finished)
    }
}

/// "42.5%" → 42.5，超出范围时截断
pub fn parse_percent(progress: &str) -> Option<f64> {
    let value = progress.trim().trim_end_matches('%').trim().parse::<f64>().ok()?;
    Some(value.clamp(0.0, 100.0))
}
