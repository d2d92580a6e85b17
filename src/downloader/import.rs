use chrono::{DateTime, Utc};

use super::error::{FetchError, Result};
use super::models::{Task, TaskStatus};

/// 解析并规整导入的任务记录。
/// 任一记录缺少 id 时整批失败；`overwrite_downloaded` 会把已完成的任务重置为排队中。
pub fn parse_payload(payload: &str, overwrite_downloaded: bool) -> Result<Vec<Task>> {
    if payload.trim().is_empty() {
        return Err(FetchError::InvalidPayload("导入内容为空".to_string()));
    }

    let mut records: Vec<Task> = serde_json::from_str(payload)
        .map_err(|e| FetchError::InvalidPayload(format!("JSON 格式错误: {e}")))?;

    let now = Utc::now();
    for (index, record) in records.iter_mut().enumerate() {
        if record.id.trim().is_empty() {
            return Err(FetchError::InvalidPayload(format!(
                "第 {} 条记录缺少任务 id",
                index + 1
            )));
        }
        if overwrite_downloaded && record.status == TaskStatus::Success {
            reset_for_download(record);
        }
        if record.created_at == DateTime::<Utc>::default() {
            record.created_at = now;
        }
        record.refresh_missing_output();
    }
    Ok(records)
}

fn reset_for_download(task: &mut Task) {
    task.status = TaskStatus::Queued;
    task.progress.clear();
    task.output_path.clear();
    task.missing_output = false;
    task.error_message.clear();
}
