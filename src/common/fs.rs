use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

/// 递归列出目录下所有普通文件，读取失败的条目直接跳过
pub fn walk_files(root: &Path) -> Vec<(PathBuf, Metadata)> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("无法读取目录 {:?}: {}", dir, e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                files.push((entry.path(), meta));
            }
        }
    }
    files
}

/// 找出修改时间不早于 `after` 的最新文件；`after` 为空时不做限制
pub fn newest_file(root: &Path, after: Option<SystemTime>) -> Option<PathBuf> {
    walk_files(root)
        .into_iter()
        .filter_map(|(path, meta)| meta.modified().ok().map(|modified| (path, modified)))
        .filter(|(_, modified)| after.is_none_or(|after| *modified >= after))
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

/// 先写临时文件再重命名覆盖目标文件
pub async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let tmp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));
    if let Err(e) = tokio::fs::write(&tmp_path, data).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}
