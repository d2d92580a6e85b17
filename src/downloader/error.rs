use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("任务未找到: {0}")]
    NotFound(String),

    #[error("配置方案不存在: {0}")]
    ProfileNotFound(String),

    #[error("任务正在运行: {0}")]
    AlreadyRunning(String),

    #[error("无效的导入数据: {0}")]
    InvalidPayload(String),

    #[error("无效的导入模式: {0}")]
    InvalidImportMode(String),

    #[error("移动到回收站失败: {0}")]
    DeletionFailed(String),

    #[error("下载引擎执行失败: {0}")]
    EngineFailure(String),

    #[error("文件不存在: {0:?}")]
    FileMissing(PathBuf),

    #[error("输出文件尚未生成")]
    OutputPending,

    #[error("下载队列已满，无法加入任务: {0}")]
    QueueFull(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;
