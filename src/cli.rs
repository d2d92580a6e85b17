use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fetchforge::downloader::ImportMode;

/// 基于 yt-dlp 的批量下载工具
#[derive(Parser, Debug)]
#[command(name = "fetchforge")]
#[command(version = "0.1")]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "粘贴任意文本，提取其中的链接并交给 yt-dlp 批量下载", long_about = None)]
pub struct Cli {
    /// 输出调试日志
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// 同时运行的下载数
    #[arg(long, global = true, value_name = "N")]
    pub concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 从文本中提取链接并下载
    Add {
        /// 任意文本，可以包含多个链接
        #[arg(required = true, value_name = "TEXT")]
        text: Vec<String>,
    },

    /// 列出所有任务
    List,

    /// 查看任务的文件状态与续传状态
    Status {
        id: String,
    },

    /// 重新下载一个任务
    Resume {
        id: String,

        /// 即使任务看起来还在运行也强制重新开始
        #[arg(long)]
        force: bool,
    },

    /// 删除任务，已下载的文件会移到回收站
    Delete {
        id: String,
    },

    /// 用默认程序打开下载好的文件
    Open {
        id: String,

        /// 打开所在目录而不是文件本身
        #[arg(long)]
        folder: bool,
    },

    /// 打开任意路径
    OpenPath {
        #[arg(value_hint = clap::ValueHint::AnyPath)]
        path: PathBuf,
    },

    /// 列出可用的下载方案
    Profiles,

    /// 切换下载方案
    UseProfile {
        id: String,
    },

    /// 导出任务列表
    Export {
        /// 导出目录，默认为系统下载目录
        #[arg(long, value_name = "DIR")]
        #[arg(value_hint = clap::ValueHint::DirPath)]
        output_dir: Option<PathBuf>,
    },

    /// 导入任务列表
    Import {
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        /// merge 或 replace
        #[arg(long, default_value = "merge")]
        mode: ImportMode,

        /// 把已完成的任务重新加入下载队列
        #[arg(long)]
        overwrite_downloaded: bool,
    },
}
