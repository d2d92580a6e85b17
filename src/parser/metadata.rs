use serde::Deserialize;
use tracing::debug;

use super::url_parser::source_host_from_url;
use crate::downloader::models::Task;

/// yt-dlp `-J` 输出中我们关心的字段
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMetadata {
    title: String,
    duration: Option<f64>,
    extractor: String,
    resolution: Option<String>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawFormat {
    resolution: Option<String>,
    width: Option<f64>,
    height: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatInfo {
    pub resolution: String,
    pub width: u32,
    pub height: u32,
    pub filesize: u64,
}

/// 解析后的媒体信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaMetadata {
    pub title: String,
    pub source_host: String,
    pub duration: u64,
    pub filesize: u64,
    pub width: u32,
    pub height: u32,
}

impl MediaMetadata {
    /// 把解析结果合并进任务，返回是否有字段发生变化
    pub fn apply_to(&self, task: &mut Task) -> bool {
        let mut changed = false;
        if !self.title.is_empty() && task.has_placeholder_title() && task.title != self.title {
            task.title = self.title.clone();
            changed = true;
        }
        if task.source_host.trim().is_empty() && !self.source_host.is_empty() {
            task.source_host = self.source_host.clone();
            changed = true;
        }
        changed |= set_if_positive(&mut task.duration, self.duration);
        changed |= set_if_positive(&mut task.filesize, self.filesize);
        changed |= set_if_positive(&mut task.width, self.width);
        changed |= set_if_positive(&mut task.height, self.height);
        changed
    }
}

fn set_if_positive<T: PartialEq + Default + Copy>(slot: &mut T, value: T) -> bool {
    if value == T::default() || *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// 解析 `-J` 的 JSON 输出；任何解析失败都视为"没有元数据"
pub fn parse_metadata(raw: &[u8], url: &str) -> Option<MediaMetadata> {
    let info: RawMetadata = match serde_json::from_slice(raw) {
        Ok(info) => info,
        Err(e) => {
            debug!("元数据解析失败: {}", e);
            return None;
        }
    };

    let best = pick_best_format(&info.formats);

    let mut width = to_u32(info.width);
    let mut height = to_u32(info.height);
    if width == 0 && height == 0 {
        if let Some((w, h)) = info.resolution.as_deref().and_then(parse_resolution) {
            width = w;
            height = h;
        }
    }
    if width == 0 && height == 0 {
        width = best.width;
        height = best.height;
    }

    let mut filesize = pick_filesize(info.filesize, info.filesize_approx);
    if filesize == 0 {
        filesize = best.filesize;
    }

    let source_host = match info.extractor.trim() {
        "" => source_host_from_url(url),
        extractor => extractor.to_string(),
    };

    Some(MediaMetadata {
        title: info.title.trim().to_string(),
        source_host,
        duration: info.duration.filter(|d| *d > 0.0).map(|d| d as u64).unwrap_or(0),
        filesize,
        width,
        height,
    })
}

/// 按文件大小挑选最佳格式；都没有大小时按 宽×高 比较
fn pick_best_format(formats: &[RawFormat]) -> FormatInfo {
    let candidates: Vec<FormatInfo> = formats.iter().map(FormatInfo::from).collect();
    let any_sized = candidates.iter().any(|f| f.filesize > 0);

    let mut best = FormatInfo::default();
    let mut best_score = 0u64;
    for format in candidates {
        let score = if any_sized {
            format.filesize
        } else {
            u64::from(format.width) * u64::from(format.height)
        };
        if score > best_score {
            best_score = score;
            best = format;
        }
    }
    best
}

impl From<&RawFormat> for FormatInfo {
    fn from(format: &RawFormat) -> Self {
        let resolution = format.resolution.as_deref().unwrap_or("").trim().to_string();
        let mut width = to_u32(format.width);
        let mut height = to_u32(format.height);
        if width == 0 && height == 0 {
            if let Some((w, h)) = parse_resolution(&resolution) {
                width = w;
                height = h;
            }
        }
        Self {
            filesize: pick_filesize(format.filesize, format.filesize_approx),
            resolution,
            width,
            height,
        }
    }
}

fn pick_filesize(primary: Option<f64>, fallback: Option<f64>) -> u64 {
    primary
        .or(fallback)
        .filter(|size| *size > 0.0)
        .map(|size| size as u64)
        .unwrap_or(0)
}

fn to_u32(value: Option<f64>) -> u32 {
    value.filter(|v| *v > 0.0).map(|v| v as u32).unwrap_or(0)
}

/// 解析形如 `1920x1080` 的分辨率字符串
pub fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let lower = value.trim().to_lowercase();
    let (w, h) = lower.split_once('x')?;
    let width = w.trim().parse().ok()?;
    let height = h.trim().parse().ok()?;
    Some((width, height))
}
