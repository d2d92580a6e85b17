use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::downloader::resume::PLACEHOLDER_TITLE;

lazy_static! {
    static ref URL_PATTERN: Regex = Regex::new(r"https?://[^\s]+").unwrap();
}

/// 从任意文本中提取 http(s) 链接，按首次出现顺序去重
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .unique()
        .collect()
}

/// 元数据拿到之前用于展示的标题：路径最后一段（去掉扩展名），否则用域名
pub fn default_title_from_url(raw_url: &str) -> String {
    let Ok(parsed) = Url::parse(raw_url) else {
        return PLACEHOLDER_TITLE.to_string();
    };

    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.trim().is_empty()))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    if segment.is_empty() {
        return match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => PLACEHOLDER_TITLE.to_string(),
        };
    }

    let name = match segment.rfind('.') {
        Some(idx) => &segment[..idx],
        None => segment.as_str(),
    };
    if name.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        name.to_string()
    }
}

pub fn source_host_from_url(raw_url: &str) -> String {
    Url::parse(raw_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_default()
}
