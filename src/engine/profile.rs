use serde::{Deserialize, Serialize};

pub const DEFAULT_PROFILE_ID: &str = "default";

/// 一组固定的 yt-dlp 额外参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub args: Vec<String>,
}

impl Profile {
    fn new(id: &str, name: &str, args: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

pub fn builtin_profiles() -> Vec<Profile> {
    vec![
        Profile::new(DEFAULT_PROFILE_ID, "Default", &[]),
        Profile::new("audio-only", "Audio Only", &["-x", "--audio-format", "mp3"]),
        Profile::new("best-quality", "Best Quality", &["-f", "bv*+ba/b"]),
    ]
}

pub fn find_profile(id: &str) -> Option<Profile> {
    builtin_profiles().into_iter().find(|p| p.id == id)
}

/// 未知 id 回退到默认方案
pub fn profile_or_default(id: &str) -> Profile {
    find_profile(id)
        .or_else(|| find_profile(DEFAULT_PROFILE_ID))
        .unwrap_or_else(|| Profile::new(DEFAULT_PROFILE_ID, "Default", &[]))
}
