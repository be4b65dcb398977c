use crate::media::MediaType;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

/// 时间戳编码宽度，覆盖 u64 全部取值
pub const FRAME_KEY_WIDTH: usize = 20;

/// 帧键（Unix 秒）
///
/// 文件名使用定宽零填充编码，保证字典序与时间序一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameKey(u64);

impl FrameKey {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// 早于 1970 的时间统一钳到 0
    pub fn from_datetime(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp.timestamp().max(0) as u64)
    }

    pub fn secs(&self) -> u64 {
        self.0
    }

    /// 编码为文件名：`{secs:020}{extension}`
    pub fn file_name(&self, extension: &str) -> String {
        format!("{:0width$}{}", self.0, extension, width = FRAME_KEY_WIDTH)
    }

    /// 从文件名解码，返回帧键与扩展名（含前导点）
    pub fn parse(file_name: &str) -> Option<(Self, &str)> {
        if file_name.len() < FRAME_KEY_WIDTH {
            return None;
        }
        let (digits, extension) = file_name.split_at(FRAME_KEY_WIDTH);
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !extension.is_empty() && !extension.starts_with('.') {
            return None;
        }
        let secs = digits.parse::<u64>().ok()?;
        Some((Self(secs), extension))
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 已落盘的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub path: PathBuf,
    pub key: FrameKey,
    pub media: MediaType,
}

impl Frame {
    pub fn new(cache_dir: &Path, key: FrameKey, media: MediaType) -> Self {
        Self {
            path: cache_dir.join(key.file_name(media.extension())),
            key,
            media,
        }
    }
}
