use serde::{Deserialize, Serialize};
use std::fmt;

/// 支持缓存的静态图片类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Jpeg,
    Png,
    Gif,
}

impl MediaType {
    /// 从 content-type 解析（忽略大小写与 `;` 之后的参数）
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match essence(content_type).as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// 帧文件扩展名（含前导点）
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::Gif => ".gif",
        }
    }

    /// ffmpeg 输入解码器
    pub fn codec(&self) -> &'static str {
        match self {
            Self::Jpeg => "mjpeg",
            Self::Png => "png",
            Self::Gif => "gif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

/// 去掉参数后的小写 MIME 本体
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// 白名单 + 类型表同时命中才视为兼容
pub fn compatible_media_type(content_type: &str, allow_list: &[String]) -> Option<MediaType> {
    let essence = essence(content_type);
    let allowed = allow_list
        .iter()
        .any(|allowed| allowed.trim().eq_ignore_ascii_case(&essence));
    if !allowed {
        return None;
    }
    MediaType::from_content_type(&essence)
}
