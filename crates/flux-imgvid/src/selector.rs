use crate::error::Result;
use crate::media::MediaType;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use tokio::fs as async_fs;

/// 某个源、某种扩展名的全部帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePattern {
    dir: PathBuf,
    extension: String,
}

impl FramePattern {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// 交给转码器的 glob：`{dir}/*{ext}`
    ///
    /// 目录与扩展名中的通配符被转义，展开结果与 [`FramePattern::list`] 一致。
    pub fn as_glob(&self) -> String {
        let dir = self.dir.to_string_lossy();
        let dir = dir.trim_end_matches(MAIN_SEPARATOR);
        format!(
            "{}{}*{}",
            escape_glob(dir),
            MAIN_SEPARATOR,
            escape_glob(&self.extension)
        )
    }

    /// 与 glob 语义一致的文件名匹配
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.len() > self.extension.len() && file_name.ends_with(&self.extension)
    }

    /// 求值：按文件名字典序（即时间序）返回匹配的帧路径，目录不存在时为空
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match async_fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.matches(&name) {
                continue;
            }
            // 并发清理可能已删除该文件
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => names.push(name),
                _ => {}
            }
        }

        names.sort();
        Ok(names.into_iter().map(|n| self.dir.join(n)).collect())
    }
}

/// 帧选择器（纯模式构造，不访问文件系统）
pub struct FrameSelector;

impl FrameSelector {
    pub fn pattern(cache_dir: &Path, media: MediaType) -> FramePattern {
        Self::pattern_for_extension(cache_dir, media.extension())
    }

    pub fn pattern_for_extension(cache_dir: &Path, extension: &str) -> FramePattern {
        FramePattern {
            dir: cache_dir.to_path_buf(),
            extension: extension.to_string(),
        }
    }
}

/// 转义 glob 元字符（含 ffmpeg 启用的 GLOB_BRACE）
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '\\' | '*' | '?' | '[' | ']' | '{' | '}') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
