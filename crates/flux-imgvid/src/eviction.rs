use crate::error::{ImgvidError, Result};
use crate::selector::FramePattern;
use std::io;
use std::path::PathBuf;
use tokio::fs as async_fs;
use tracing::debug;

/// 清理统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// 清理前的帧数
    pub total: usize,
    pub removed: Vec<PathBuf>,
    pub retained: usize,
}

/// 保留最新 N 帧的清理策略
///
/// 同一源目录上没有加锁：并发请求的清理可能删除另一请求正在读取的帧，
/// 已被他人删除的文件按已清理计。
#[derive(Debug, Clone, Default)]
pub struct EvictionPolicy;

impl EvictionPolicy {
    pub fn new() -> Self {
        Self
    }

    /// 删除最旧的 `count - max_retained` 帧
    ///
    /// 单个文件删除失败不会中断本轮清理，返回第一个失败。
    pub async fn evict(&self, pattern: &FramePattern, max_retained: usize) -> Result<EvictionReport> {
        let frames = pattern.list().await?;
        let total = frames.len();

        if total <= max_retained {
            return Ok(EvictionReport {
                total,
                removed: Vec::new(),
                retained: total,
            });
        }

        let excess = total - max_retained;
        let (removed, first_error) = remove_frames(frames.into_iter().take(excess)).await;

        debug!(
            dir = %pattern.dir().display(),
            total,
            removed = removed.len(),
            max_retained,
            "Eviction pass finished"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(EvictionReport {
                total,
                retained: total - removed.len(),
                removed,
            }),
        }
    }
}

/// 依次删除给定的帧，返回已删除的路径和第一个失败
async fn remove_frames<I>(paths: I) -> (Vec<PathBuf>, Option<ImgvidError>)
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut removed = Vec::new();
    let mut first_error: Option<ImgvidError> = None;

    for path in paths {
        match async_fs::remove_file(&path).await {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => removed.push(path),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to evict frame");
                if first_error.is_none() {
                    first_error = Some(ImgvidError::Eviction { path, source: e });
                }
            }
        }
    }

    (removed, first_error)
}
