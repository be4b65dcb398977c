use crate::error::{ImgvidError, Result};
use crate::fetcher::ByteStream;
use crate::frame::{Frame, FrameKey};
use crate::media::MediaType;
use futures::StreamExt;
use std::io;
use std::path::{Component, Path};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// 落盘结果
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub frame: Frame,
    pub bytes_written: u64,
}

/// 帧存储：`{cache_dir}/{key}{ext}`
///
/// 同一秒的两帧文件名相同，后写入者覆盖先写入者。
/// 写入失败时不清理残留的部分文件。
#[derive(Debug, Clone, Default)]
pub struct FrameStore;

impl FrameStore {
    pub fn new() -> Self {
        Self
    }

    pub async fn store(
        &self,
        cache_dir: &Path,
        body: ByteStream,
        media: MediaType,
        key: FrameKey,
    ) -> Result<StoredFrame> {
        let frame = Frame::new(cache_dir, key, media);
        self.write_file(cache_dir, &frame.path, media.extension(), body)
            .await
            .map(|bytes_written| {
                debug!(
                    path = %frame.path.display(),
                    bytes = bytes_written,
                    "Stored frame"
                );
                StoredFrame {
                    frame,
                    bytes_written,
                }
            })
    }

    async fn write_file(
        &self,
        cache_dir: &Path,
        path: &Path,
        extension: &str,
        mut body: ByteStream,
    ) -> Result<u64> {
        let storage_err = |source: io::Error| ImgvidError::StorageWrite {
            path: path.to_path_buf(),
            source,
        };

        // 扩展名不得把文件带出缓存目录
        if !stays_inside(cache_dir, path) || extension.contains(['/', '\\']) {
            return Err(storage_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame path escapes cache dir: {}", extension),
            )));
        }

        async_fs::create_dir_all(cache_dir).await.map_err(storage_err)?;

        let mut file = async_fs::File::create(path).await.map_err(storage_err)?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(storage_err)?;
            file.write_all(&chunk).await.map_err(storage_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(storage_err)?;

        Ok(written)
    }
}

fn stays_inside(dir: &Path, path: &Path) -> bool {
    match path.strip_prefix(dir) {
        Ok(rest) => {
            let mut components = rest.components();
            matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            )
        }
        Err(_) => false,
    }
}
