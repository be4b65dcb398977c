use anyhow::{anyhow, Context};
use flux_imgvid::ImgvidConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// 在 PATH 中查找可执行文件；含路径分隔符时直接检查该路径
pub fn resolve_executable(bin: &Path) -> Option<PathBuf> {
    if bin.components().count() > 1 {
        return is_executable(bin).then(|| bin.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// 启动前检查：定位转码器并创建缓存根目录
pub async fn prepare(config: &mut ImgvidConfig) -> anyhow::Result<()> {
    let ffmpeg = resolve_executable(&config.transcoder.ffmpeg_bin).ok_or_else(|| {
        anyhow!(
            "transcoder not found: {}",
            config.transcoder.ffmpeg_bin.display()
        )
    })?;
    info!(path = %ffmpeg.display(), "Using transcoder");
    config.transcoder.ffmpeg_bin = ffmpeg;

    tokio::fs::create_dir_all(&config.cache.root_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create cache root {}",
                config.cache.root_dir.display()
            )
        })?;
    info!(root = %config.cache.root_dir.display(), "Frame cache ready");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_from_path() {
        let resolved = resolve_executable(Path::new("sh")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sh"));
    }

    #[test]
    fn test_resolve_missing() {
        assert!(resolve_executable(Path::new("definitely-not-a-transcoder-binary")).is_none());
        assert!(resolve_executable(Path::new("/nonexistent/bin/ffmpeg")).is_none());
    }

    #[tokio::test]
    async fn test_prepare_creates_cache_root() {
        let temp_dir = tempdir().unwrap();
        let mut config = ImgvidConfig::default();
        config.transcoder.ffmpeg_bin = PathBuf::from("echo");
        config.cache.root_dir = temp_dir.path().join("a").join("b");

        prepare(&mut config).await.unwrap();
        assert!(config.cache.root_dir.is_dir());
        assert!(config.transcoder.ffmpeg_bin.is_absolute());
    }

    #[tokio::test]
    async fn test_prepare_fails_without_transcoder() {
        let temp_dir = tempdir().unwrap();
        let mut config = ImgvidConfig::default();
        config.transcoder.ffmpeg_bin = PathBuf::from("/nonexistent/ffmpeg");
        config.cache.root_dir = temp_dir.path().to_path_buf();

        assert!(prepare(&mut config).await.is_err());
    }
}
