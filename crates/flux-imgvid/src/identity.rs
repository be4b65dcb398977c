use crate::error::{ImgvidError, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// 源标识
///
/// 由定位符（URL）纯函数地推导出缓存目录：`{cache_root}/{sha256(url)}`。
/// 不单独持久化，文件系统路径本身就是标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentity {
    locator: Url,
    fingerprint: String,
    cache_dir: PathBuf,
}

impl SourceIdentity {
    /// 解析定位符并计算缓存目录
    pub fn resolve(cache_root: &Path, locator: &str) -> Result<Self> {
        let url = Url::parse(locator.trim())
            .map_err(|e| ImgvidError::InvalidLocator(format!("{}: {}", locator, e)))?;
        Self::from_url(cache_root, url)
    }

    pub fn from_url(cache_root: &Path, locator: Url) -> Result<Self> {
        match locator.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ImgvidError::InvalidLocator(format!(
                    "{}: unsupported scheme {}",
                    locator, other
                )))
            }
        }
        if !locator.has_host() {
            return Err(ImgvidError::InvalidLocator(format!("{}: missing host", locator)));
        }

        let fingerprint = fingerprint(&locator);
        let cache_dir = cache_root.join(&fingerprint);

        Ok(Self {
            locator,
            fingerprint,
            cache_dir,
        })
    }

    pub fn locator(&self) -> &Url {
        &self.locator
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.locator, &self.fingerprint[..12])
    }
}

/// 规范化 URL 串的 SHA-256（小写十六进制，64 字符）
pub fn fingerprint(locator: &Url) -> String {
    let mut h = Sha256::new();
    h.update(locator.as_str().as_bytes());
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_deterministic() {
        let root = Path::new("/tmp/imgvid");
        let a = SourceIdentity::resolve(root, "http://example.test/cam.jpg").unwrap();
        let b = SourceIdentity::resolve(root, "http://example.test/cam.jpg").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.cache_dir(), b.cache_dir());
        assert_eq!(a.fingerprint().len(), 64);
        assert_eq!(a.cache_dir(), root.join(a.fingerprint()));
    }

    #[test]
    fn test_distinct_locators_distinct_dirs() {
        let root = Path::new("/tmp/imgvid");
        let locators = [
            "http://example.test/cam.jpg",
            "http://example.test/cam.jpg?size=large",
            "https://example.test/cam.jpg",
            "http://example.test/cam2.jpg",
            "http://other.test/cam.jpg",
        ];

        let mut dirs: Vec<PathBuf> = locators
            .iter()
            .map(|l| SourceIdentity::resolve(root, l).unwrap().cache_dir().to_path_buf())
            .collect();
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs.len(), locators.len());
    }

    #[test]
    fn test_canonical_form_is_hashed() {
        let root = Path::new("/tmp/imgvid");
        // 主机名大小写与默认端口在规范化后一致
        let a = SourceIdentity::resolve(root, "http://EXAMPLE.test:80/cam.jpg").unwrap();
        let b = SourceIdentity::resolve(root, "http://example.test/cam.jpg").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_known_fingerprint() {
        let url = Url::parse("http://example.test/cam.jpg").unwrap();
        let mut h = Sha256::new();
        h.update(b"http://example.test/cam.jpg");
        assert_eq!(fingerprint(&url), hex::encode(h.finalize()));
    }

    #[test]
    fn test_invalid_locators() {
        let root = Path::new("/tmp/imgvid");
        for bad in ["", "cam.jpg", "/relative/cam.jpg", "ftp://example.test/cam.jpg", "file:///etc/passwd"] {
            let err = SourceIdentity::resolve(root, bad).unwrap_err();
            assert!(
                matches!(err, ImgvidError::InvalidLocator(_)),
                "expected InvalidLocator for {:?}, got {:?}",
                bad,
                err
            );
        }
    }
}
