use crate::error::{ImgvidError, Result};
use anyhow::anyhow;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_NAME: &str = "imgvid";

/// 服务全局配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImgvidConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub transcoder: TranscoderConfig,
    pub fetch: FetchConfig,
    /// 输出转码器诊断信息和清理错误
    pub verbose: bool,
}

/// HTTP 监听配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 帧缓存配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root_dir: PathBuf,
    /// 每个源默认保留的帧数
    pub default_max_frames: usize,
}

/// 转码器（ffmpeg）配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub ffmpeg_bin: PathBuf,
    /// 输入格式参数（图片序列 + glob 展开）
    pub input_args: Vec<String>,
    pub output_format: String,
    pub content_type: String,
    /// 默认帧率（每秒消耗的帧数）
    pub default_rate: u32,
}

/// 图像抓取配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub compatible_mime_types: Vec<String>,
    /// 按优先级检查的时间头
    pub date_headers: Vec<String>,
    pub user_agent: String,
}

impl Default for ImgvidConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            transcoder: TranscoderConfig::default(),
            fetch: FetchConfig::default(),
            verbose: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: default_cache_root(),
            default_max_frames: 10,
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            input_args: ["-loglevel", "info", "-f", "image2", "-pattern_type", "glob"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            output_format: "mpeg".to_string(),
            content_type: "video/mpeg".to_string(),
            default_rate: 5,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            compatible_mime_types: ["image/jpeg", "image/jpg", "image/gif", "image/png"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            date_headers: vec!["last-modified".to_string(), "date".to_string()],
            user_agent: format!("flux-imgvid/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ImgvidConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.transcoder.default_rate == 0 {
            return Err(ImgvidError::InvalidConfig(
                "transcoder.default_rate must be greater than 0".to_string(),
            ));
        }
        if self.transcoder.ffmpeg_bin.as_os_str().is_empty() {
            return Err(ImgvidError::InvalidConfig(
                "transcoder.ffmpeg_bin must not be empty".to_string(),
            ));
        }
        if self.fetch.compatible_mime_types.is_empty() {
            return Err(ImgvidError::InvalidConfig(
                "fetch.compatible_mime_types must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 用户缓存目录下的 imgvid 子目录
fn default_cache_root() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(|| {
            std::env::var_os("HOME").map(|home| {
                let home = PathBuf::from(home);
                if cfg!(target_os = "macos") {
                    home.join("Library").join("Caches")
                } else {
                    home.join(".cache")
                }
            })
        })
        .unwrap_or_else(std::env::temp_dir);
    base.join(APP_NAME)
}

/// 配置加载器
///
/// 优先级：环境变量（`IMGVID__SECTION__KEY`） > 配置文件 > 默认值。
/// 命令行参数由守护进程在加载之后覆盖。
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> anyhow::Result<ImgvidConfig> {
        let mut builder = Config::builder();

        if self.config_path.exists() {
            builder = builder.add_source(File::new(
                self.config_path
                    .to_str()
                    .ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("IMGVID")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("fetch.compatible_mime_types")
                    .with_list_parse_key("fetch.date_headers")
                    .with_list_parse_key("transcoder.input_args")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: ImgvidConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }
}
