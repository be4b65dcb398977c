use crate::config::ImgvidConfig;
use crate::error::{ErrorKind, ImgvidError, Result};
use crate::eviction::{EvictionPolicy, EvictionReport};
use crate::fetcher::{FrameFetcher, HttpImageSource, ImageSource, TimestampSource};
use crate::frame::FrameKey;
use crate::identity::SourceIdentity;
use crate::selector::FrameSelector;
use crate::store::{FrameStore, StoredFrame};
use crate::synthesizer::{StreamSynthesizer, SynthesisReport, VideoSink};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 原始请求参数（同名参数只取第一个值）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pub url: Option<String>,
    pub rate: Option<String>,
    pub max: Option<String>,
}

impl RequestParams {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "url" => &mut params.url,
                "rate" => &mut params.rate,
                "max" => &mut params.max,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }
        params
    }
}

/// 单次请求的上下文
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: SourceIdentity,
    /// 每秒消耗的帧数，恒大于 0
    pub rate: u32,
    pub max_frames: usize,
}

impl RequestContext {
    /// 从请求参数构造；`rate`/`max` 缺失或非法时静默回退到默认值
    pub fn from_params(params: &RequestParams, config: &ImgvidConfig) -> Result<Self> {
        let url = params
            .url
            .as_deref()
            .ok_or_else(|| ImgvidError::MissingParameter("url".to_string()))?;
        let identity = SourceIdentity::resolve(&config.cache.root_dir, url)?;

        let rate = params
            .rate
            .as_deref()
            .and_then(|r| r.trim().parse::<u32>().ok())
            .filter(|r| *r > 0)
            .unwrap_or(config.transcoder.default_rate);

        let max_frames = params
            .max
            .as_deref()
            .and_then(|m| m.trim().parse::<usize>().ok())
            .unwrap_or(config.cache.default_max_frames);

        Ok(Self {
            identity,
            rate,
            max_frames,
        })
    }
}

/// 请求状态机
///
/// `Idle → Resolved → Fetched → Stored → Streaming → Evicted | EvictionSkipped`，
/// 抓取、存储、合成任一步失败直接进入 `Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Resolved,
    Fetched,
    Stored,
    Streaming,
    Evicted,
    EvictionSkipped,
    Failed(ErrorKind),
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Evicted | Self::EvictionSkipped | Self::Failed(_))
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({:?})", kind),
            other => write!(f, "{:?}", other),
        }
    }
}

/// 清理结果（不影响请求成败）
#[derive(Debug, Clone)]
pub enum EvictionStatus {
    /// 删除了超出保留数的帧
    Evicted(EvictionReport),
    /// 未超出保留数
    Skipped(EvictionReport),
    /// 清理出错，仅记录
    Failed(String),
}

/// 抓取响应元数据
#[derive(Debug, Clone)]
pub struct FetchMetadata {
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub timestamp_source: TimestampSource,
}

/// 成功请求的结果
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub identity: SourceIdentity,
    pub fetched: FetchMetadata,
    pub stored: StoredFrame,
    pub synthesis: SynthesisReport,
    pub eviction: EvictionStatus,
    pub stage: PipelineStage,
}

/// 帧缓存与视频合成管线
pub struct Pipeline {
    config: ImgvidConfig,
    fetcher: FrameFetcher,
    store: FrameStore,
    synthesizer: StreamSynthesizer,
    eviction: EvictionPolicy,
}

impl Pipeline {
    pub fn new(config: ImgvidConfig, source: Arc<dyn ImageSource>) -> Self {
        let fetcher = FrameFetcher::new(source, &config.fetch);
        let synthesizer = StreamSynthesizer::new(config.transcoder.clone(), config.verbose);
        Self {
            config,
            fetcher,
            store: FrameStore::new(),
            synthesizer,
            eviction: EvictionPolicy::new(),
        }
    }

    /// 使用 reqwest 图像源
    pub fn from_config(config: ImgvidConfig) -> Result<Self> {
        let source = HttpImageSource::new(&config.fetch.user_agent)?;
        Ok(Self::new(config, Arc::new(source)))
    }

    pub fn config(&self) -> &ImgvidConfig {
        &self.config
    }

    pub fn context(&self, params: &RequestParams) -> Result<RequestContext> {
        RequestContext::from_params(params, &self.config)
    }

    /// 抓取 → 存储 → 选择 → 合成 → 清理
    ///
    /// 合成结束后立即释放 `sink`（响应体随之结束），再执行尽力而为的清理。
    pub async fn run<S: VideoSink>(&self, ctx: &RequestContext, sink: S) -> Result<PipelineOutcome> {
        let identity = &ctx.identity;
        self.transition(identity, PipelineStage::Resolved);

        let fetched = self
            .fetcher
            .fetch(identity)
            .await
            .map_err(|e| self.fail(identity, e))?;
        self.transition(identity, PipelineStage::Fetched);

        let media = fetched.media;
        let metadata = FetchMetadata {
            content_type: fetched.content_type,
            last_modified: fetched.last_modified,
            timestamp_source: fetched.timestamp_source,
        };

        let key = FrameKey::from_datetime(metadata.last_modified);
        let stored = self
            .store
            .store(identity.cache_dir(), fetched.body, media, key)
            .await
            .map_err(|e| self.fail(identity, e))?;
        self.transition(identity, PipelineStage::Stored);

        let pattern = FrameSelector::pattern(identity.cache_dir(), media);
        self.transition(identity, PipelineStage::Streaming);

        let mut sink = sink;
        let synthesis = self
            .synthesizer
            .synthesize(&pattern, ctx.rate, media.codec(), &mut sink)
            .await
            .map_err(|e| self.fail(identity, e))?;
        drop(sink);

        let evicted = self.eviction.evict(&pattern, ctx.max_frames).await;
        let (eviction, stage) = self.settle_eviction(identity, evicted);
        self.transition(identity, stage);

        info!(
            source = %identity,
            frame = %stored.frame.path.display(),
            rate = ctx.rate,
            bytes = synthesis.bytes_relayed,
            stage = %stage,
            "Request completed"
        );

        Ok(PipelineOutcome {
            identity: identity.clone(),
            fetched: metadata,
            stored,
            synthesis,
            eviction,
            stage,
        })
    }

    /// 清理失败只记录，不改变请求结果
    fn settle_eviction(
        &self,
        identity: &SourceIdentity,
        evicted: Result<EvictionReport>,
    ) -> (EvictionStatus, PipelineStage) {
        match evicted {
            Ok(report) if !report.removed.is_empty() => {
                (EvictionStatus::Evicted(report), PipelineStage::Evicted)
            }
            Ok(report) => (EvictionStatus::Skipped(report), PipelineStage::EvictionSkipped),
            Err(e) => {
                if self.config.verbose {
                    warn!(source = %identity, error = %e, "Clean up error");
                } else {
                    debug!(source = %identity, error = %e, "Clean up error");
                }
                (EvictionStatus::Failed(e.to_string()), PipelineStage::EvictionSkipped)
            }
        }
    }

    fn transition(&self, identity: &SourceIdentity, stage: PipelineStage) {
        debug!(source = %identity, stage = %stage, "Pipeline stage");
    }

    fn fail(&self, identity: &SourceIdentity, err: ImgvidError) -> ImgvidError {
        let stage = PipelineStage::Failed(err.kind());
        // 客户端断开同样属于预期内的失败
        if err.is_client_error() || err.kind() == ErrorKind::RelayAborted {
            debug!(source = %identity, stage = %stage, error = %err, "Pipeline failed");
        } else {
            warn!(source = %identity, stage = %stage, error = %err, "Pipeline failed");
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::StaticImageSource;
    use crate::media::MediaType;
    use crate::synthesizer::BufferSink;
    use std::path::{Path, PathBuf};
    use tempfile::{tempdir, TempDir};

    const LAST_MODIFIED: &str = "Wed, 21 Oct 2015 07:28:00 GMT";
    const LAST_MODIFIED_SECS: u64 = 1_445_412_480;

    fn test_config(cache_root: &Path, ffmpeg: &str) -> ImgvidConfig {
        let mut config = ImgvidConfig::default();
        config.cache.root_dir = cache_root.to_path_buf();
        config.transcoder.ffmpeg_bin = PathBuf::from(ffmpeg);
        config
    }

    fn jpeg_source() -> StaticImageSource {
        StaticImageSource::new("image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xD9])
            .with_header("last-modified", LAST_MODIFIED)
    }

    fn pipeline(temp_dir: &TempDir, ffmpeg: &str, source: StaticImageSource) -> Pipeline {
        Pipeline::new(test_config(temp_dir.path(), ffmpeg), Arc::new(source))
    }

    fn params(url: &str) -> RequestParams {
        RequestParams::from_pairs([("url", url)])
    }

    fn count_frames(dir: &Path) -> usize {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    #[test]
    fn test_params_first_value_wins() {
        let params = RequestParams::from_pairs(vec![
            ("url", "http://a.test/1.jpg"),
            ("rate", "3"),
            ("url", "http://b.test/2.jpg"),
            ("other", "x"),
        ]);
        assert_eq!(params.url.as_deref(), Some("http://a.test/1.jpg"));
        assert_eq!(params.rate.as_deref(), Some("3"));
        assert_eq!(params.max, None);
    }

    #[test]
    fn test_context_defaults_and_overrides() {
        let config = test_config(Path::new("/tmp/imgvid"), "ffmpeg");

        let ctx = RequestContext::from_params(&params("http://example.test/cam.jpg"), &config).unwrap();
        assert_eq!(ctx.rate, 5);
        assert_eq!(ctx.max_frames, 10);

        let p = RequestParams::from_pairs([
            ("url", "http://example.test/cam.jpg"),
            ("rate", "12"),
            ("max", "3"),
        ]);
        let ctx = RequestContext::from_params(&p, &config).unwrap();
        assert_eq!(ctx.rate, 12);
        assert_eq!(ctx.max_frames, 3);
    }

    #[test]
    fn test_context_parameter_fallback() {
        let config = test_config(Path::new("/tmp/imgvid"), "ffmpeg");
        for (rate, max) in [("0", "abc"), ("-2", "-1"), ("fast", ""), ("", "1.5")] {
            let p = RequestParams::from_pairs([
                ("url", "http://example.test/cam.jpg"),
                ("rate", rate),
                ("max", max),
            ]);
            let ctx = RequestContext::from_params(&p, &config).unwrap();
            assert_eq!(ctx.rate, 5, "rate={:?}", rate);
            assert_eq!(ctx.max_frames, 10, "max={:?}", max);
        }
    }

    #[test]
    fn test_context_missing_and_invalid_url() {
        let config = test_config(Path::new("/tmp/imgvid"), "ffmpeg");

        let err = RequestContext::from_params(&RequestParams::default(), &config).unwrap_err();
        assert!(matches!(err, ImgvidError::MissingParameter(ref p) if p == "url"));

        let err = RequestContext::from_params(&params("not a url"), &config).unwrap_err();
        assert!(matches!(err, ImgvidError::InvalidLocator(_)));
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let temp_dir = tempdir().unwrap();
        let pipeline = pipeline(&temp_dir, "echo", jpeg_source());
        let ctx = pipeline.context(&params("http://example.test/cam.jpg")).unwrap();

        let mut sink = BufferSink::new();
        let outcome = pipeline.run(&ctx, &mut sink).await.unwrap();

        let cache_dir = ctx.identity.cache_dir();
        assert!(cache_dir.starts_with(temp_dir.path()));
        assert_eq!(
            outcome.stored.frame.path,
            cache_dir.join(FrameKey::from_secs(LAST_MODIFIED_SECS).file_name(".jpg"))
        );
        assert_eq!(outcome.stored.frame.media, MediaType::Jpeg);
        assert_eq!(outcome.stored.bytes_written, 4);
        assert_eq!(
            outcome.fetched.timestamp_source,
            TimestampSource::Header("last-modified".to_string())
        );

        // echo 输出的是转码参数
        assert_eq!(sink.content_type.as_deref(), Some("video/mpeg"));
        let output = String::from_utf8_lossy(&sink.data).into_owned();
        assert!(output.contains("-r 5"));
        assert!(output.contains("-codec mjpeg"));
        assert!(output.contains(&format!("{}/*.jpg", cache_dir.display())));

        assert_eq!(outcome.stage, PipelineStage::EvictionSkipped);
        assert!(outcome.stage.is_terminal());
        assert_eq!(count_frames(cache_dir), 1);
    }

    #[tokio::test]
    async fn test_eviction_scenario() {
        let temp_dir = tempdir().unwrap();
        let pipeline = pipeline(&temp_dir, "echo", jpeg_source());
        let p = RequestParams::from_pairs([("url", "http://example.test/cam.jpg"), ("max", "10")]);
        let ctx = pipeline.context(&p).unwrap();

        // 预置 12 帧，最新一帧与本次抓取同秒（覆盖写）
        let cache_dir = ctx.identity.cache_dir().to_path_buf();
        std::fs::create_dir_all(&cache_dir).unwrap();
        let secs: Vec<u64> = (0..12).map(|i| LAST_MODIFIED_SECS - 11 + i).collect();
        for s in secs.iter().rev() {
            std::fs::write(cache_dir.join(FrameKey::from_secs(*s).file_name(".jpg")), b"old").unwrap();
        }

        let mut sink = BufferSink::new();
        let outcome = pipeline.run(&ctx, &mut sink).await.unwrap();

        assert_eq!(outcome.stage, PipelineStage::Evicted);
        match outcome.eviction {
            EvictionStatus::Evicted(ref report) => {
                assert_eq!(report.total, 12);
                let removed: Vec<PathBuf> = secs[..2]
                    .iter()
                    .map(|s| cache_dir.join(FrameKey::from_secs(*s).file_name(".jpg")))
                    .collect();
                assert_eq!(report.removed, removed);
                assert_eq!(report.retained, 10);
            }
            ref other => panic!("unexpected eviction status: {:?}", other),
        }
        assert_eq!(count_frames(&cache_dir), 10);
    }

    #[tokio::test]
    async fn test_eviction_failure_keeps_request_successful() {
        let temp_dir = tempdir().unwrap();
        let pipeline = pipeline(&temp_dir, "echo", jpeg_source());
        let ctx = pipeline.context(&params("http://example.test/cam.jpg")).unwrap();

        let blocked = ctx.identity.cache_dir().join(FrameKey::from_secs(1).file_name(".jpg"));
        let err = ImgvidError::Eviction {
            path: blocked,
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };
        let (status, stage) = pipeline.settle_eviction(&ctx.identity, Err(err));

        match status {
            EvictionStatus::Failed(ref message) => assert!(message.contains("read-only")),
            ref other => panic!("unexpected eviction status: {:?}", other),
        }
        assert_eq!(stage, PipelineStage::EvictionSkipped);
        assert!(stage.is_terminal());

        // 未超出保留数时同样以 EvictionSkipped 结束
        let (status, stage) = pipeline.settle_eviction(&ctx.identity, Ok(EvictionReport::default()));
        assert!(matches!(status, EvictionStatus::Skipped(_)));
        assert_eq!(stage, PipelineStage::EvictionSkipped);
    }

    #[tokio::test]
    async fn test_unsupported_media_creates_nothing() {
        let temp_dir = tempdir().unwrap();
        let source = StaticImageSource::new("text/html", "<html>not an image</html>");
        let pipeline = pipeline(&temp_dir, "echo", source);
        let ctx = pipeline.context(&params("http://example.test/page")).unwrap();

        let mut sink = BufferSink::new();
        let err = pipeline.run(&ctx, &mut sink).await.unwrap_err();

        assert!(matches!(err, ImgvidError::UnsupportedMediaType(_)));
        assert!(!ctx.identity.cache_dir().exists());
        assert!(sink.content_type.is_none());
        assert!(sink.data.is_empty());
    }

    #[tokio::test]
    async fn test_transcoder_failure_skips_eviction() {
        let temp_dir = tempdir().unwrap();
        let pipeline = pipeline(&temp_dir, "false", jpeg_source());
        let p = RequestParams::from_pairs([("url", "http://example.test/cam.jpg"), ("max", "1")]);
        let ctx = pipeline.context(&p).unwrap();

        let cache_dir = ctx.identity.cache_dir().to_path_buf();
        std::fs::create_dir_all(&cache_dir).unwrap();
        for s in 1..=3u64 {
            std::fs::write(cache_dir.join(FrameKey::from_secs(s).file_name(".jpg")), b"old").unwrap();
        }

        let mut sink = BufferSink::new();
        let err = pipeline.run(&ctx, &mut sink).await.unwrap_err();
        assert!(matches!(err, ImgvidError::TranscoderExecution(_)));
        assert_eq!(err.kind(), ErrorKind::TranscoderExecution);

        // 新帧已落盘，但不执行清理
        assert_eq!(count_frames(&cache_dir), 4);
    }

    #[tokio::test]
    async fn test_missing_transcoder_is_launch_error() {
        let temp_dir = tempdir().unwrap();
        let pipeline = pipeline(&temp_dir, "/nonexistent/ffmpeg", jpeg_source());
        let ctx = pipeline.context(&params("http://example.test/cam.jpg")).unwrap();

        let err = pipeline.run(&ctx, BufferSink::new()).await.unwrap_err();
        assert!(matches!(err, ImgvidError::TranscoderLaunch { .. }));
        assert!(!err.is_client_error());
    }
}
