use crate::config::FetchConfig;
use crate::error::{ImgvidError, Result};
use crate::identity::SourceIdentity;
use crate::media::{compatible_media_type, MediaType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::io;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// 响应体字节流
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// 源站响应（状态码、响应头、未读取的响应体）
pub struct SourceResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

impl SourceResponse {
    /// 按名称（忽略大小写）取第一个响应头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 图像源接口（HTTP 抓取协作方）
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn get(&self, url: &Url) -> Result<SourceResponse>;
}

/// 基于 reqwest 的图像源
#[derive(Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn get(&self, url: &Url) -> Result<SourceResponse> {
        let resp = self.client.get(url.as_str()).send().await?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)))
            .boxed();

        Ok(SourceResponse {
            status,
            headers,
            body,
        })
    }
}

/// 固定响应的图像源（用于测试和占位）
#[derive(Debug, Clone)]
pub struct StaticImageSource {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl StaticImageSource {
    pub fn new(content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn get(&self, _url: &Url) -> Result<SourceResponse> {
        let chunk: io::Result<Bytes> = Ok(self.body.clone());
        Ok(SourceResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: stream::iter(vec![chunk]).boxed(),
        })
    }
}

/// 帧时间戳来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampSource {
    /// 来自指定响应头
    Header(String),
    /// 所有时间头都无法解析，使用抓取时刻
    Clock,
}

/// 抓取到的一帧（响应体尚未消费）
pub struct FetchedFrame {
    pub media: MediaType,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub timestamp_source: TimestampSource,
    pub body: ByteStream,
}

/// 帧抓取器：调用图像源、校验媒体类型、解析时间戳
pub struct FrameFetcher {
    source: Arc<dyn ImageSource>,
    compatible_mime_types: Vec<String>,
    date_headers: Vec<String>,
}

impl FrameFetcher {
    pub fn new(source: Arc<dyn ImageSource>, config: &FetchConfig) -> Self {
        Self {
            source,
            compatible_mime_types: config.compatible_mime_types.clone(),
            date_headers: config.date_headers.clone(),
        }
    }

    pub async fn fetch(&self, identity: &SourceIdentity) -> Result<FetchedFrame> {
        let resp = self.source.get(identity.locator()).await?;

        if !resp.is_success() {
            return Err(ImgvidError::UpstreamStatus(resp.status));
        }

        // 类型不兼容时直接丢弃响应，不读取响应体
        let content_type = resp.content_type().to_string();
        let media = compatible_media_type(&content_type, &self.compatible_mime_types)
            .ok_or_else(|| ImgvidError::UnsupportedMediaType(content_type.clone()))?;

        let (last_modified, timestamp_source) = self.last_modified(&resp);
        debug!(
            source = %identity,
            content_type = %content_type,
            last_modified = %last_modified,
            timestamp_source = ?timestamp_source,
            "Fetched frame"
        );

        Ok(FetchedFrame {
            media,
            content_type,
            last_modified,
            timestamp_source,
            body: resp.body,
        })
    }

    /// 按优先级解析时间头，全部失败时退回当前时间
    fn last_modified(&self, resp: &SourceResponse) -> (DateTime<Utc>, TimestampSource) {
        for name in &self.date_headers {
            if let Some(ts) = resp.header(name).and_then(parse_http_date) {
                return (ts, TimestampSource::Header(name.clone()));
            }
        }
        (Utc::now(), TimestampSource::Clock)
    }
}

/// 解析 HTTP-date（RFC 1123 / RFC 850 / asctime）
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}
