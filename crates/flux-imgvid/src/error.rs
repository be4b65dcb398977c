use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImgvidError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Unsupported mimetype: {0}")]
    UnsupportedMediaType(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Upstream responded with status {0}")]
    UpstreamStatus(u16),

    #[error("Storage write error at {path:?}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to launch transcoder {binary}: {source}")]
    TranscoderLaunch {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("Transcoder failed: {0}")]
    TranscoderExecution(String),

    #[error("Stream relay aborted: {0}")]
    RelayAborted(#[source] io::Error),

    #[error("Eviction error at {path:?}: {source}")]
    Eviction {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// 错误类别（用于管线状态机与日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingParameter,
    InvalidLocator,
    UnsupportedMediaType,
    Fetch,
    StorageWrite,
    TranscoderLaunch,
    TranscoderExecution,
    RelayAborted,
    Eviction,
    InvalidConfig,
    Io,
}

impl ImgvidError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingParameter(_) => ErrorKind::MissingParameter,
            Self::InvalidLocator(_) => ErrorKind::InvalidLocator,
            Self::UnsupportedMediaType(_) => ErrorKind::UnsupportedMediaType,
            Self::Fetch(_) | Self::UpstreamStatus(_) => ErrorKind::Fetch,
            Self::StorageWrite { .. } => ErrorKind::StorageWrite,
            Self::TranscoderLaunch { .. } => ErrorKind::TranscoderLaunch,
            Self::TranscoderExecution(_) => ErrorKind::TranscoderExecution,
            Self::RelayAborted(_) => ErrorKind::RelayAborted,
            Self::Eviction { .. } => ErrorKind::Eviction,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// 调用方可自行修正的错误（请求参数或源资源不可用）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MissingParameter | ErrorKind::InvalidLocator | ErrorKind::UnsupportedMediaType
        )
    }
}

impl From<reqwest::Error> for ImgvidError {
    fn from(err: reqwest::Error) -> Self {
        ImgvidError::Fetch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImgvidError>;
