use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use flux_imgvid::{ErrorKind, ImgvidError};
use thiserror::Error;

/// API 错误类型（纯文本响应体）
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

impl From<ImgvidError> for ApiError {
    fn from(err: ImgvidError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::MissingParameter
            | ErrorKind::InvalidLocator
            | ErrorKind::UnsupportedMediaType => ApiError::BadRequest(message),
            ErrorKind::Fetch => ApiError::BadGateway(message),
            _ => ApiError::Internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
