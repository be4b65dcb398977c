use crate::error::{ApiError, Result};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::Response,
};
use bytes::Bytes;
use flux_imgvid::{ChannelSink, ImgvidError, PipelineOutcome, RequestParams, SinkEvent};
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, error, info};

/// 输出端与响应体之间的缓冲（以块计）
const SINK_BUFFER: usize = 16;

/// 抓取一帧、入缓存并把该源的全部缓存帧合成为视频流返回
///
/// 在第一个视频块到达（或管线结束）之前不发送响应头，
/// 因此合成前的任何失败都能以错误状态码返回。
pub async fn synthesize(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info!(target: "http", method = %method, uri = %uri, user_agent, "Request");

    let params = RequestParams::from_pairs(pairs);
    let ctx = state.pipeline.context(&params).map_err(log_failure)?;

    let (sink, mut rx) = ChannelSink::channel(SINK_BUFFER);
    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(async move { pipeline.run(&ctx, sink).await });

    let mut content_type = state.config().transcoder.content_type.clone();
    let first_chunk = loop {
        match rx.recv().await {
            Some(SinkEvent::ContentType(ct)) => content_type = ct,
            Some(SinkEvent::Chunk(chunk)) => break Some(chunk),
            None => break None,
        }
    };

    let body = match first_chunk {
        Some(chunk) => {
            // 管线在后台继续转发，结束后执行清理
            Body::from_stream(chunk_stream(chunk, rx))
        }
        None => {
            finish(task).await?;
            Body::empty()
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn chunk_stream(
    first: Bytes,
    rx: mpsc::Receiver<SinkEvent>,
) -> impl tokio_stream::Stream<Item = io::Result<Bytes>> {
    tokio_stream::once(first)
        .chain(ReceiverStream::new(rx).filter_map(|event| match event {
            SinkEvent::Chunk(chunk) => Some(chunk),
            SinkEvent::ContentType(_) => None,
        }))
        .map(Ok::<Bytes, io::Error>)
}

/// 等待未产生任何视频数据的管线结束
async fn finish(task: JoinHandle<flux_imgvid::Result<PipelineOutcome>>) -> Result<()> {
    match task.await {
        Ok(Ok(outcome)) => {
            debug!(target: "http", source = %outcome.identity, "Transcoder produced no output");
            Ok(())
        }
        Ok(Err(err)) => Err(log_failure(err)),
        Err(join_err) => {
            error!(target: "http", error = %join_err, "Pipeline task aborted");
            Err(ApiError::Internal(join_err.to_string()))
        }
    }
}

fn log_failure(err: ImgvidError) -> ApiError {
    let api_err = ApiError::from(err);
    if api_err.status().is_server_error() {
        error!(target: "http", status = %api_err.status(), error = %api_err, "Request failed");
    } else {
        info!(target: "http", status = %api_err.status(), error = %api_err, "Request rejected");
    }
    api_err
}
