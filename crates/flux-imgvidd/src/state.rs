use flux_imgvid::{ImgvidConfig, Pipeline};
use std::sync::Arc;

/// API 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 帧缓存与合成管线
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn config(&self) -> &ImgvidConfig {
        self.pipeline.config()
    }
}
