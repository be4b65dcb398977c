use crate::{handlers, state::AppState};
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

/// 创建 API 路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::synthesize))
        .route("/_health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 健康检查
async fn health_check() -> &'static str {
    "ok"
}
