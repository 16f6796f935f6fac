// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::event::Notification;
use crate::feed::CatalogHandle;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) catalog: CatalogHandle,
    pub(crate) notify_tx: broadcast::Sender<Notification>,
    pub(crate) ws_connections: Arc<AtomicUsize>,
}

pub fn app(
    catalog: CatalogHandle,
    notify_tx: broadcast::Sender<Notification>,
    ws_connections: Arc<AtomicUsize>,
) -> Router {
    let state = AppState {
        catalog,
        notify_tx,
        ws_connections,
    };
    Router::new()
        .route("/", get(|| async { "admin-tally: resource tally service" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/events", post(http::post_event)) // POST /api/events
        .route(
            "/api/resources",
            get(http::list_resources).post(http::register_resource),
        ) // GET, POST /api/resources
        .route(
            "/api/resources/{kind}",
            get(http::get_collection).delete(http::delete_collection),
        ) // GET, DELETE /api/resources/{kind}
        .route(
            "/api/resources/{kind}/{id}",
            get(http::get_named).delete(http::delete_named),
        ) // GET, DELETE /api/resources/{kind}/{id}
        .route("/ws/notifications", get(ws::ws_notifications)) // WS /ws/notifications
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
