use std::sync::Arc;
use std::time::Instant;
use warp::Filter;

use super::websocket;
use crate::proctoring::ProctoringServer;

pub const SERVICE_NAME: &str = "Proctoring Hub";

/// Every HTTP and WebSocket route the hub serves.
pub fn routes(
    server: Arc<ProctoringServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    proctoring_websocket_route(server.clone())
        .or(health_check())
        .or(config_endpoint(server))
        .with(warp::trace::request())
}

pub fn proctoring_websocket_route(
    server: Arc<ProctoringServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("proctoring")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_server(server))
        .map(|ws: warp::ws::Ws, server: Arc<ProctoringServer>| {
            ws.on_upgrade(move |socket| websocket::handle_proctoring_websocket(socket, server))
        })
}

pub fn health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let started = Instant::now();

    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": SERVICE_NAME,
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now(),
                "uptimeSecs": started.elapsed().as_secs(),
            }))
        })
}

/// Current sampling knobs and pool counts.
pub fn config_endpoint(
    server: Arc<ProctoringServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("proctoring")
        .and(warp::path("config"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_server(server))
        .then(|server: Arc<ProctoringServer>| async move {
            warp::reply::json(&server.snapshot().await)
        })
}

fn with_server(
    server: Arc<ProctoringServer>,
) -> impl Filter<Extract = (Arc<ProctoringServer>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || server.clone())
}
