use std::sync::Arc;
use warp::Filter;

use crate::relay::SessionGateway;
use super::session_websocket;

/// All relay routes: WebSocket upgrade, health and presence status
pub fn routes(
    gateway: Arc<SessionGateway>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    session_websocket_route(gateway.clone())
        .or(session_health_check(gateway.clone()))
        .or(session_participants(gateway))
}

/// Creates the session WebSocket route
pub fn session_websocket_route(
    gateway: Arc<SessionGateway>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("session")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_gateway(gateway))
        .map(|ws: warp::ws::Ws, gateway: Arc<SessionGateway>| {
            ws.on_upgrade(move |websocket| {
                session_websocket::handle_session_websocket(websocket, gateway)
            })
        })
}

pub fn session_health_check(
    gateway: Arc<SessionGateway>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("session" / "health")
        .and(warp::get())
        .and(with_gateway(gateway))
        .and_then(|gateway: Arc<SessionGateway>| async move {
            let body = serde_json::json!({
                "status": "healthy",
                "service": "Session Relay",
                "version": env!("CARGO_PKG_VERSION"),
                "rooms": gateway.room_count().await,
                "connections": gateway.connection_count().await,
            });
            Ok::<_, warp::Rejection>(warp::reply::json(&body))
        })
}

/// Read-only presence lookup; never mutates the registry
pub fn session_participants(
    gateway: Arc<SessionGateway>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("session" / String / "participants")
        .and(warp::get())
        .and(with_gateway(gateway))
        .and_then(|session_id: String, gateway: Arc<SessionGateway>| async move {
            let participants = gateway.list_participants(&session_id).await;
            let body = serde_json::json!({
                "sessionId": session_id,
                "participants": participants,
            });
            Ok::<_, warp::Rejection>(warp::reply::json(&body))
        })
}

fn with_gateway(
    gateway: Arc<SessionGateway>,
) -> impl Filter<Extract = (Arc<SessionGateway>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || gateway.clone())
}
