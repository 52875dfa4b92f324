use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::drawing::Canvas;
use crate::error::StoreError;
use crate::model::{NewRoom, Room, RoomId};
use crate::store::RoomStore;
use crate::websocket;
use crate::AppState;

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn status_for(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        StoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        StoreError::NetworkTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn reject(err: StoreError) -> (StatusCode, String) {
    (status_for(&err), err.to_string())
}

fn parse_room_id(raw: &str) -> ApiResult<RoomId> {
    RoomId::parse(raw).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

/// Build the HTTP + WebSocket router for a room host
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket::handler::ws_handler))
        .route("/rooms", post(create_room))
        .route("/rooms/:id", get(get_room))
        .route("/rooms/:id/drawing.png", get(get_drawing))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn create_room(
    State(state): State<AppState>,
    Json(request): Json<NewRoom>,
) -> ApiResult<(StatusCode, Json<Room>)> {
    let room = state.store.create_room(request).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn get_room(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Room>> {
    let room_id = parse_room_id(&id)?;
    let room = state.store.read(&room_id).await.map_err(reject)?;
    Ok(Json(room))
}

/// The room's ink rendered on a transparent canvas
async fn get_drawing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let room_id = parse_room_id(&id)?;
    let room = state.store.read(&room_id).await.map_err(reject)?;

    let render = || -> Result<Vec<u8>, crate::error::SyncError> {
        let mut canvas = Canvas::new(state.config.canvas_width, state.config.canvas_height)?;
        canvas.replay(&room.strokes);
        canvas.to_png()
    };
    let png = render().map_err(|e| {
        tracing::warn!("Rendering room {} failed: {}", room_id, e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}
