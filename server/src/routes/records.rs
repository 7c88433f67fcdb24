//! Records endpoints.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::Response,
    routing::{get, patch},
    Json, Router,
};
use gridsync_engine::Record;
use serde_json::Value;

use crate::error::Result;
use crate::handlers::{
    create_record, delete_record, fields_from_body, handle_changes_connection, list_records,
    update_record,
};
use crate::AppState;

/// Create records routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/records", get(list_handler).post(create_handler))
        .route("/records/changes", get(changes_handler))
        .route(
            "/records/{id}",
            patch(update_handler).delete(delete_handler),
        )
}

/// GET /records - All records ordered by id.
async fn list_handler(State(state): State<AppState>) -> Result<Json<Vec<Record>>> {
    Ok(Json(list_records(&state).await?))
}

/// POST /records - Create a record.
async fn create_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Record>)> {
    let record = create_record(&state, fields_from_body(body)?).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// PATCH /records/{id} - Update some fields of a record.
async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<StatusCode> {
    update_record(&state, id, fields_from_body(body)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /records/{id} - Delete a record.
async fn delete_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    delete_record(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /records/changes - Subscribe to the change feed.
async fn changes_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    // Register before answering the handshake so a write that lands between
    // the handshake and the socket task is still delivered. If the upgrade
    // never happens the closure is dropped and so is the registration.
    let (registration, events) = state.feed.subscribe();

    ws.on_upgrade(move |socket| handle_changes_connection(socket, registration, events))
}
