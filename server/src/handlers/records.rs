//! Record writes: normalize, validate, store, then broadcast.
//!
//! Every write holds the state's write lock until its event is queued, so
//! the change feed carries events in the order the repository committed
//! them.

use gridsync_engine::{Fields, Record, RemoteEvent};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::AppState;

/// Read a request body as record fields. The body must be a JSON object.
pub fn fields_from_body(body: Value) -> Result<Fields> {
    match body {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(AppError::BadRequest(format!(
            "expected a JSON object of fields, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// All records of the collection, ordered by id.
pub async fn list_records(state: &AppState) -> Result<Vec<Record>> {
    state.repo.list().await
}

/// Create a record from a full set of fields.
///
/// Undeclared fields (including any `id`) are dropped; the repository assigns
/// the identity.
pub async fn create_record(state: &AppState, fields: Fields) -> Result<Record> {
    let fields = state.schema.normalize_fields(&fields);
    state.schema.check_fields(&fields)?;

    let _writing = state.writes.lock().await;
    let record = state.repo.insert(&fields).await?;
    tracing::info!(id = %record.id, "Record created");

    state.feed.broadcast(&RemoteEvent::Insert {
        new: record.clone(),
    });
    Ok(record)
}

/// Apply a partial update to record `id`.
///
/// An update that changes nothing is accepted without a change feed event.
pub async fn update_record(state: &AppState, id: i64, patch: Fields) -> Result<()> {
    let patch = state.schema.normalize_partial(&patch);

    let _writing = state.writes.lock().await;
    let change = state
        .repo
        .update(id, &patch, &state.schema)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("record {id}")))?;

    if change.is_noop() {
        tracing::debug!(id, "Update changed nothing");
        return Ok(());
    }

    tracing::info!(id, fields = patch.len(), "Record updated");
    state.feed.broadcast(&RemoteEvent::Update {
        old: Some(change.old),
        new: change.new,
    });
    Ok(())
}

/// Delete record `id`. Deleting an absent record succeeds without an event.
pub async fn delete_record(state: &AppState, id: i64) -> Result<()> {
    let _writing = state.writes.lock().await;
    match state.repo.delete(id).await? {
        Some(old) => {
            tracing::info!(id, "Record deleted");
            state.feed.broadcast(&RemoteEvent::Delete { old });
        }
        None => tracing::debug!(id, "Delete of absent record"),
    }
    Ok(())
}
