//! Liveness of the gateway's backends.
//!
//! - GET /ping -> `{"message": "Ok"}` when the database answers, a small
//!   write has a bucket, and the object store root is reachable; 503 otherwise.

use crate::{errors::AppError, services::object_store::ObjectStore, state::AppState};
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

#[derive(Serialize)]
pub struct PingResponse {
    message: &'static str,
}

/// `GET /ping`
pub async fn ping(State(state): State<AppState>) -> Result<Json<PingResponse>, AppError> {
    let unavailable = |msg: String| AppError::new(StatusCode::SERVICE_UNAVAILABLE, "ping", msg);

    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => {}
        Ok(v) => return Err(unavailable(format!("database: unexpected result {}", v))),
        Err(e) => return Err(unavailable(format!("database: {}", e))),
    }

    state
        .selector
        .select_for_write(1)
        .map_err(|e| unavailable(format!("buckets: {}", e)))?;

    state
        .store
        .ping()
        .await
        .map_err(|e| unavailable(format!("object store: {}", e)))?;

    Ok(Json(PingResponse { message: "Ok" }))
}
