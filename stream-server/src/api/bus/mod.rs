//! Event bus 运维 API
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/bus/dead-letters | GET | 列出死信 |
//! | /api/bus/dead-letters/{id} | DELETE | 删除死信 |

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get},
};
use serde::Serialize;

use crate::bus::DeadLetterEntry;
use crate::core::ServerState;
use crate::storage::blocking;
use crate::utils::{AppError, AppResult};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/bus/dead-letters", get(list_dead_letters))
        .route("/api/bus/dead-letters/{id}", delete(remove_dead_letter))
}

#[derive(Debug, Serialize)]
pub struct DeadLetterItem {
    pub id: u64,
    #[serde(flatten)]
    pub entry: DeadLetterEntry,
}

/// GET /api/bus/dead-letters
async fn list_dead_letters(
    State(state): State<ServerState>,
) -> AppResult<Json<Vec<DeadLetterItem>>> {
    let topic = state.bus.topic().clone();
    let entries = blocking(move || topic.dead_letters()).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|(id, entry)| DeadLetterItem { id, entry })
            .collect(),
    ))
}

/// DELETE /api/bus/dead-letters/{id}
async fn remove_dead_letter(
    State(state): State<ServerState>,
    Path(id): Path<u64>,
) -> AppResult<Json<bool>> {
    let topic = state.bus.topic().clone();
    if !blocking(move || topic.remove_dead_letter(id)).await? {
        return Err(AppError::not_found(format!("Dead letter {} not found", id)));
    }
    tracing::info!(id, "Dead letter removed");
    Ok(Json(true))
}
