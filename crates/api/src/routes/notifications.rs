//! Notification inbox endpoints for the calling actor.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::NotificationId;
use hub::NotificationEntry;
use ledger::NotificationStore;

use super::parse_id;
use crate::error::ApiError;
use crate::extract::RequestActor;
use crate::{AppState, AppStore};

/// Size of the unread list, shared with the websocket snapshot.
pub const UNREAD_LIMIT: usize = 10;

/// GET /notifications: the caller's unread notifications, newest first.
#[tracing::instrument(skip(state))]
pub async fn unread<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    RequestActor(actor): RequestActor,
) -> Result<Json<Vec<NotificationEntry>>, ApiError> {
    let unread = state
        .store()
        .unread_notifications(actor.id, UNREAD_LIMIT)
        .await?;
    Ok(Json(unread.iter().map(NotificationEntry::from).collect()))
}

/// POST /notifications/:id/read: mark one of the caller's notifications read.
#[tracing::instrument(skip(state))]
pub async fn mark_read<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let notification_id: NotificationId = parse_id(&id)?;
    if state
        .store()
        .mark_notification_read(notification_id, actor.id)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Notification {id} not found")))
    }
}
