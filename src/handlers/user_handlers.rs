//! Account-level views over the user's storage.

use crate::{
    errors::AppError, handlers::current_user::CurrentUser, services::archive::archive_home,
    state::AppState,
};
use axum::{
    Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

const SIZE_HISTORY_LIMIT: i64 = 30;

/// `GET /api/user/download-directory` returns the whole home directory as a
/// `.tar.gz` attachment.
pub async fn download_directory(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Response, AppError> {
    let archive = archive_home(state.store().as_ref(), &user.0.login_name)
        .await?
        .ok_or_else(|| AppError::not_found("There are no files to download."))?;

    let disposition = format!("attachment; filename=\"{}\"", archive.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        archive.body,
    )
        .into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeReport {
    success: bool,
    size_bytes: Option<i64>,
    updated_at: Option<DateTime<Utc>>,
    history: Vec<SizePoint>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizePoint {
    size_bytes: i64,
    recorded_at: DateTime<Utc>,
}

/// `GET /api/user/home-directory-size`
///
/// Last reconciled total plus recent snapshots, newest first. The numbers lag
/// behind edits until the next reconciliation run.
pub async fn home_directory_size(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<SizeReport>, AppError> {
    let history = state
        .users
        .size_history(user.id, SIZE_HISTORY_LIMIT)
        .await?
        .into_iter()
        .map(|row| SizePoint {
            size_bytes: row.size_bytes,
            recorded_at: row.recorded_at,
        })
        .collect();

    Ok(Json(SizeReport {
        success: true,
        size_bytes: user.home_directory_size_bytes,
        updated_at: user.home_directory_size_bytes_updated_at,
        history,
    }))
}
