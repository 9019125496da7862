//! Route definitions for the file manager API.
//!
//! All `/api` routes require the `x-login-name` header:
//!   - `GET  /api/files/tree`               : directory tree of the home prefix
//!   - `GET  /api/files/content?path=`      : raw body of an editable file
//!   - `POST /api/files/save`               : create or overwrite an editable file
//!   - `POST /api/files/create-directory`   : create a directory placeholder
//!   - `POST /api/files/create-file`        : create an empty file
//!   - `POST /api/files/delete`             : delete a file or directory
//!   - `POST /api/files/rename`             : rename within the same directory
//!   - `POST /api/files/move`               : move into another directory
//!   - `POST /api/files/upload`             : multipart batch upload
//!   - `GET  /api/user/download-directory`  : home directory as `.tar.gz`
//!   - `GET  /api/user/home-directory-size` : size aggregate and history

use crate::{
    handlers::{
        file_handlers::{
            create_directory, create_file, delete_file, get_content, get_tree, move_file,
            rename_file, save_file, upload_files,
        },
        health_handlers::{healthz, readyz},
        user_handlers::{download_directory, home_directory_size},
    },
    services::file_service::MAX_UPLOAD_BYTES,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Request body ceiling for JSON endpoints; an editor save carries the whole file.
const JSON_BODY_LIMIT: usize = MAX_UPLOAD_BYTES as usize;

/// A batch upload may carry several files of up to 10 MiB each.
const UPLOAD_BODY_LIMIT: usize = 5 * MAX_UPLOAD_BYTES as usize;

/// Build the router. Handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // file manager
        .route("/api/files/tree", get(get_tree))
        .route("/api/files/content", get(get_content))
        .route("/api/files/save", post(save_file))
        .route("/api/files/create-directory", post(create_directory))
        .route("/api/files/create-file", post(create_file))
        .route("/api/files/delete", post(delete_file))
        .route("/api/files/rename", post(rename_file))
        .route("/api/files/move", post(move_file))
        .route(
            "/api/files/upload",
            post(upload_files).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        // account
        .route("/api/user/download-directory", get(download_directory))
        .route("/api/user/home-directory-size", get(home_directory_size))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
}
