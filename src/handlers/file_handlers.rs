//! HTTP handlers for the file manager. Each one resolves the caller, decodes
//! the request and delegates to `FileService`.

use crate::{
    errors::AppError,
    file_types::content_type_for,
    handlers::current_user::CurrentUser,
    models::upload::UploadFile,
    services::{
        file_service::{DirectoryOutcome, MoveOutcome},
        path_validator::basename,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};

fn done(message: &str) -> Json<Value> {
    Json(json!({ "success": true, "message": message }))
}

/// `GET /api/files/tree`
pub async fn get_tree(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let files = state.files.tree(&user.identity()).await?;
    Ok(Json(json!({ "success": true, "files": files })))
}

#[derive(Debug, Deserialize)]
pub struct ContentQuery {
    pub path: String,
}

/// `GET /api/files/content?path=...` returns the raw file body.
pub async fn get_content(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ContentQuery>,
) -> Result<Response, AppError> {
    let body = state.files.read_file(&user.identity(), &query.path).await?;
    let content_type = content_type_for(basename(&query.path));
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SaveFileReq {
    pub filename: String,
    pub contents: String,
}

/// `POST /api/files/save`
pub async fn save_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<SaveFileReq>,
) -> Result<Json<Value>, AppError> {
    state
        .files
        .save_file(&user.identity(), &req.filename, Bytes::from(req.contents))
        .await?;
    Ok(done("File saved."))
}

#[derive(Debug, Deserialize)]
pub struct CreateDirectoryReq {
    pub directory: String,
}

/// `POST /api/files/create-directory`
pub async fn create_directory(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateDirectoryReq>,
) -> Result<Json<Value>, AppError> {
    let outcome = state
        .files
        .create_directory(&user.identity(), &req.directory)
        .await?;
    Ok(done(match outcome {
        DirectoryOutcome::Created => "Directory created.",
        DirectoryOutcome::AlreadyExisted => "Directory already exists.",
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateFileReq {
    #[serde(default)]
    pub directory: String,
    pub filename: String,
}

/// `POST /api/files/create-file`
pub async fn create_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateFileReq>,
) -> Result<Json<Value>, AppError> {
    let path = state
        .files
        .create_file(&user.identity(), &req.directory, &req.filename)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "File created.",
        "path": path,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteReq {
    pub filename: String,
}

/// `POST /api/files/delete`
pub async fn delete_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<DeleteReq>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.files.delete(&user.identity(), &req.filename).await?;
    Ok(Json(json!({
        "success": true,
        "message": "File deleted.",
        "deleted": deleted,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameReq {
    pub old_filename: String,
    pub new_filename: String,
}

/// `POST /api/files/rename`
pub async fn rename_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<RenameReq>,
) -> Result<Json<Value>, AppError> {
    let new_path = state
        .files
        .rename(&user.identity(), &req.old_filename, &req.new_filename)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "File renamed.",
        "newPath": new_path,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveReq {
    pub source_path: String,
    #[serde(default)]
    pub target_directory: String,
}

/// `POST /api/files/move`
pub async fn move_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<MoveReq>,
) -> Result<Json<Value>, AppError> {
    let outcome = state
        .files
        .move_file(&user.identity(), &req.source_path, &req.target_directory)
        .await?;
    Ok(match outcome {
        MoveOutcome::Unchanged => done("The file is already in that folder."),
        MoveOutcome::Moved { new_path } => Json(json!({
            "success": true,
            "message": "File moved.",
            "newPath": new_path,
        })),
    })
}

/// `POST /api/files/upload`
///
/// Multipart form with one `directory` text field and any number of `file`
/// parts.
pub async fn upload_files(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut directory = String::new();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid upload: {}", err)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("directory") => {
                directory = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid upload: {}", err)))?;
            }
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("uploaded file has no name"))?;
                let body = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid upload: {}", err)))?;
                files.push(UploadFile::new(file_name, body));
            }
            _ => {}
        }
    }

    let uploaded = state
        .files
        .upload_files(&user.identity(), &directory, files)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Upload complete.",
        "uploaded": uploaded,
    })))
}
