//! Per-user static site storage on top of an S3-compatible object store.
//!
//! Every user owns the key prefix `{login_name}/`. Directories are implicit:
//! they exist because keys below them exist, or because an `index.html`
//! placeholder was written to make an empty one visible.

pub mod config;
pub mod db;
pub mod errors;
pub mod file_types;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
