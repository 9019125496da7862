//! Data models for the file manager.
//!
//! `FileNode` trees are derived from object listings on demand; `User` and
//! `SizeHistoryRow` map to SQLite rows via `sqlx::FromRow` and serialize as
//! JSON via `serde`.

pub mod file_node;
pub mod upload;
pub mod user;
