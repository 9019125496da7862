//! Rows of the relational side: users and their derived storage aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The parts of a `users` row the file manager cares about.
///
/// `home_directory_size_bytes` and `site_updated_at` lag behind the object
/// store until the reconciler or an edit updates them.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    pub id: i64,

    /// Doubles as the home prefix of every object the user owns.
    pub login_name: String,

    pub site_updated_at: Option<DateTime<Utc>>,

    pub home_directory_size_bytes: Option<i64>,

    pub home_directory_size_bytes_updated_at: Option<DateTime<Utc>>,
}

/// Minimal identity used by batch jobs.
#[derive(Clone, FromRow, Debug)]
pub struct UserRef {
    pub id: i64,
    pub login_name: String,
}

/// Immutable snapshot appended on every size recomputation.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct SizeHistoryRow {
    pub user_id: i64,
    pub size_bytes: i64,
    pub recorded_at: DateTime<Utc>,
}
