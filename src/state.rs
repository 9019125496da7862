use crate::services::{
    file_service::FileService, object_store::ObjectStore, user_repository::UserRepository,
};
use std::sync::Arc;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub files: FileService,
    pub users: UserRepository,
}

impl AppState {
    pub fn new(files: FileService, users: UserRepository) -> Self {
        Self { files, users }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        self.files.store()
    }
}
