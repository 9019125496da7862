pub mod archive;
pub mod file_service;
pub mod object_store;
pub mod path_validator;
pub mod reconciler;
pub mod scheduler;
pub mod side_effects;
pub mod tree_builder;
pub mod user_repository;
