pub mod current_user;
pub mod file_handlers;
pub mod health_handlers;
pub mod user_handlers;
