//! Resolves the caller from the `x-login-name` header set by the
//! authenticating proxy in front of this service.

use crate::{
    errors::AppError,
    models::user::{User, UserRef},
    services::path_validator::validate_login_name,
    state::AppState,
};
use axum::{extract::FromRequestParts, http::request::Parts};

pub const LOGIN_HEADER: &str = "x-login-name";

#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn identity(&self) -> UserRef {
        UserRef {
            id: self.0.id,
            login_name: self.0.login_name.clone(),
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let login = parts
            .headers
            .get(LOGIN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|login| !login.is_empty())
            .ok_or_else(AppError::unauthorized)?;
        validate_login_name(login).map_err(|_| AppError::unauthorized())?;

        let user = state
            .users
            .find_by_login_name(login)
            .await?
            .ok_or_else(AppError::unauthorized)?;
        Ok(CurrentUser(user))
    }
}
