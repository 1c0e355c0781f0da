pub mod admissions;
pub mod config;
pub mod db;
pub mod meetings;
pub mod motions;
pub mod nations;
pub mod notify;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

use axum::{
    Json, Router,
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::SqlitePool;

pub use config::Config;
pub use notify::Notifier;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub notifier: Notifier,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/meetings", meetings::router())
        .nest("/nations", nations::router())
        .nest("/motions", motions::router())
        .nest("/admissions", admissions::router())
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not logged in")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            Unauthenticated => StatusCode::UNAUTHORIZED,
            Forbidden(_) => StatusCode::FORBIDDEN,
            InvalidState(_) => StatusCode::BAD_REQUEST,
            NotFound(_) => StatusCode::NOT_FOUND,
            Storage(_) | Migrate(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
            "internal error".to_owned()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
