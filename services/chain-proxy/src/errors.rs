use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sync(#[from] sync_core::Error),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("user {0} has been authenticated")]
    AlreadyAuthorized(String),

    #[error("Wallet history is empty for address {0}")]
    EmptyWalletHistory(String),
}

impl ResponseError for ProxyError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Http(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Gateway(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::AlreadyAuthorized(_) => StatusCode::CONFLICT,
            ProxyError::EmptyWalletHistory(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl ProxyError {
    fn error_type(&self) -> &str {
        match self {
            ProxyError::Database(_) => "database_error",
            ProxyError::Migration(_) => "database_error",
            ProxyError::Http(_) => "upstream_error",
            ProxyError::Sync(_) => "sync_error",
            ProxyError::Gateway(_) => "upstream_error",
            ProxyError::Validation(_) => "validation_error",
            ProxyError::AlreadyAuthorized(_) => "duplicate_error",
            ProxyError::EmptyWalletHistory(_) => "upstream_error",
        }
    }
}
