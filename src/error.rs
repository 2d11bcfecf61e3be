use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("group \"{0}\" not found")]
    GroupNotFound(String),
    #[error("settlement \"{0}\" not found")]
    SettlementNotFound(String),
    #[error("only the payer can confirm this settlement")]
    Forbidden,
    #[error("missing acting user")]
    Unauthorized,
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Database(#[from] mongodb::error::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid seed file: {0}")]
    Seed(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::GroupNotFound(_) | Error::SettlementNotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Config(_) | Error::Database(_) | Error::Io(_) | Error::Seed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            Error::Config(_) | Error::Database(_) | Error::Io(_) | Error::Seed(_) => {
                tracing::error!("request failed: {}", self);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody { error })
    }
}
