use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LendingError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    OperationNotPermitted(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("missing or unknown session token")]
    Unauthenticated,
    #[error("database operation failed")]
    Storage(#[source] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LendingError {
    pub fn book_not_found(book_id: i64) -> Self {
        Self::NotFound(format!("No book found with the ID:{book_id}"))
    }

    pub fn not_permitted(reason: &str) -> Self {
        Self::OperationNotPermitted(reason.to_string())
    }
}

impl ResponseError for LendingError {
    fn status_code(&self) -> StatusCode {
        match self {
            LendingError::NotFound(_) => StatusCode::NOT_FOUND,
            LendingError::OperationNotPermitted(_) => StatusCode::BAD_REQUEST,
            LendingError::Forbidden(_) => StatusCode::FORBIDDEN,
            LendingError::Unauthenticated => StatusCode::UNAUTHORIZED,
            LendingError::Storage(_) | LendingError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        if status_code == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(
                error.cause_chain = ?self,
                error.message = %self,
                "Unexpected error happened"
            );
            return HttpResponse::build(status_code).finish();
        }
        HttpResponse::build(status_code).body(self.to_string())
    }
}

pub type LendingResult<T> = Result<T, LendingError>;
