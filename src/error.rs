use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;

use crate::repo::RepoError;
use crate::storage::MediaError;
use crate::word_filter::FilterError;

/// A submission refused by board policy rather than by its shape.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyRejection {
    #[error("the board is in read-only mode")]
    ReadOnly,
    #[error("this thread is locked")]
    Locked,
    #[error("wait {remaining_secs} more seconds before posting again")]
    Cooldown { remaining_secs: i64 },
    #[error("your post contains a blocked word: \"{0}\"")]
    BlockedWord(String),
}

#[derive(thiserror::Error, Debug)]
pub enum BoardError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Policy(#[from] PolicyRejection),
    /// Deliberately uninformative: wrong password, no password and unknown
    /// post all look the same to the caller.
    #[error("not authorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("storage failure: {0}")]
    Storage(String),
    /// A new upload refused by the media store; keeps its own HTTP status.
    #[error(transparent)]
    Upload(MediaError),
}

impl From<RepoError> for BoardError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => BoardError::NotFound,
            RepoError::Locked => BoardError::Policy(PolicyRejection::Locked),
            RepoError::Conflict => BoardError::Validation("upload is already attached to a post".into()),
            RepoError::Internal(msg) => BoardError::Storage(msg),
        }
    }
}

impl From<MediaError> for BoardError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Other(msg) => BoardError::Storage(msg),
            MediaError::NotFound => BoardError::Validation("unknown upload".into()),
            other => BoardError::Validation(other.to_string()),
        }
    }
}

impl From<FilterError> for BoardError {
    fn from(e: FilterError) -> Self {
        match e {
            FilterError::NotFound => BoardError::NotFound,
            FilterError::Io(msg) => BoardError::Storage(msg),
            other => BoardError::Validation(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")] BadRequest(String),
    #[error("{0}")] Forbidden(String),
    #[error("{0}")] TooManyRequests(String),
    #[error("not found")] NotFound,
    #[error("{0}")] PayloadTooLarge(String),
    #[error("{0}")] UnsupportedMediaType(String),
    #[error("internal error")] Internal,
}

impl From<BoardError> for ApiError {
    fn from(e: BoardError) -> Self {
        match e {
            BoardError::Validation(msg) => ApiError::BadRequest(msg),
            BoardError::Policy(p @ PolicyRejection::Cooldown { .. }) => ApiError::TooManyRequests(p.to_string()),
            BoardError::Policy(p) => ApiError::Forbidden(p.to_string()),
            BoardError::Unauthorized => ApiError::Forbidden("not authorized".into()),
            BoardError::NotFound => ApiError::NotFound,
            BoardError::Storage(msg) => {
                tracing::error!(error = %msg, "storage failure");
                ApiError::Internal
            }
            BoardError::Upload(e) => e.into(),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        BoardError::from(e).into()
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::TooLarge { .. } => ApiError::PayloadTooLarge(e.to_string()),
            MediaError::Unsupported => ApiError::UnsupportedMediaType(e.to_string()),
            MediaError::Empty => ApiError::BadRequest(e.to_string()),
            MediaError::NotFound => ApiError::NotFound,
            MediaError::Other(msg) => {
                tracing::error!(error = %msg, "media store failure");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_maps_to_429_and_policy_to_403() {
        let e: ApiError = BoardError::Policy(PolicyRejection::Cooldown { remaining_secs: 3 }).into();
        assert_eq!(e.error_response().status().as_u16(), 429);
        assert_eq!(e.to_string(), "wait 3 more seconds before posting again");

        let e: ApiError = BoardError::Policy(PolicyRejection::BlockedWord("spam".into())).into();
        assert_eq!(e.error_response().status().as_u16(), 403);

        let e: ApiError = BoardError::Unauthorized.into();
        assert_eq!(e.to_string(), "not authorized");
        assert_eq!(e.error_response().status().as_u16(), 403);
    }

    #[test]
    fn upload_errors_keep_their_status() {
        let e: ApiError = BoardError::Upload(MediaError::Unsupported).into();
        assert_eq!(e.error_response().status().as_u16(), 415);
        let e: ApiError = BoardError::from(RepoError::Conflict).into();
        assert_eq!(e.error_response().status().as_u16(), 400);
    }

    #[test]
    fn repo_locked_becomes_policy() {
        assert!(matches!(
            BoardError::from(RepoError::Locked),
            BoardError::Policy(PolicyRejection::Locked)
        ));
    }
}
