use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;
use crate::storage::StoreError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Stage of an upload that failed after validation. The label is what the
/// client sees in `details`; the underlying cause only goes to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Decode,
    Encode,
    WriteFull,
    WriteThumb,
    Insert,
}

impl UploadStage {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStage::Decode => "decode",
            UploadStage::Encode => "encode",
            UploadStage::WriteFull => "write_full",
            UploadStage::WriteThumb => "write_thumb",
            UploadStage::Insert => "insert",
        }
    }

    fn client_message(self) -> &'static str {
        match self {
            UploadStage::Decode => "The file could not be read as an image",
            UploadStage::Encode => "The image could not be processed",
            UploadStage::WriteFull | UploadStage::WriteThumb => "The image could not be stored",
            UploadStage::Insert => "The panel could not be recorded",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("No file")] NoFile,
    #[error("{0}")] BadRequest(String),
    #[error("Only image uploads are allowed")] UnsupportedMediaType,
    #[error("File too large")] PayloadTooLarge,
    #[error("Upload failed")] UploadFailed(UploadStage),
    #[error("Failed to fetch panels")] QueryFailed,
    #[error("not found")] NotFound,
    #[error("method not allowed")] MethodNotAllowed,
    #[error("internal error")] Internal,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Io(err) => {
                log::error!("rendition store error: {err}");
                ApiError::Internal
            }
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        log::error!("panel query failed: {e}");
        ApiError::QueryFailed
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::NoFile | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::UploadFailed(_) | ApiError::QueryFailed | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let details = match self {
            ApiError::UploadFailed(stage) => Some(stage.client_message().to_string()),
            _ => None,
        };
        HttpResponse::build(self.status_code())
            .json(ApiErrorBody { error: self.to_string(), details })
    }
}
