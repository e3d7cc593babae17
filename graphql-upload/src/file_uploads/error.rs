use std::time::Duration;

use http::HeaderValue;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use thiserror::Error;

use crate::body;
use crate::services;

/// Errors that may occur while rewriting a multipart request.
#[derive(Debug, Error)]
pub enum FileUploadError {
    /// Represents an invalid request, wrapping the context as a string
    #[error("invalid multipart request: {0}")]
    InvalidMultipartRequest(#[from] multer::Error),

    #[error("Missing multipart field 'operations'.")]
    MissingOperationsField,

    #[error("Missing multipart field 'map'.")]
    MissingMapField,

    #[error("Invalid JSON in the 'operations' multipart field: {0}")]
    InvalidJsonInOperationsField(serde_json::Error),

    #[error("Invalid JSON in the 'map' multipart field: {0}")]
    InvalidJsonInMapField(serde_json::Error),

    #[error(
        "Invalid path '{0}' found inside 'map' field, it does not point to a valid value inside 'operations' field."
    )]
    PathNotFound(String),

    #[error("Path '{0}' found inside 'map' field overlaps the path of another entry.")]
    DuplicateTarget(String),

    #[error("Could not access multipart file '{field}': {reason}.")]
    FileAccess { field: String, reason: String },

    #[error("Could not store multipart file '{field}': {source}")]
    Storage {
        field: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Reading a part of the multipart request took longer than {timeout:?}.")]
    ReadTimeout { timeout: Duration },

    #[error("File upload task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    #[error("Could not serialize the rewritten request: {0}")]
    Serialization(serde_json::Error),
}

impl FileUploadError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FileUploadError::InvalidMultipartRequest(
                multer::Error::FieldSizeExceeded { .. } | multer::Error::StreamSizeExceeded { .. },
            ) => StatusCode::PAYLOAD_TOO_LARGE,
            FileUploadError::ReadTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            FileUploadError::InvalidMultipartRequest(_)
            | FileUploadError::MissingOperationsField
            | FileUploadError::MissingMapField
            | FileUploadError::InvalidJsonInOperationsField(_)
            | FileUploadError::InvalidJsonInMapField(_)
            | FileUploadError::PathNotFound(_)
            | FileUploadError::DuplicateTarget(_) => StatusCode::BAD_REQUEST,
            FileUploadError::FileAccess { .. }
            | FileUploadError::Storage { .. }
            | FileUploadError::TaskFailed(_)
            | FileUploadError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FileUploadError> for services::Response {
    fn from(value: FileUploadError) -> Self {
        let mut response = http::Response::new(body::full(value.to_string()));
        *response.status_mut() = value.status_code();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}
