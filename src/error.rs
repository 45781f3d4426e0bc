use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    #[error("Corner markers not found in: {}", .missing.join(", "))]
    MarkerNotFound { missing: Vec<&'static str> },

    #[error("Marker positions do not form a usable sheet outline: {0}")]
    PerspectiveDegenerate(String),

    #[error("Template does not fit its page: {0}")]
    TemplateMismatch(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Image too large: {size} bytes (max: {max} bytes)")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Missing file in request")]
    MissingFile,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Scan did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            ScanError::MarkerNotFound { .. } => "MARKER_NOT_FOUND",
            ScanError::PerspectiveDegenerate(_) => "PERSPECTIVE_DEGENERATE",
            ScanError::TemplateMismatch(_) => "TEMPLATE_MISMATCH",
            ScanError::InvalidTemplate(_) => "INVALID_TEMPLATE",
            ScanError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            ScanError::ImageTooLarge { .. } => "IMAGE_TOO_LARGE",
            ScanError::MissingFile => "MISSING_FILE",
            ScanError::InvalidRequest(_) => "INVALID_REQUEST",
            ScanError::Timeout { .. } => "TIMEOUT",
            ScanError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// What the person holding the sheet should do next
    pub fn hint(&self) -> &'static str {
        match self {
            ScanError::ImageDecode(_) => "Upload a PNG or JPEG photo of the answer sheet.",
            ScanError::MarkerNotFound { .. } => {
                "Retake the photo with all four corner markers visible and evenly lit."
            }
            ScanError::PerspectiveDegenerate(_) => {
                "Retake the photo straight on, holding the camera parallel to the sheet."
            }
            ScanError::TemplateMismatch(_) | ScanError::InvalidTemplate(_) => {
                "Check the template configuration; this is not a photo problem."
            }
            ScanError::TemplateNotFound(_) => "Pick one of the templates listed by /api/templates.",
            ScanError::ImageTooLarge { .. } => "Reduce the photo resolution and try again.",
            ScanError::MissingFile => "Attach the sheet photo in the `file` field.",
            ScanError::InvalidRequest(_) => "Fix the request fields and try again.",
            ScanError::Timeout { .. } => "Retake the photo at a lower resolution.",
            ScanError::Internal(_) => "Try again later.",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ScanError::ImageDecode(_)
            | ScanError::InvalidTemplate(_)
            | ScanError::MissingFile
            | ScanError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ScanError::MarkerNotFound { .. }
            | ScanError::PerspectiveDegenerate(_)
            | ScanError::TemplateMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ScanError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            ScanError::ImageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ScanError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ScanError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub hint: String,
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("Scan rejected: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
            hint: self.hint().to_string(),
        });

        (status, body).into_response()
    }
}
