use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::domain::order::{ErrorClass, OrderError};

// ============================================================================
// Response Envelopes
// ============================================================================
//
//   success: {"data": ...}
//   failure: {"error": {"kind": "insufficient_stock", "message": "..."}}
//
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(DataEnvelope { data })
}

pub fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(DataEnvelope { data })
}

pub fn error(status: StatusCode, kind: &str, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorEnvelope {
        error: ErrorBody {
            kind: kind.to_string(),
            message: message.into(),
        },
    })
}

impl ResponseError for OrderError {
    fn status_code(&self) -> StatusCode {
        match self.class() {
            ErrorClass::Validation => StatusCode::BAD_REQUEST,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::Conflict => StatusCode::CONFLICT,
            ErrorClass::Infrastructure if self.is_retriable() => StatusCode::SERVICE_UNAVAILABLE,
            ErrorClass::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        error(self.status_code(), self.kind(), self.to_string())
    }
}
