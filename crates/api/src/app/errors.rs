use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use pantry_infra::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::NotFound(name) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("item not found: {name}"))
        }
        LedgerError::DuplicateName(name) => {
            json_error(StatusCode::CONFLICT, "duplicate_name", format!("name already exists: {name}"))
        }
        LedgerError::InsufficientStock(name) => json_error(
            StatusCode::CONFLICT,
            "insufficient_stock",
            format!("no stock left for item: {name}"),
        ),
        LedgerError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        err @ LedgerError::Consistency { .. } => {
            error!(error = %err, "consistency failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "consistency_error", err.to_string())
        }
        err @ LedgerError::Storage { .. } => {
            error!(error = %err, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", err.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn bad_request(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}
