use std::sync::Arc;

use axum::{
    extract::{Extension, Form},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub async fn list_item_types(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.ledger.item_types().await {
        Ok(types) => {
            let body: Vec<_> = types.into_iter().map(dto::item_type_to_json).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn create_item_type(
    Extension(services): Extension<Arc<AppServices>>,
    Form(form): Form<dto::LookupForm>,
) -> axum::response::Response {
    match services.ledger.create_item_type(&form.name).await {
        Ok(t) => (StatusCode::CREATED, Json(serde_json::json!({ "id": t.id.get() }))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_substitutions(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.ledger.substitutions().await {
        Ok(subs) => {
            let body: Vec<_> = subs.into_iter().map(dto::substitution_to_json).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn create_substitution(
    Extension(services): Extension<Arc<AppServices>>,
    Form(form): Form<dto::LookupForm>,
) -> axum::response::Response {
    match services.ledger.create_substitution(&form.name).await {
        Ok(s) => (StatusCode::CREATED, Json(serde_json::json!({ "id": s.id.get() }))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
