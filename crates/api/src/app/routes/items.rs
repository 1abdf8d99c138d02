use std::sync::Arc;

use axum::{
    extract::{Extension, Form, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tokio_stream::StreamExt;

use crate::app::dto::{self, UpdateAction};
use crate::app::errors;
use crate::app::services::AppServices;

pub async fn list_items(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::ListItemsParams>,
) -> axum::response::Response {
    let rows = services
        .ledger
        .list(params.into_query())
        .map(|row| row.map(dto::item_view_to_json))
        .collect::<Result<Vec<_>, _>>()
        .await;

    match rows {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Form(form): Form<dto::AddItemForm>,
) -> axum::response::Response {
    let new = match form.into_new_item() {
        Ok(new) => new,
        Err(resp) => return resp,
    };

    match services.ledger.add(new).await {
        Ok(id) => (StatusCode::CREATED, Json(serde_json::json!({ "id": id.get() }))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn update_item(
    Extension(services): Extension<Arc<AppServices>>,
    Form(form): Form<dto::UpdateItemForm>,
) -> axum::response::Response {
    let action = match form.parse_action() {
        Ok(action) => action,
        Err(resp) => return resp,
    };

    let result = match action {
        UpdateAction::Restock => services.ledger.restock(&form.item_name, 1).await,
        UpdateAction::Consume => services.ledger.consume(&form.item_name).await,
    };

    match result {
        Ok(snap) => (StatusCode::OK, Json(dto::item_snapshot_to_json(snap))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn dispose_item(
    Extension(services): Extension<Arc<AppServices>>,
    Form(form): Form<dto::DisposeItemForm>,
) -> axum::response::Response {
    match services.ledger.dispose(&form.item_name).await {
        Ok(snap) => (StatusCode::OK, Json(dto::dispose_snapshot_to_json(snap))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
