use axum::{
    routing::{get, post},
    Router,
};

pub mod items;
pub mod lookups;
pub mod system;

/// Router for every endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/items", get(items::list_items))
        .route("/item/add", post(items::add_item))
        .route("/item/update", post(items::update_item))
        .route("/item/dispose", post(items::dispose_item))
        .route("/types", get(lookups::list_item_types).post(lookups::create_item_type))
        .route(
            "/substitutions",
            get(lookups::list_substitutions).post(lookups::create_substitution),
        )
}
