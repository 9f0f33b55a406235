use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};

use crate::handlers;
use crate::routes::auth_middleware::auth_middleware;
use crate::state::AppState;

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router {
    Router::new()
        .route("/documents/create", post(handlers::create_document))
        .route("/documents", get(handlers::list_documents))
        .route("/documents/update", put(handlers::update_document))
        .route("/documents/delete", delete(handlers::delete_document))
        .route("/documents/save", post(handlers::save_document))
        .route("/documents/invite", post(handlers::invite_collaborator))
        .route("/documents/members", get(handlers::document_members))
        .route("/documents/comments/add", post(handlers::add_comment))
        .route("/documents/comments", get(handlers::get_comments))
        .route("/documents/comments/resolve", put(handlers::resolve_comment))
        .route("/documents/comments/delete", delete(handlers::delete_comment))
        .route_layer(middleware::from_fn(auth_middleware)) // Applies to all routes added above
        .with_state(state)
}

/// The socket endpoint, behind the same authentication as the API.
pub fn create_ws_routes(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(crate::ws::serve_ws))
        .route_layer(middleware::from_fn(auth_middleware))
        .with_state(state)
}
