use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::handlers::documents::DocIdQuery;
use crate::models::{ApiError, CommentRequest, CommentResponse};
use crate::routes::auth_middleware::CurrentUser;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CommentIdQuery {
    #[serde(rename = "commentId")]
    pub comment_id: String,
}

/// Create a comment; writers and reviewers only. The new comment is also
/// pushed to the document's room as a COMMENT frame.
pub async fn add_comment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<CommentRequest>,
) -> Result<Json<CommentResponse>, ApiError> {
    if req.document_id.is_empty() || req.content.is_empty() {
        return Err(ApiError::BadRequest(
            "document id and content are required".to_string(),
        ));
    }
    let comment = state.documents.add_comment(&user.uid, req).await?;
    Ok(Json(comment))
}

pub async fn get_comments(
    State(state): State<AppState>,
    Query(query): Query<DocIdQuery>,
) -> Result<Json<Vec<CommentResponse>>, ApiError> {
    let comments = state.store.comments(&query.doc_id).await?;
    Ok(Json(comments))
}

/// Toggle a comment's resolved flag; the author or the document owner.
pub async fn resolve_comment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<CommentIdQuery>,
) -> Result<&'static str, ApiError> {
    state
        .documents
        .resolve_comment(&query.comment_id, &user.uid)
        .await?;
    Ok("Comment status updated")
}

/// Remove a comment; the author or the document owner.
pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<CommentIdQuery>,
) -> Result<&'static str, ApiError> {
    state
        .documents
        .delete_comment(&query.comment_id, &user.uid)
        .await?;
    Ok("Comment deleted")
}
