use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::error;

use crate::models::{
    ApiError, CollaboratorInfo, CreateDocRequest, CreateDocResponse, DocumentMetadata,
    InviteRequest, SaveDocRequest, UpdateDocRequest,
};
use crate::routes::auth_middleware::CurrentUser;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DocIdQuery {
    #[serde(rename = "docId")]
    pub doc_id: String,
}

/// Create a document owned by the caller, with empty content. A missing or
/// malformed body just means no title was chosen.
pub async fn create_document(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: axum::body::Bytes,
) -> Result<Json<CreateDocResponse>, ApiError> {
    let req: CreateDocRequest = serde_json::from_slice(&body).unwrap_or_default();
    let document_id = state.documents.create_document(&user.uid, req.title).await?;
    Ok(Json(CreateDocResponse { document_id }))
}

/// Documents owned by or shared with the caller.
pub async fn list_documents(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<DocumentMetadata>>, ApiError> {
    let docs = state.documents.list_documents(&user.uid).await?;
    Ok(Json(docs))
}

/// Rename a document; owner only.
pub async fn update_document(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<DocIdQuery>,
    Json(req): Json<UpdateDocRequest>,
) -> Result<&'static str, ApiError> {
    if req.title.is_empty() {
        return Err(ApiError::BadRequest("title cannot be empty".to_string()));
    }
    state
        .documents
        .update_title(&query.doc_id, &user.uid, &req.title)
        .await?;
    Ok("Document updated successfully")
}

/// Delete a document; owner only. Live viewers are disconnected.
pub async fn delete_document(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<DocIdQuery>,
) -> Result<&'static str, ApiError> {
    state
        .documents
        .delete_document(&query.doc_id, &user.uid)
        .await?;
    Ok("Document deleted successfully")
}

/// Persist full content from the REST layer; writers only.
pub async fn save_document(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<SaveDocRequest>,
) -> Result<&'static str, ApiError> {
    let content = req.content.get();
    if content.is_empty() || content == "null" {
        return Err(ApiError::BadRequest("content cannot be empty".to_string()));
    }
    state.documents.save_document(&user.uid, req).await?;
    Ok("Document saved successfully")
}

/// Grant a role to another user by email; owner only.
pub async fn invite_collaborator(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<InviteRequest>,
) -> Result<&'static str, ApiError> {
    state.documents.invite_collaborator(&user.uid, req).await?;
    Ok("Collaborator added successfully")
}

/// List a document's members; any member may ask.
pub async fn document_members(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<DocIdQuery>,
) -> Result<Json<Vec<CollaboratorInfo>>, ApiError> {
    let has_access = state
        .store
        .check_access(&query.doc_id, &user.uid)
        .await
        .unwrap_or_else(|e| {
            error!(doc_id = %query.doc_id, error = %e, "access check failed");
            false
        });
    if !has_access {
        return Err(ApiError::Forbidden(
            "unauthorized or document not found".to_string(),
        ));
    }

    let members = state.store.document_members(&query.doc_id).await?;
    Ok(Json(members))
}
