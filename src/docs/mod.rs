use crate::models::*;
use utoipa::OpenApi;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Create a document
#[utoipa::path(
    post,
    path = "/api/documents/create",
    tag = "documents",
    request_body = CreateDocRequest,
    responses(
        (status = 200, description = "Document created", body = CreateDocResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn create_document_doc() {}

/// List the caller's documents
#[utoipa::path(
    get,
    path = "/api/documents",
    tag = "documents",
    responses(
        (status = 200, description = "Documents owned by or shared with the caller", body = [DocumentMetadata]),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn list_documents_doc() {}

/// Rename a document
#[utoipa::path(
    put,
    path = "/api/documents/update",
    tag = "documents",
    request_body = UpdateDocRequest,
    params(("docId" = String, Query, description = "Document ID")),
    responses(
        (status = 200, description = "Document renamed"),
        (status = 404, description = "Not found or not the owner", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn update_document_doc() {}

/// Delete a document
#[utoipa::path(
    delete,
    path = "/api/documents/delete",
    tag = "documents",
    params(("docId" = String, Query, description = "Document ID")),
    responses(
        (status = 200, description = "Document deleted"),
        (status = 403, description = "Only the owner can delete", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn delete_document_doc() {}

/// Save document content
#[utoipa::path(
    post,
    path = "/api/documents/save",
    tag = "documents",
    request_body = SaveDocRequest,
    responses(
        (status = 200, description = "Content saved"),
        (status = 403, description = "Only writers can save", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn save_document_doc() {}

/// Invite a collaborator
#[utoipa::path(
    post,
    path = "/api/documents/invite",
    tag = "documents",
    request_body = InviteRequest,
    responses(
        (status = 200, description = "Collaborator added"),
        (status = 403, description = "Only the owner can invite", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn invite_collaborator_doc() {}

/// List a document's members
#[utoipa::path(
    get,
    path = "/api/documents/members",
    tag = "documents",
    params(("docId" = String, Query, description = "Document ID")),
    responses(
        (status = 200, description = "Owner and collaborators", body = [CollaboratorInfo]),
        (status = 403, description = "Unauthorized or document not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn document_members_doc() {}

/// Create a comment
#[utoipa::path(
    post,
    path = "/api/documents/comments/add",
    tag = "comments",
    request_body = CommentRequest,
    responses(
        (status = 200, description = "Comment created", body = CommentResponse),
        (status = 403, description = "Only writers and reviewers can comment", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn add_comment_doc() {}

/// List a document's comments
#[utoipa::path(
    get,
    path = "/api/documents/comments",
    tag = "comments",
    params(("docId" = String, Query, description = "Document ID")),
    responses(
        (status = 200, description = "Comments ordered oldest first", body = [CommentResponse])
    )
)]
#[allow(dead_code)]
pub async fn get_comments_doc() {}

/// Resolve or unresolve a comment
#[utoipa::path(
    put,
    path = "/api/documents/comments/resolve",
    tag = "comments",
    params(("commentId" = String, Query, description = "Comment ID")),
    responses(
        (status = 200, description = "Comment status toggled"),
        (status = 404, description = "Comment not found or unauthorized", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn resolve_comment_doc() {}

/// Delete a comment
#[utoipa::path(
    delete,
    path = "/api/documents/comments/delete",
    tag = "comments",
    params(("commentId" = String, Query, description = "Comment ID")),
    responses(
        (status = 200, description = "Comment deleted"),
        (status = 404, description = "Comment not found or unauthorized", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn delete_comment_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        create_document_doc,
        list_documents_doc,
        update_document_doc,
        delete_document_doc,
        save_document_doc,
        invite_collaborator_doc,
        document_members_doc,
        add_comment_doc,
        get_comments_doc,
        resolve_comment_doc,
        delete_comment_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            CreateDocRequest,
            CreateDocResponse,
            UpdateDocRequest,
            SaveDocRequest,
            InviteRequest,
            DocumentMetadata,
            CollaboratorInfo,
            CommentRequest,
            CommentResponse,
            Role,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "documents", description = "Document management endpoints"),
        (name = "comments", description = "Comment endpoints")
    )
)]
pub struct ApiDoc;
