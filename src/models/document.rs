use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use utoipa::ToSchema;

use crate::models::Role;

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateDocRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateDocResponse {
    pub document_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateDocRequest {
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SaveDocRequest {
    pub document_id: String,
    /// Full document content as an opaque Quill delta
    #[schema(value_type = Object)]
    pub content: Box<RawValue>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InviteRequest {
    pub document_id: String,
    pub email: String,
    pub role: Role,
}

/// One member of a document: the owner or an invited collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CollaboratorInfo {
    pub id: String,
    pub name: String,
    pub role: String,
}

/// Listing entry for the caller's documents.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentMetadata {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub snippet: String,
    pub is_owner: bool,
    pub collab: Vec<CollaboratorInfo>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommentRequest {
    pub document_id: String,
    pub content: String,
    #[serde(default)]
    pub quote: Option<String>,
    /// JSON text range, e.g. {"index": 4, "length": 12}
    #[serde(default)]
    #[schema(value_type = Object)]
    pub text_range: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommentResponse {
    pub id: String,
    pub document_id: String,
    pub user_id: String,
    pub content: String,
    pub quote: Option<String>,
    #[schema(value_type = Object)]
    pub text_range: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}
