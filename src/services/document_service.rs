use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::DocumentStore;
use crate::models::{
    ApiError, CommentRequest, CommentResponse, DocumentMetadata, InviteRequest, MessageType, Role,
    SaveDocRequest, WsMessage,
};
use crate::ws::hub::EMPTY_DELTA;
use crate::ws::HubHandle;

/// Document operations behind the REST layer: store access plus the hub
/// broadcasts that keep live rooms in sync with REST-driven changes.
#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    hub: HubHandle,
}

impl DocumentService {
    pub fn new(store: Arc<dyn DocumentStore>, hub: HubHandle) -> Self {
        Self { store, hub }
    }

    pub async fn create_document(
        &self,
        user_id: &str,
        title: Option<String>,
    ) -> Result<String, ApiError> {
        let doc_id = Uuid::new_v4().to_string();
        let title = title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled Document".to_string());
        self.store
            .create_document(&doc_id, EMPTY_DELTA, user_id, &title)
            .await?;
        info!(%doc_id, %user_id, "document created");
        Ok(doc_id)
    }

    /// Explicit save from the REST layer; writers only. The new content is
    /// also broadcast so open rooms converge on it.
    pub async fn save_document(&self, user_id: &str, req: SaveDocRequest) -> Result<(), ApiError> {
        let role = self.user_role(&req.document_id, user_id).await?;
        if !role.can_edit() {
            warn!(%user_id, doc_id = %req.document_id, "save rejected: not a writer");
            return Err(ApiError::Forbidden("only writers can save".to_string()));
        }

        self.store
            .update_content(&req.document_id, req.content.get())
            .await?;

        self.hub.broadcast(WsMessage {
            kind: MessageType::Update,
            document_id: req.document_id,
            user_id: user_id.to_string(),
            payload: req.content,
        });
        Ok(())
    }

    pub async fn delete_document(&self, doc_id: &str, user_id: &str) -> Result<(), ApiError> {
        let owner_id = self
            .store
            .owner_id(doc_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("document '{}' not found", doc_id)))?;
        if owner_id != user_id {
            warn!(%user_id, %doc_id, %owner_id, "delete rejected: not the owner");
            return Err(ApiError::Forbidden("only the owner can delete".to_string()));
        }

        self.store.delete_document(doc_id).await?;
        info!(%doc_id, %user_id, "document deleted");
        // Live viewers are dropped without a flush; their content would
        // resurrect the deleted row.
        self.hub.remove_document(doc_id);
        Ok(())
    }

    pub async fn update_title(
        &self,
        doc_id: &str,
        user_id: &str,
        title: &str,
    ) -> Result<(), ApiError> {
        let rows = self.store.update_title(doc_id, title, user_id).await?;
        if rows == 0 {
            return Err(ApiError::NotFound(
                "document not found or unauthorized".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn invite_collaborator(
        &self,
        user_id: &str,
        req: InviteRequest,
    ) -> Result<(), ApiError> {
        let owner_id = self
            .store
            .owner_id(&req.document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("document '{}' not found", req.document_id)))?;
        if owner_id != user_id {
            warn!(%user_id, doc_id = %req.document_id, "invite rejected: not the owner");
            return Err(ApiError::Forbidden("only the owner can invite".to_string()));
        }

        let target = self
            .store
            .user_by_email(&req.email)
            .await?
            .ok_or_else(|| ApiError::NotFound("user not found with that email".to_string()))?;

        self.store
            .add_collaborator(&req.document_id, &target, req.role)
            .await?;
        Ok(())
    }

    pub async fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentMetadata>, ApiError> {
        let rows = self.store.documents_by_user(user_id).await?;
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let collab = self.store.document_members(&row.id).await.unwrap_or_default();
            docs.push(DocumentMetadata {
                snippet: snippet_from_content(&row.content),
                is_owner: row.owner_id == user_id,
                id: row.id,
                title: row.title,
                updated_at: row.updated_at,
                collab,
            });
        }
        Ok(docs)
    }

    pub async fn add_comment(
        &self,
        user_id: &str,
        req: CommentRequest,
    ) -> Result<CommentResponse, ApiError> {
        let role = self.user_role(&req.document_id, user_id).await?;
        if !role.can_comment() {
            warn!(%user_id, doc_id = %req.document_id, "comment rejected: insufficient role");
            return Err(ApiError::Forbidden(
                "only writers and reviewers can comment".to_string(),
            ));
        }

        let (id, created_at) = self
            .store
            .add_comment(
                &req.document_id,
                user_id,
                &req.content,
                req.quote.as_deref(),
                req.text_range.as_ref(),
            )
            .await?;

        let resp = CommentResponse {
            id,
            document_id: req.document_id,
            user_id: user_id.to_string(),
            content: req.content,
            quote: req.quote,
            text_range: req.text_range,
            created_at,
            resolved: false,
        };
        self.notify_room(MessageType::Comment, &resp.document_id, user_id, &resp);
        Ok(resp)
    }

    pub async fn resolve_comment(&self, comment_id: &str, user_id: &str) -> Result<(), ApiError> {
        let doc_id = self
            .store
            .resolve_comment(comment_id, user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("comment not found or unauthorized".to_string()))?;
        self.notify_room(
            MessageType::CommentUpdate,
            &doc_id,
            user_id,
            &serde_json::json!({ "id": comment_id }),
        );
        Ok(())
    }

    pub async fn delete_comment(&self, comment_id: &str, user_id: &str) -> Result<(), ApiError> {
        let doc_id = self
            .store
            .delete_comment(comment_id, user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("comment not found or unauthorized".to_string()))?;
        self.notify_room(
            MessageType::CommentDelete,
            &doc_id,
            user_id,
            &serde_json::json!({ "id": comment_id }),
        );
        Ok(())
    }

    /// Owner implies writer; otherwise the stored collaborator role, with
    /// reader as the floor.
    async fn user_role(&self, doc_id: &str, user_id: &str) -> Result<Role, ApiError> {
        let owner_id = self
            .store
            .owner_id(doc_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("document '{}' not found", doc_id)))?;
        if owner_id == user_id {
            return Ok(Role::Writer);
        }
        Ok(self
            .store
            .collaborator_role(doc_id, user_id)
            .await?
            .unwrap_or(Role::Reader))
    }

    fn notify_room<T: serde::Serialize>(
        &self,
        kind: MessageType,
        doc_id: &str,
        user_id: &str,
        payload: &T,
    ) {
        match serde_json::value::to_raw_value(payload) {
            Ok(payload) => self.hub.broadcast(WsMessage {
                kind,
                document_id: doc_id.to_string(),
                user_id: user_id.to_string(),
                payload,
            }),
            Err(e) => error!(%doc_id, error = %e, "failed to serialize room notification"),
        }
    }
}

/// Plain-text preview of a Quill delta, for document listings.
fn snippet_from_content(content: &str) -> String {
    #[derive(Deserialize)]
    struct Delta {
        ops: Vec<Op>,
    }
    #[derive(Deserialize)]
    struct Op {
        insert: Option<serde_json::Value>,
    }

    let delta: Delta = match serde_json::from_str(content) {
        Ok(delta) => delta,
        Err(_) => return String::new(),
    };

    let mut text = String::new();
    for op in delta.ops {
        if let Some(serde_json::Value::String(s)) = op.insert {
            text.push_str(&s);
        }
        if text.len() > 100 {
            break;
        }
    }

    let text = text.trim().replace('\n', " ");
    if text.len() > 100 {
        let mut cut = 100;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_extracts_plain_text_inserts() {
        let content = r#"{"ops":[{"insert":"Hello "},{"insert":"world\n"}]}"#;
        assert_eq!(snippet_from_content(content), "Hello world");
    }

    #[test]
    fn snippet_skips_embeds_and_invalid_json() {
        let content = r#"{"ops":[{"insert":{"image":"x.png"}},{"insert":"caption"}]}"#;
        assert_eq!(snippet_from_content(content), "caption");
        assert_eq!(snippet_from_content("not json"), "");
    }

    #[test]
    fn snippet_truncates_long_content() {
        let long = "a".repeat(300);
        let content = format!(r#"{{"ops":[{{"insert":"{long}"}}]}}"#);
        let snippet = snippet_from_content(&content);
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.len(), 103);
    }
}
