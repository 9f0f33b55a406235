use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::db::{ContentStore, DocumentRow, DocumentStore};
use crate::models::{CollaboratorInfo, CommentResponse, Role};

/// In-memory document store.
///
/// Backs the server when no database URL is configured, and doubles as the
/// store for the test suite. Single-process only; nothing survives a
/// restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    documents: HashMap<String, DocumentRecord>,
    /// (document_id, user_id) -> role
    collaborators: HashMap<(String, String), Role>,
    comments: HashMap<String, CommentRecord>,
    /// email -> user id
    users: HashMap<String, String>,
}

#[derive(Clone)]
struct DocumentRecord {
    content: String,
    owner_id: String,
    title: String,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
struct CommentRecord {
    document_id: String,
    user_id: String,
    content: String,
    quote: Option<String>,
    text_range: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    resolved: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing the REST create path.
    pub fn insert_document(&self, doc_id: &str, content: &str, owner_id: &str, title: &str) {
        self.inner.lock().documents.insert(
            doc_id.to_string(),
            DocumentRecord {
                content: content.to_string(),
                owner_id: owner_id.to_string(),
                title: title.to_string(),
                updated_at: Utc::now(),
            },
        );
    }

    /// Seed a known user so email invitations can resolve.
    pub fn insert_user(&self, email: &str, user_id: &str) {
        self.inner
            .lock()
            .users
            .insert(email.to_string(), user_id.to_string());
    }

    /// Seed a collaborator role directly.
    pub fn insert_collaborator(&self, doc_id: &str, user_id: &str, role: Role) {
        self.inner
            .lock()
            .collaborators
            .insert((doc_id.to_string(), user_id.to_string()), role);
    }

    /// Current stored content, if the document exists.
    pub fn content(&self, doc_id: &str) -> Option<String> {
        self.inner
            .lock()
            .documents
            .get(doc_id)
            .map(|d| d.content.clone())
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn read_content_and_title(
        &self,
        doc_id: &str,
    ) -> Result<Option<(String, String)>, sqlx::Error> {
        Ok(self
            .inner
            .lock()
            .documents
            .get(doc_id)
            .map(|d| (d.content.clone(), d.title.clone())))
    }

    async fn update_content(&self, doc_id: &str, content: &str) -> Result<(), sqlx::Error> {
        if let Some(doc) = self.inner.lock().documents.get_mut(doc_id) {
            doc.content = content.to_string();
            doc.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read_owner_and_title(
        &self,
        doc_id: &str,
    ) -> Result<Option<(String, String)>, sqlx::Error> {
        Ok(self
            .inner
            .lock()
            .documents
            .get(doc_id)
            .map(|d| (d.owner_id.clone(), d.title.clone())))
    }

    async fn collaborator_role(
        &self,
        doc_id: &str,
        user_id: &str,
    ) -> Result<Option<Role>, sqlx::Error> {
        Ok(self
            .inner
            .lock()
            .collaborators
            .get(&(doc_id.to_string(), user_id.to_string()))
            .copied())
    }

    async fn owner_id(&self, doc_id: &str) -> Result<Option<String>, sqlx::Error> {
        Ok(self
            .inner
            .lock()
            .documents
            .get(doc_id)
            .map(|d| d.owner_id.clone()))
    }

    async fn create_document(
        &self,
        doc_id: &str,
        content: &str,
        owner_id: &str,
        title: &str,
    ) -> Result<(), sqlx::Error> {
        self.insert_document(doc_id, content, owner_id, title);
        Ok(())
    }

    async fn delete_document(&self, doc_id: &str) -> Result<u64, sqlx::Error> {
        let mut inner = self.inner.lock();
        let removed = inner.documents.remove(doc_id).is_some();
        inner.collaborators.retain(|(doc, _), _| doc.as_str() != doc_id);
        inner.comments.retain(|_, c| c.document_id != doc_id);
        Ok(removed as u64)
    }

    async fn update_title(
        &self,
        doc_id: &str,
        title: &str,
        owner_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let mut inner = self.inner.lock();
        match inner.documents.get_mut(doc_id) {
            Some(doc) if doc.owner_id == owner_id => {
                doc.title = title.to_string();
                doc.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<String>, sqlx::Error> {
        Ok(self.inner.lock().users.get(email).cloned())
    }

    async fn add_collaborator(
        &self,
        doc_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), sqlx::Error> {
        self.insert_collaborator(doc_id, user_id, role);
        Ok(())
    }

    async fn documents_by_user(&self, user_id: &str) -> Result<Vec<DocumentRow>, sqlx::Error> {
        let inner = self.inner.lock();
        let mut rows: Vec<DocumentRow> = inner
            .documents
            .iter()
            .filter(|(id, doc)| {
                doc.owner_id == user_id
                    || inner
                        .collaborators
                        .contains_key(&((*id).clone(), user_id.to_string()))
            })
            .map(|(id, doc)| DocumentRow {
                id: id.clone(),
                title: doc.title.clone(),
                updated_at: doc.updated_at,
                content: doc.content.clone(),
                owner_id: doc.owner_id.clone(),
            })
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn document_members(&self, doc_id: &str) -> Result<Vec<CollaboratorInfo>, sqlx::Error> {
        let inner = self.inner.lock();
        let email_of = |user_id: &str| {
            inner
                .users
                .iter()
                .find(|(_, id)| id.as_str() == user_id)
                .map(|(email, _)| email.clone())
                .unwrap_or_else(|| user_id.to_string())
        };
        let mut members = Vec::new();
        if let Some(doc) = inner.documents.get(doc_id) {
            members.push(CollaboratorInfo {
                id: doc.owner_id.clone(),
                name: email_of(&doc.owner_id),
                role: "owner".to_string(),
            });
        }
        for ((doc, user_id), role) in &inner.collaborators {
            if doc.as_str() == doc_id {
                members.push(CollaboratorInfo {
                    id: user_id.clone(),
                    name: email_of(user_id),
                    role: role.as_str().to_string(),
                });
            }
        }
        Ok(members)
    }

    async fn check_access(&self, doc_id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
        let inner = self.inner.lock();
        let owner = inner
            .documents
            .get(doc_id)
            .is_some_and(|d| d.owner_id == user_id);
        Ok(owner
            || inner
                .collaborators
                .contains_key(&(doc_id.to_string(), user_id.to_string())))
    }

    async fn add_comment(
        &self,
        doc_id: &str,
        user_id: &str,
        content: &str,
        quote: Option<&str>,
        text_range: Option<&serde_json::Value>,
    ) -> Result<(String, DateTime<Utc>), sqlx::Error> {
        let comment_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.inner.lock().comments.insert(
            comment_id.clone(),
            CommentRecord {
                document_id: doc_id.to_string(),
                user_id: user_id.to_string(),
                content: content.to_string(),
                quote: quote.map(str::to_string),
                text_range: text_range.cloned(),
                created_at,
                resolved: false,
            },
        );
        Ok((comment_id, created_at))
    }

    async fn comments(&self, doc_id: &str) -> Result<Vec<CommentResponse>, sqlx::Error> {
        let inner = self.inner.lock();
        let mut comments: Vec<CommentResponse> = inner
            .comments
            .iter()
            .filter(|(_, c)| c.document_id == doc_id)
            .map(|(id, c)| CommentResponse {
                id: id.clone(),
                document_id: c.document_id.clone(),
                user_id: c.user_id.clone(),
                content: c.content.clone(),
                quote: c.quote.clone(),
                text_range: c.text_range.clone(),
                created_at: c.created_at,
                resolved: c.resolved,
            })
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn resolve_comment(
        &self,
        comment_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let mut inner = self.inner.lock();
        let owner_of = |documents: &HashMap<String, DocumentRecord>, doc_id: &str| {
            documents.get(doc_id).map(|d| d.owner_id.clone())
        };
        if let Some(comment) = inner.comments.get(comment_id) {
            let doc_id = comment.document_id.clone();
            let permitted = comment.user_id == user_id
                || owner_of(&inner.documents, &doc_id).as_deref() == Some(user_id);
            if permitted {
                if let Some(comment) = inner.comments.get_mut(comment_id) {
                    comment.resolved = !comment.resolved;
                }
                return Ok(Some(doc_id));
            }
        }
        Ok(None)
    }

    async fn delete_comment(
        &self,
        comment_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let mut inner = self.inner.lock();
        if let Some(comment) = inner.comments.get(comment_id) {
            let doc_id = comment.document_id.clone();
            let permitted = comment.user_id == user_id
                || inner
                    .documents
                    .get(&doc_id)
                    .is_some_and(|d| d.owner_id == user_id);
            if permitted {
                inner.comments.remove(comment_id);
                return Ok(Some(doc_id));
            }
        }
        Ok(None)
    }
}
