use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::models::{CollaboratorInfo, CommentResponse, Role};

/// The narrow store contract consumed by the hub: load a document's content
/// when its room is created, write it back when it is dirty.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn read_content_and_title(
        &self,
        doc_id: &str,
    ) -> Result<Option<(String, String)>, sqlx::Error>;

    async fn update_content(&self, doc_id: &str, content: &str) -> Result<(), sqlx::Error>;
}

/// Row-level reads and writes for `documents`, `collaborators` and
/// `comments`. The REST layer and the socket admission path consume this;
/// the hub itself only ever sees the [`ContentStore`] subset.
#[async_trait]
pub trait DocumentStore: ContentStore {
    async fn read_owner_and_title(
        &self,
        doc_id: &str,
    ) -> Result<Option<(String, String)>, sqlx::Error>;

    async fn collaborator_role(
        &self,
        doc_id: &str,
        user_id: &str,
    ) -> Result<Option<Role>, sqlx::Error>;

    async fn owner_id(&self, doc_id: &str) -> Result<Option<String>, sqlx::Error>;

    async fn create_document(
        &self,
        doc_id: &str,
        content: &str,
        owner_id: &str,
        title: &str,
    ) -> Result<(), sqlx::Error>;

    async fn delete_document(&self, doc_id: &str) -> Result<u64, sqlx::Error>;

    /// Rename a document. Returns the number of rows affected, which is 0
    /// when the document does not exist or the caller is not its owner.
    async fn update_title(
        &self,
        doc_id: &str,
        title: &str,
        owner_id: &str,
    ) -> Result<u64, sqlx::Error>;

    async fn user_by_email(&self, email: &str) -> Result<Option<String>, sqlx::Error>;

    /// Insert or update a collaborator's role.
    async fn add_collaborator(
        &self,
        doc_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), sqlx::Error>;

    /// Documents owned by or shared with a user, most recently updated first.
    async fn documents_by_user(&self, user_id: &str) -> Result<Vec<DocumentRow>, sqlx::Error>;

    async fn document_members(&self, doc_id: &str) -> Result<Vec<CollaboratorInfo>, sqlx::Error>;

    async fn check_access(&self, doc_id: &str, user_id: &str) -> Result<bool, sqlx::Error>;

    async fn add_comment(
        &self,
        doc_id: &str,
        user_id: &str,
        content: &str,
        quote: Option<&str>,
        text_range: Option<&serde_json::Value>,
    ) -> Result<(String, DateTime<Utc>), sqlx::Error>;

    async fn comments(&self, doc_id: &str) -> Result<Vec<CommentResponse>, sqlx::Error>;

    /// Toggle a comment's resolved flag. Permitted to the comment author and
    /// the document owner; returns the comment's document id when a row
    /// matched.
    async fn resolve_comment(
        &self,
        comment_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, sqlx::Error>;

    /// Delete a comment under the same authorization rule as
    /// [`resolve_comment`](DocumentStore::resolve_comment).
    async fn delete_comment(
        &self,
        comment_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, sqlx::Error>;
}

/// Listing row for [`DocumentStore::documents_by_user`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub content: String,
    pub owner_id: String,
}

/// PostgreSQL-backed document store.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContentStore for PgDocumentStore {
    async fn read_content_and_title(
        &self,
        doc_id: &str,
    ) -> Result<Option<(String, String)>, sqlx::Error> {
        let row = sqlx::query("SELECT content, title FROM documents WHERE id = $1")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some((row.try_get("content")?, row.try_get("title")?))),
            None => Ok(None),
        }
    }

    async fn update_content(&self, doc_id: &str, content: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE documents SET content = $1, updated_at = NOW() WHERE id = $2")
            .bind(content)
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn read_owner_and_title(
        &self,
        doc_id: &str,
    ) -> Result<Option<(String, String)>, sqlx::Error> {
        let row = sqlx::query("SELECT owner_id, title FROM documents WHERE id = $1")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some((row.try_get("owner_id")?, row.try_get("title")?))),
            None => Ok(None),
        }
    }

    async fn collaborator_role(
        &self,
        doc_id: &str,
        user_id: &str,
    ) -> Result<Option<Role>, sqlx::Error> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM collaborators WHERE document_id = $1 AND user_id = $2",
        )
        .bind(doc_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role.map(|r| Role::from_db(&r)))
    }

    async fn owner_id(&self, doc_id: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT owner_id FROM documents WHERE id = $1")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn create_document(
        &self,
        doc_id: &str,
        content: &str,
        owner_id: &str,
        title: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO documents (id, content, updated_at, owner_id, title) \
             VALUES ($1, $2, NOW(), $3, $4)",
        )
        .bind(doc_id)
        .bind(content)
        .bind(owner_id)
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_document(&self, doc_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_title(
        &self,
        doc_id: &str,
        title: &str,
        owner_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE documents SET title = $1, updated_at = NOW() \
             WHERE id = $2 AND owner_id = $3",
        )
        .bind(title)
        .bind(doc_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    async fn add_collaborator(
        &self,
        doc_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO collaborators (document_id, user_id, role) VALUES ($1, $2, $3) \
             ON CONFLICT (document_id, user_id) DO UPDATE SET role = $3",
        )
        .bind(doc_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn documents_by_user(&self, user_id: &str) -> Result<Vec<DocumentRow>, sqlx::Error> {
        sqlx::query_as::<_, DocumentRow>(
            "SELECT id, title, updated_at, content, owner_id FROM documents WHERE owner_id = $1 \
             UNION \
             SELECT d.id, d.title, d.updated_at, d.content, d.owner_id \
             FROM documents d JOIN collaborators c ON d.id = c.document_id \
             WHERE c.user_id = $1 \
             ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn document_members(&self, doc_id: &str) -> Result<Vec<CollaboratorInfo>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT u.id, u.email, 'owner' AS role \
             FROM documents d JOIN users u ON d.owner_id = u.id WHERE d.id = $1 \
             UNION ALL \
             SELECT u.id, u.email, c.role \
             FROM collaborators c JOIN users u ON c.user_id = u.id WHERE c.document_id = $1",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        let mut members = Vec::with_capacity(rows.len());
        for row in rows {
            members.push(CollaboratorInfo {
                id: row.try_get("id")?,
                name: row.try_get("email")?,
                role: row.try_get("role")?,
            });
        }
        Ok(members)
    }

    async fn check_access(&self, doc_id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS( \
               SELECT 1 FROM documents WHERE id = $1 AND owner_id = $2 \
               UNION \
               SELECT 1 FROM collaborators WHERE document_id = $1 AND user_id = $2 \
             )",
        )
        .bind(doc_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
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
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            "INSERT INTO comments (id, document_id, user_id, content, quote, text_range, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             RETURNING created_at",
        )
        .bind(&comment_id)
        .bind(doc_id)
        .bind(user_id)
        .bind(content)
        .bind(quote)
        .bind(text_range.map(Json))
        .fetch_one(&self.pool)
        .await?;
        Ok((comment_id, created_at))
    }

    async fn comments(&self, doc_id: &str) -> Result<Vec<CommentResponse>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, document_id, user_id, content, quote, text_range, created_at, is_resolved \
             FROM comments WHERE document_id = $1 ORDER BY created_at ASC",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        let mut comments = Vec::with_capacity(rows.len());
        for row in rows {
            let text_range: Option<Json<serde_json::Value>> = row.try_get("text_range")?;
            comments.push(CommentResponse {
                id: row.try_get("id")?,
                document_id: row.try_get("document_id")?,
                user_id: row.try_get("user_id")?,
                content: row.try_get("content")?,
                quote: row.try_get("quote")?,
                text_range: text_range.map(|j| j.0),
                created_at: row.try_get("created_at")?,
                resolved: row.try_get("is_resolved")?,
            });
        }
        Ok(comments)
    }

    async fn resolve_comment(
        &self,
        comment_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE comments SET is_resolved = NOT is_resolved \
             WHERE id = $1 AND (user_id = $2 OR document_id IN \
               (SELECT id FROM documents WHERE owner_id = $2)) \
             RETURNING document_id",
        )
        .bind(comment_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_comment(
        &self,
        comment_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            "DELETE FROM comments \
             WHERE id = $1 AND (user_id = $2 OR document_id IN \
               (SELECT id FROM documents WHERE owner_id = $2)) \
             RETURNING document_id",
        )
        .bind(comment_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }
}
