//! Postgres-backed document store.
//!
//! Conditional updates are a single `UPDATE ... WHERE id = $n AND
//! analysis_status = $m [AND analysis_claim_owner = $k]
//! [AND analysis_attempt_count = $a] RETURNING ...`, so the
//! compare and the write are one atomic statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{
    AnalysisRecord, AnalysisStatus, Document, DocumentId, DocumentPatch, Guard, NewDocument,
};
use crate::store::DocumentStore;

const COLUMNS: &str = "id, filename, content_ref, metadata, analysis_status, analysis_result, analysis_error, analysis_attempt_count, analysis_queued_at, analysis_claimed_at, analysis_claim_deadline, analysis_claim_owner, created_at, updated_at";

#[async_trait]
impl DocumentStore for Db {
    async fn get(&self, id: DocumentId) -> Result<Document> {
        let row: Option<DocumentRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM documents WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("document {id}")))?
            .try_into_document()
    }

    async fn create(&self, new: NewDocument) -> Result<Document> {
        let doc = new.into_document(Utc::now());

        let row: DocumentRow = sqlx::query_as(&format!(
            "INSERT INTO documents (id, filename, content_ref, metadata, analysis_status, analysis_attempt_count, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, 0, $6, $6)
             RETURNING {COLUMNS}"
        ))
        .bind(doc.id.0)
        .bind(&doc.filename)
        .bind(&doc.content_ref)
        .bind(&doc.metadata)
        .bind(AnalysisStatus::None.as_str())
        .bind(doc.created_at)
        .fetch_one(self.pool())
        .await?;

        row.try_into_document()
    }

    async fn update_fields(
        &self,
        id: DocumentId,
        patch: &DocumentPatch,
        guard: Option<&Guard>,
    ) -> Result<Document> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("UPDATE documents SET updated_at = ");
        qb.push_bind(Utc::now());

        if let Some(status) = patch.status {
            qb.push(", analysis_status = ").push_bind(status.as_str());
        }
        if let Some(ref result) = patch.result {
            qb.push(", analysis_result = ").push_bind(result.clone());
        }
        if let Some(ref error) = patch.error {
            qb.push(", analysis_error = ").push_bind(error.clone());
        }
        if patch.increment_attempts {
            qb.push(", analysis_attempt_count = analysis_attempt_count + 1");
        }
        if let Some(queued_at) = patch.queued_at {
            qb.push(", analysis_queued_at = ").push_bind(queued_at);
        }
        if let Some(claimed_at) = patch.claimed_at {
            qb.push(", analysis_claimed_at = ").push_bind(claimed_at);
        }
        if let Some(deadline) = patch.claim_deadline {
            qb.push(", analysis_claim_deadline = ").push_bind(deadline);
        }
        if let Some(ref owner) = patch.claim_owner {
            qb.push(", analysis_claim_owner = ").push_bind(owner.clone());
        }
        if let Some(ref metadata) = patch.metadata {
            qb.push(", metadata = ").push_bind(metadata.clone());
        }

        qb.push(" WHERE id = ").push_bind(id.0);
        if let Some(guard) = guard {
            qb.push(" AND analysis_status = ")
                .push_bind(guard.status.as_str());
            if let Some(ref owner) = guard.claim_owner {
                qb.push(" AND analysis_claim_owner = ").push_bind(owner.clone());
            }
            if let Some(attempt_count) = guard.attempt_count {
                qb.push(" AND analysis_attempt_count = ")
                    .push_bind(attempt_count as i32);
            }
        }
        qb.push(" RETURNING ");
        qb.push(COLUMNS);

        let row: Option<DocumentRow> = qb.build_query_as().fetch_optional(self.pool()).await?;

        match row {
            Some(row) => row.try_into_document(),
            None => {
                // Zero rows: either the document is gone or the guard failed.
                let exists: Option<(Uuid,)> =
                    sqlx::query_as("SELECT id FROM documents WHERE id = $1")
                        .bind(id.0)
                        .fetch_optional(self.pool())
                        .await?;
                if exists.is_some() {
                    Err(Error::Conflict(id.to_string()))
                } else {
                    Err(Error::NotFound(format!("document {id}")))
                }
            }
        }
    }

    async fn delete(&self, id: DocumentId) -> Result<()> {
        let rows_affected = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("document {id}")));
        }
        Ok(())
    }

    async fn oldest_pending(&self, limit: usize) -> Result<Vec<Document>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM documents
             WHERE analysis_status = 'pending'
             ORDER BY analysis_queued_at ASC, id ASC
             LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(DocumentRow::try_into_document).collect()
    }

    async fn expired_claims(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Document>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM documents
             WHERE analysis_status = 'in_progress' AND analysis_claim_deadline <= $1
             ORDER BY analysis_claim_deadline ASC
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(DocumentRow::try_into_document).collect()
    }

    async fn list(&self, limit: usize) -> Result<Vec<Document>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM documents ORDER BY created_at DESC, id ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(DocumentRow::try_into_document).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    filename: String,
    content_ref: String,
    metadata: serde_json::Value,
    analysis_status: String,
    analysis_result: Option<serde_json::Value>,
    analysis_error: Option<String>,
    analysis_attempt_count: i32,
    analysis_queued_at: Option<DateTime<Utc>>,
    analysis_claimed_at: Option<DateTime<Utc>>,
    analysis_claim_deadline: Option<DateTime<Utc>>,
    analysis_claim_owner: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn try_into_document(self) -> Result<Document> {
        Ok(Document {
            id: DocumentId(self.id),
            filename: self.filename,
            content_ref: self.content_ref,
            metadata: self.metadata,
            analysis: AnalysisRecord {
                status: self.analysis_status.parse()?,
                result: self.analysis_result,
                error: self.analysis_error,
                attempt_count: self.analysis_attempt_count as u32,
                queued_at: self.analysis_queued_at,
                claimed_at: self.analysis_claimed_at,
                claim_deadline: self.analysis_claim_deadline,
                claim_owner: self.analysis_claim_owner,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
