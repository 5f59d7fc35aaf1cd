//! Document and page reads, status transitions, and document deletion.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{Document, DocumentStatus, Page};
use crate::storage::{self, ObjectStore};

/// Document plus its pages, ordered by page number.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWithPages {
    #[serde(flatten)]
    pub document: Document,
    pub pages: Vec<Page>,
}

const DOCUMENT_COLUMNS: &str =
    "id, workspace_id, title, byte_size, page_count, sha256, status, created_at";

pub(crate) fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        title: row.get("title"),
        byte_size: row.get("byte_size"),
        page_count: row.get("page_count"),
        sha256: row.get("sha256"),
        status: status.parse()?,
        created_at: row.get("created_at"),
    })
}

pub(crate) fn page_from_row(row: &SqliteRow) -> Page {
    Page {
        id: row.get("id"),
        document_id: row.get("document_id"),
        page_number: row.get("page_number"),
        image_url: row.get("image_url"),
        text: row.get("text"),
        tokens: row.get("tokens"),
        fingerprint64: row.get("fingerprint64"),
    }
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Document> {
    let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound("Document not found".into()))?;

    document_from_row(&row)
}

/// Documents in a workspace, newest first.
pub async fn list_documents(pool: &SqlitePool, workspace_id: &str) -> Result<Vec<Document>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM documents WHERE workspace_id = ? ORDER BY created_at DESC, rowid DESC",
        DOCUMENT_COLUMNS
    ))
    .bind(workspace_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(document_from_row).collect()
}

/// Documents that count toward the workspace limit. Failed uploads do not.
pub async fn count_documents(pool: &SqlitePool, workspace_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents WHERE workspace_id = ? AND status <> 'failed'",
    )
    .bind(workspace_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn list_pages(pool: &SqlitePool, document_id: &str) -> Result<Vec<Page>> {
    let rows = sqlx::query(
        "SELECT id, document_id, page_number, image_url, text, tokens, fingerprint64
         FROM pages WHERE document_id = ? ORDER BY page_number ASC",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(page_from_row).collect())
}

pub async fn get_document_with_pages(pool: &SqlitePool, id: &str) -> Result<DocumentWithPages> {
    let document = get_document(pool, id).await?;
    let pages = list_pages(pool, id).await?;
    Ok(DocumentWithPages { document, pages })
}

pub async fn set_status(pool: &SqlitePool, id: &str, status: DocumentStatus) -> Result<()> {
    sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete every stored object under `{document_id}/`.
///
/// Failures are logged and skipped. Returns how many objects were removed.
pub async fn remove_objects(store: &dyn ObjectStore, document_id: &str) -> usize {
    let keys = match store.list(&storage::document_prefix(document_id)).await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(document_id, error = %e, "failed to list stored objects");
            return 0;
        }
    };

    let mut removed = 0;
    for key in keys {
        match store.delete(&key).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(document_id, key = %key, error = %e, "failed to delete object"),
        }
    }
    removed
}

/// Delete a document with its pages, chunks and stored objects.
pub async fn delete_document(
    pool: &SqlitePool,
    store: &dyn ObjectStore,
    document_id: &str,
) -> Result<()> {
    let removed = remove_objects(store, document_id).await;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM chunks WHERE page_id IN (SELECT id FROM pages WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM pages WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    if deleted.rows_affected() == 0 {
        return Err(Error::NotFound("Document not found".into()));
    }

    tracing::info!(document_id, objects = removed, "document deleted");
    Ok(())
}
