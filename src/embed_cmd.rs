//! Chunk embedding for one document.
//!
//! Pages are chunked and each chunk is embedded with its own provider call,
//! strictly in sequence. A chunk whose embedding fails is logged and left
//! out; the rest are stored. The document becomes `indexed` only when at
//! least one chunk was stored, otherwise it keeps its current status.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::chunk::chunk_page;
use crate::config::{ChunkingConfig, Config};
use crate::db;
use crate::documents;
use crate::embedding::{self, Embedder};
use crate::error::{Error, Result};
use crate::models::{now_millis, Chunk, DocumentStatus};
use crate::workspace;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOutcome {
    pub success: bool,
    /// Chunks stored with an embedding.
    pub chunks: usize,
    /// Chunks whose embedding call failed.
    pub failed: usize,
    pub status: DocumentStatus,
}

/// Re-chunk and embed `document_id`, replacing any chunks it already has.
pub async fn index_document(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    chunking: &ChunkingConfig,
    user_id: &str,
    document_id: &str,
) -> Result<IndexOutcome> {
    let document = documents::get_document(pool, document_id).await?;
    workspace::require_member(pool, &document.workspace_id, user_id).await?;

    let pages = documents::list_pages(pool, document_id).await?;
    if pages.is_empty() {
        return Err(Error::NotFound("No pages found".into()));
    }

    let mut embedded: Vec<Chunk> = Vec::new();
    let mut failed = 0;

    for page in &pages {
        let Some(text) = page.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            continue;
        };

        for mut chunk in chunk_page(&page.id, text, chunking.chunk_chars, chunking.overlap_chars) {
            match embedder.embed(&chunk.text).await {
                Ok(vector) => {
                    chunk.embedding = Some(vector);
                    embedded.push(chunk);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        document_id,
                        page = page.page_number,
                        seq = chunk.seq,
                        error = %e,
                        "embedding failed, chunk skipped"
                    );
                }
            }
        }
    }

    let now = now_millis();
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM chunks WHERE page_id IN (SELECT id FROM pages WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    for chunk in &embedded {
        let blob = chunk.embedding.as_deref().map(embedding::vec_to_blob);
        sqlx::query(
            "INSERT INTO chunks (id, page_id, seq, text, embedding, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.page_id)
        .bind(chunk.seq)
        .bind(&chunk.text)
        .bind(blob)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    let status = if embedded.is_empty() {
        document.status
    } else {
        sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(DocumentStatus::Indexed.as_str())
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        DocumentStatus::Indexed
    };
    tx.commit().await?;

    tracing::info!(
        document_id,
        chunks = embedded.len(),
        failed,
        status = %status,
        "document indexed"
    );

    Ok(IndexOutcome {
        success: true,
        chunks: embedded.len(),
        failed,
        status,
    })
}

pub async fn run_embed(config: &Config, user_id: &str, document_id: &str) -> anyhow::Result<()> {
    if !config.embedding.is_enabled() {
        anyhow::bail!("Embedding provider is disabled. Set [embedding].provider in config.");
    }
    let pool = db::connect(config).await?;
    let embedder = embedding::create_embedder(&config.embedding)?;
    let outcome =
        index_document(&pool, embedder.as_ref(), &config.chunking, user_id, document_id).await?;

    println!("Embedding complete:");
    println!("  chunks stored:  {}", outcome.chunks);
    println!("  chunks failed:  {}", outcome.failed);
    println!("  status:         {}", outcome.status);
    Ok(())
}
