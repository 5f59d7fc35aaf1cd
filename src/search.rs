//! Retrieval and context assembly.
//!
//! [`match_chunks`] is a brute-force nearest-neighbour scan: every embedded
//! chunk of the workspace is loaded and scored with cosine similarity in
//! Rust. [`assemble_context`] turns hits into prompt context, falling back to
//! the first pages of each ready document when search yields nothing.

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::RetrievalConfig;
use crate::embedding::{self, Embedder};
use crate::error::Result;

/// One chunk scored against a query embedding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub page_id: String,
    pub seq: i64,
    pub text: String,
    pub similarity: f32,
    pub document_id: String,
    pub document_title: String,
    pub page_number: i64,
}

/// Chunks of `workspace_id` with similarity above `match_threshold`, best
/// first, at most `match_count`.
pub async fn match_chunks(
    pool: &SqlitePool,
    query_embedding: &[f32],
    workspace_id: &str,
    match_threshold: f32,
    match_count: usize,
) -> Result<Vec<ChunkMatch>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.page_id, c.seq, c.text, c.embedding,
               p.page_number, d.id AS document_id, d.title
        FROM chunks c
        JOIN pages p ON p.id = c.page_id
        JOIN documents d ON d.id = p.document_id
        WHERE d.workspace_id = ? AND c.embedding IS NOT NULL
        "#,
    )
    .bind(workspace_id)
    .fetch_all(pool)
    .await?;

    let mut matches: Vec<ChunkMatch> = rows
        .iter()
        .filter_map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let similarity = embedding::cosine_similarity(query_embedding, &vec);
            (similarity > match_threshold).then(|| ChunkMatch {
                chunk_id: row.get("chunk_id"),
                page_id: row.get("page_id"),
                seq: row.get("seq"),
                text: row.get("text"),
                similarity,
                document_id: row.get("document_id"),
                document_title: row.get("title"),
                page_number: row.get("page_number"),
            })
        })
        .collect();

    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(match_count);

    Ok(matches)
}

/// `true` when at least one chunk in the workspace carries an embedding.
pub async fn has_embedded_chunks(pool: &SqlitePool, workspace_id: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM chunks c
        JOIN pages p ON p.id = c.page_id
        JOIN documents d ON d.id = p.document_id
        WHERE d.workspace_id = ? AND c.embedding IS NOT NULL
        LIMIT 1
        "#,
    )
    .bind(workspace_id)
    .fetch_optional(pool)
    .await?;

    Ok(found.is_some())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    Vector,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub text: String,
    /// `[{title}, Page {n}]` citations, deduplicated, in first-seen order.
    pub sources: Vec<String>,
    pub mode: ContextMode,
}

fn cite(sources: &mut Vec<String>, title: &str, page_number: i64) {
    let citation = format!("[{}, Page {}]", title, page_number);
    if !sources.contains(&citation) {
        sources.push(citation);
    }
}

/// Build prompt context for `message`.
///
/// Vector search runs only when the workspace has embedded chunks. Embedding
/// and search errors are logged and treated like an empty result.
pub async fn assemble_context(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    retrieval: &RetrievalConfig,
    workspace_id: &str,
    message: &str,
) -> Result<ContextBundle> {
    let hits = if has_embedded_chunks(pool, workspace_id).await? {
        match vector_hits(pool, embedder, retrieval, workspace_id, message).await {
            Ok(hits) => {
                tracing::debug!(workspace_id, hits = hits.len(), "vector search");
                hits
            }
            Err(e) => {
                tracing::warn!(workspace_id, error = %e, "vector search failed, using fallback");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    if hits.is_empty() {
        return fallback_context(pool, retrieval, workspace_id).await;
    }

    let mut text = String::new();
    let mut sources = Vec::new();
    for hit in &hits {
        cite(&mut sources, &hit.document_title, hit.page_number);
        text.push_str(&format!(
            "\n\n---\nSource: {}, Page {}\n{}",
            hit.document_title, hit.page_number, hit.text
        ));
    }

    Ok(ContextBundle {
        text,
        sources,
        mode: ContextMode::Vector,
    })
}

async fn vector_hits(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    retrieval: &RetrievalConfig,
    workspace_id: &str,
    message: &str,
) -> Result<Vec<ChunkMatch>> {
    let query_vec = embedder.embed(message).await?;
    match_chunks(
        pool,
        &query_vec,
        workspace_id,
        retrieval.match_threshold,
        retrieval.match_count,
    )
    .await
}

/// Raw-page context: the first pages of every ready or indexed document.
pub async fn fallback_context(
    pool: &SqlitePool,
    retrieval: &RetrievalConfig,
    workspace_id: &str,
) -> Result<ContextBundle> {
    let rows = sqlx::query(
        r#"
        SELECT d.title, p.page_number, p.text, p.image_url
        FROM documents d
        JOIN pages p ON p.document_id = d.id
        WHERE d.workspace_id = ? AND d.status IN ('ready', 'indexed')
          AND p.page_number IN (
              SELECT page_number FROM pages
              WHERE document_id = d.id
              ORDER BY page_number
              LIMIT ?)
        ORDER BY d.created_at, d.rowid, p.page_number
        "#,
    )
    .bind(workspace_id)
    .bind(retrieval.fallback_pages_per_document)
    .fetch_all(pool)
    .await?;

    let mut text = String::new();
    let mut sources = Vec::new();

    for row in &rows {
        let title: String = row.get("title");
        let page_number: i64 = row.get("page_number");
        let page_text: Option<String> = row.get("text");
        let image_url: Option<String> = row.get("image_url");

        cite(&mut sources, &title, page_number);
        text.push_str(&format!("\n\n---\nSource: {}, Page {}\n", title, page_number));

        match page_text.as_deref() {
            Some(t) if t.chars().count() > 10 => {
                let (excerpt, truncated) = truncate_chars(t, retrieval.fallback_page_chars);
                text.push_str("Text content:\n");
                text.push_str(excerpt);
                if truncated {
                    text.push_str("...");
                }
                text.push('\n');
            }
            _ => text.push_str("[This page appears to be image-based or scanned content]\n"),
        }

        if let Some(url) = image_url {
            text.push_str(&format!("Page snapshot available at: {}\n", url));
        }
    }

    Ok(ContextBundle {
        text,
        sources,
        mode: ContextMode::Fallback,
    })
}

/// Document previews for the lightweight chat: every document with up to
/// `preview_chars` of its concatenated page text.
pub async fn preview_context(
    pool: &SqlitePool,
    preview_chars: usize,
    workspace_id: &str,
) -> Result<String> {
    let docs = crate::documents::list_documents(pool, workspace_id).await?;
    if docs.is_empty() {
        return Ok("No documents have been uploaded to this workspace yet.".to_string());
    }

    let mut context = String::from("You have access to the following PDF documents:\n\n");
    for doc in docs.iter().rev() {
        let pages = crate::documents::list_pages(pool, &doc.id).await?;
        let content = pages
            .iter()
            .filter_map(|p| p.text.as_deref())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        context.push_str(&format!("Document: {}\n", doc.title));
        if !content.is_empty() {
            let (preview, _) = truncate_chars(&content, preview_chars);
            context.push_str(&format!("Content preview: {}...\n\n", preview));
        }
    }
    context.push_str(
        "\nBased on these documents, please answer the user's question. If the documents don't contain enough detail, explain what information is available and what might be missing.",
    );

    Ok(context)
}

/// First `max_chars` chars of `s`, and whether anything was cut.
fn truncate_chars(s: &str, max_chars: usize) -> (&str, bool) {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}
