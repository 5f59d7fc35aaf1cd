//! Document ingestion.
//!
//! Validates an upload against the free-tier limits, creates the document
//! row in `processing`, stores the original PDF and page rasters, inserts one
//! row per page, and moves the document to `ready`. Any failure after the row
//! exists marks the document `failed` and removes whatever objects were
//! already written. Failed documents do not count toward the workspace limit.
//!
//! Pages normally arrive pre-extracted by the client (text plus an optional
//! JPEG raster). When only the raw PDF is supplied, text is extracted on the
//! server and pages have no raster.

use anyhow::Context;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::documents;
use crate::duplicates::{self, DuplicateReport};
use crate::embed_cmd;
use crate::embedding;
use crate::error::{Error, Result};
use crate::extract;
use crate::models::{now_millis, word_count, Document, DocumentStatus};
use crate::storage::{self, ObjectStore};
use crate::workspace;

/// One client-extracted page.
#[derive(Debug, Clone)]
pub struct PageInput {
    pub page_number: i64,
    pub text: String,
    /// Rendered JPEG bytes, if the client rasterised the page.
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub workspace_id: String,
    pub title: String,
    /// Size reported by the client; the PDF length wins when bytes are sent.
    pub byte_size: Option<i64>,
    pub pdf: Option<Vec<u8>>,
    pub pages: Vec<PageInput>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub document: Document,
    pub pages: usize,
    pub duplicates: DuplicateReport,
}

/// Ingest one document on behalf of `user_id`.
pub async fn ingest_document(
    pool: &SqlitePool,
    store: &dyn ObjectStore,
    config: &Config,
    user_id: &str,
    request: UploadRequest,
) -> Result<IngestOutcome> {
    let limits = &config.limits;
    workspace::require_member(pool, &request.workspace_id, user_id).await?;

    let title = request.title.trim().to_string();
    if title.is_empty() {
        return Err(Error::BadRequest("Title is required".into()));
    }

    let byte_size = match (&request.pdf, request.byte_size) {
        (Some(pdf), _) => pdf.len() as i64,
        (None, Some(size)) => size,
        (None, None) => request.pages.iter().map(|p| p.text.len() as i64).sum(),
    };
    if byte_size > limits.max_document_bytes {
        return Err(Error::BadRequest(format!(
            "File too large. Maximum size is {}MB",
            limits.max_document_bytes / (1024 * 1024)
        )));
    }

    let existing = documents::count_documents(pool, &request.workspace_id).await?;
    if existing >= limits.max_documents_per_workspace {
        return Err(Error::BadRequest(format!(
            "Workspace document limit reached (max {} PDFs per workspace)",
            limits.max_documents_per_workspace
        )));
    }

    let mut pages = if !request.pages.is_empty() {
        request.pages
    } else if let Some(ref pdf) = request.pdf {
        extract_server_side(pdf.clone()).await?
    } else {
        return Err(Error::BadRequest(
            "Either pages or pdfBase64 is required".into(),
        ));
    };
    validate_pages(&mut pages, limits.max_pages_per_document)?;

    let document = Document {
        id: Uuid::new_v4().to_string(),
        workspace_id: request.workspace_id.clone(),
        title,
        byte_size,
        page_count: pages.len() as i64,
        sha256: request.pdf.as_deref().map(hex_sha256),
        status: DocumentStatus::Processing,
        created_at: now_millis(),
    };

    sqlx::query(
        "INSERT INTO documents (id, workspace_id, title, byte_size, page_count, sha256, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&document.id)
    .bind(&document.workspace_id)
    .bind(&document.title)
    .bind(document.byte_size)
    .bind(document.page_count)
    .bind(&document.sha256)
    .bind(document.status.as_str())
    .bind(document.created_at)
    .execute(pool)
    .await?;

    tracing::info!(
        document_id = %document.id,
        workspace_id = %document.workspace_id,
        pages = pages.len(),
        "document created"
    );

    if let Err(e) = store_document(pool, store, &document.id, request.pdf, &pages).await {
        tracing::error!(document_id = %document.id, error = %e, "ingestion failed");
        let removed = documents::remove_objects(store, &document.id).await;
        if removed > 0 {
            tracing::info!(document_id = %document.id, removed, "removed partial objects");
        }
        if let Err(mark) = documents::set_status(pool, &document.id, DocumentStatus::Failed).await {
            tracing::error!(document_id = %document.id, error = %mark, "failed to mark document failed");
        }
        return Err(e);
    }

    let document = Document {
        status: DocumentStatus::Ready,
        ..document
    };
    let duplicates = duplicate_report(pool, &document, &pages).await;

    Ok(IngestOutcome {
        pages: pages.len(),
        document,
        duplicates,
    })
}

async fn extract_server_side(pdf: Vec<u8>) -> Result<Vec<PageInput>> {
    let texts = tokio::task::spawn_blocking(move || extract::extract_pages(&pdf))
        .await
        .map_err(anyhow::Error::from)?
        .map_err(|e| Error::BadRequest(format!("Could not read PDF: {}", e)))?;

    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageInput {
            page_number: i as i64 + 1,
            text,
            image: None,
        })
        .collect())
}

/// Sort pages and check the count and numbering.
fn validate_pages(pages: &mut [PageInput], max_pages: usize) -> Result<()> {
    if pages.is_empty() {
        return Err(Error::BadRequest("Document has no pages".into()));
    }
    if pages.len() > max_pages {
        return Err(Error::BadRequest(format!(
            "PDF has too many pages. Maximum is {} pages",
            max_pages
        )));
    }

    pages.sort_by_key(|p| p.page_number);
    if pages[0].page_number < 1 {
        return Err(Error::BadRequest("Page numbers start at 1".into()));
    }
    if pages.windows(2).any(|w| w[0].page_number == w[1].page_number) {
        return Err(Error::BadRequest("Duplicate page number".into()));
    }
    Ok(())
}

/// Upload objects, insert page rows, and mark the document ready.
async fn store_document(
    pool: &SqlitePool,
    store: &dyn ObjectStore,
    document_id: &str,
    pdf: Option<Vec<u8>>,
    pages: &[PageInput],
) -> Result<()> {
    if let Some(pdf) = pdf {
        store
            .put(&storage::original_pdf_key(document_id), pdf, "application/pdf")
            .await?;
    }

    let mut image_urls = Vec::with_capacity(pages.len());
    for page in pages {
        let url = match page.image {
            Some(ref jpeg) => {
                let key = storage::page_image_key(document_id, page.page_number);
                store.put(&key, jpeg.clone(), "image/jpeg").await?;
                Some(store.public_url(&key))
            }
            None => None,
        };
        image_urls.push(url);
    }

    let now = now_millis();
    let mut tx = pool.begin().await?;
    for (page, image_url) in pages.iter().zip(image_urls) {
        sqlx::query(
            "INSERT INTO pages (id, document_id, page_number, image_url, text, tokens, fingerprint64, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(document_id)
        .bind(page.page_number)
        .bind(image_url)
        .bind(&page.text)
        .bind(word_count(&page.text))
        .bind(duplicates::fingerprint(&page.text, page.page_number))
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
        .bind(DocumentStatus::Ready.as_str())
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

/// Best-effort duplicate check of a freshly ingested document.
async fn duplicate_report(
    pool: &SqlitePool,
    document: &Document,
    pages: &[PageInput],
) -> DuplicateReport {
    let fingerprints: Vec<String> = pages
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| duplicates::fingerprint(&p.text, p.page_number))
        .collect();

    let exact = duplicates::check_for_duplicates(
        pool,
        &document.workspace_id,
        &fingerprints,
        Some(&document.id),
    )
    .await
    .unwrap_or_else(|e| {
        tracing::warn!(document_id = %document.id, error = %e, "duplicate check failed");
        Vec::new()
    });

    let similar = match pages.iter().find(|p| !p.text.trim().is_empty()) {
        Some(first) => duplicates::find_similar_documents(
            pool,
            &document.workspace_id,
            &first.text,
            duplicates::DEFAULT_MIN_SIMILARITY,
            Some(&document.id),
        )
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(document_id = %document.id, error = %e, "similarity check failed");
            Vec::new()
        }),
        None => Vec::new(),
    };

    if !exact.is_empty() || !similar.is_empty() {
        tracing::info!(
            document_id = %document.id,
            duplicates = exact.len(),
            similar = similar.len(),
            "possible duplicate content"
        );
    }

    DuplicateReport {
        duplicates: exact,
        similar,
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ============ CLI ============

/// Upload a PDF from disk with server-side extraction, then index it when
/// an embedding provider is configured.
pub async fn run_upload(
    config: &Config,
    user_id: &str,
    workspace_id: &str,
    path: &std::path::Path,
    title: Option<String>,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let title = title.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    });

    let pool = db::connect(config).await?;
    let store = storage::create_object_store(&config.storage)?;
    let request = UploadRequest {
        workspace_id: workspace_id.to_string(),
        title,
        byte_size: None,
        pdf: Some(bytes),
        pages: Vec::new(),
    };
    let outcome = ingest_document(&pool, store.as_ref(), config, user_id, request).await?;

    println!(
        "Uploaded {} ({}): {} page(s), status {}",
        outcome.document.title, outcome.document.id, outcome.pages, outcome.document.status
    );
    for group in &outcome.duplicates.duplicates {
        for m in &group.matches {
            println!("  duplicate page: {} page {}", m.document_id, m.page_number);
        }
    }
    for similar in &outcome.duplicates.similar {
        println!(
            "  similar: {} ({:.0}% on page {})",
            similar.title,
            similar.similarity * 100.0,
            similar.page
        );
    }

    if config.embedding.is_enabled() {
        let embedder = embedding::create_embedder(&config.embedding)?;
        let indexed = embed_cmd::index_document(
            &pool,
            embedder.as_ref(),
            &config.chunking,
            user_id,
            &outcome.document.id,
        )
        .await?;
        println!(
            "Indexed {} chunk(s) ({} failed), status {}",
            indexed.chunks, indexed.failed, indexed.status
        );
    }

    Ok(())
}
