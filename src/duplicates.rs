//! Duplicate and near-duplicate page detection.
//!
//! Exact duplicates are found through `pages.fingerprint64`; near duplicates
//! through word-set Jaccard similarity against the pages of indexed
//! documents. Both are single-pass scans of the workspace.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::workspace;

/// Default floor for [`find_similar_documents`].
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.7;

/// First 64 bits of SHA-256 over the page text, as 16 hex chars.
///
/// Blank pages hash `page-{n}` instead, so empty pages of different
/// documents do not all collide.
pub fn fingerprint(text: &str, page_number: i64) -> String {
    let mut hasher = Sha256::new();
    if text.trim().is_empty() {
        hasher.update(format!("page-{}", page_number).as_bytes());
    } else {
        hasher.update(text.as_bytes());
    }
    hex::encode(&hasher.finalize()[..8])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRef {
    pub document_id: String,
    pub page_number: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub fingerprint: String,
    pub matches: Vec<PageRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarDocument {
    pub document_id: String,
    pub title: String,
    pub similarity: f64,
    pub page: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub duplicates: Vec<DuplicateGroup>,
    pub similar: Vec<SimilarDocument>,
}

/// Pages in `workspace_id` whose fingerprint is one of `fingerprints`.
///
/// Groups come back in request order, one per fingerprint that matched.
/// Pages of `exclude_document` are ignored.
pub async fn check_for_duplicates(
    pool: &SqlitePool,
    workspace_id: &str,
    fingerprints: &[String],
    exclude_document: Option<&str>,
) -> Result<Vec<DuplicateGroup>> {
    let mut wanted: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for fp in fingerprints {
        if seen.insert(fp.as_str()) {
            wanted.push(fp.as_str());
        }
    }
    if wanted.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT p.fingerprint64, p.document_id, p.page_number
         FROM pages p JOIN documents d ON d.id = p.document_id
         WHERE d.workspace_id = ",
    );
    query.push_bind(workspace_id);
    if let Some(doc) = exclude_document {
        query.push(" AND d.id <> ").push_bind(doc);
    }
    query.push(" AND p.fingerprint64 IN (");
    let mut separated = query.separated(", ");
    for fp in &wanted {
        separated.push_bind(*fp);
    }
    separated.push_unseparated(") ORDER BY d.created_at, p.document_id, p.page_number");

    let rows = query.build().fetch_all(pool).await?;

    let mut by_fingerprint: HashMap<String, Vec<PageRef>> = HashMap::new();
    for row in &rows {
        by_fingerprint
            .entry(row.get("fingerprint64"))
            .or_default()
            .push(PageRef {
                document_id: row.get("document_id"),
                page_number: row.get("page_number"),
            });
    }

    Ok(wanted
        .into_iter()
        .filter_map(|fp| {
            by_fingerprint.remove(fp).map(|matches| DuplicateGroup {
                fingerprint: fp.to_string(),
                matches,
            })
        })
        .collect())
}

/// Jaccard index of the lowercased whitespace-separated word sets.
///
/// Two texts without words score `0.0`.
pub fn calculate_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();

    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    intersection as f64 / union as f64
}

/// Indexed documents with a page at least `min_similarity` similar to `text`.
///
/// Each document is reported once, with its best-scoring page; results are
/// sorted by similarity descending.
pub async fn find_similar_documents(
    pool: &SqlitePool,
    workspace_id: &str,
    text: &str,
    min_similarity: f64,
    exclude_document: Option<&str>,
) -> Result<Vec<SimilarDocument>> {
    let rows = sqlx::query(
        "SELECT d.id AS document_id, d.title, p.page_number, p.text
         FROM documents d JOIN pages p ON p.document_id = d.id
         WHERE d.workspace_id = ? AND d.status = 'indexed'
         ORDER BY d.created_at, d.id, p.page_number",
    )
    .bind(workspace_id)
    .fetch_all(pool)
    .await?;

    let mut best: Vec<SimilarDocument> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in &rows {
        let document_id: String = row.get("document_id");
        if exclude_document == Some(document_id.as_str()) {
            continue;
        }
        let page_text: Option<String> = row.get("text");
        let Some(page_text) = page_text.filter(|t| !t.is_empty()) else {
            continue;
        };

        let similarity = calculate_similarity(text, &page_text);
        let page: i64 = row.get("page_number");

        match index.get(&document_id) {
            Some(&i) => {
                if similarity > best[i].similarity {
                    best[i].similarity = similarity;
                    best[i].page = page;
                }
            }
            None => {
                index.insert(document_id.clone(), best.len());
                best.push(SimilarDocument {
                    document_id,
                    title: row.get("title"),
                    similarity,
                    page,
                });
            }
        }
    }

    best.retain(|d| d.similarity >= min_similarity);
    best.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(best)
}

pub async fn run_similar(
    config: &Config,
    user_id: &str,
    workspace_id: &str,
    text: &str,
    min_similarity: f64,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    workspace::require_member(&pool, workspace_id, user_id).await?;

    let similar = find_similar_documents(&pool, workspace_id, text, min_similarity, None).await?;
    if similar.is_empty() {
        println!("No similar documents.");
        return Ok(());
    }
    for (i, s) in similar.iter().enumerate() {
        println!("{}. [{:.2}] {} (page {})", i + 1, s.similarity, s.title, s.page);
        println!("    id: {}", s.document_id);
    }
    Ok(())
}
