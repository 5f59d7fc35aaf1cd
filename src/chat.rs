//! Workspace chat.
//!
//! A chat turn checks membership, reserves one call of the daily quota,
//! assembles context, asks the chat model, then records both messages. A
//! failed model call gives its reservation back.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, Embedder};
use crate::error::{Error, Result};
use crate::llm::{self, ChatModel};
use crate::models::{now_millis, word_count, Message, MessageRole};
use crate::search::{self, ContextBundle, ContextMode};
use crate::usage;
use crate::workspace;

pub const SYSTEM_PROMPT: &str = "You are a professional assistant specialized in analyzing and answering questions about PDFs.
You can analyze both text content and images from PDF pages.
Provide comprehensive, detailed answers based on the document content provided.
Be thorough in your analysis while maintaining accuracy.

Rules:
- Use ALL the provided context (text and/or images) to give complete answers
- If images are provided, analyze them carefully for any text, diagrams, or visual information
- When analyzing resumes or documents, provide detailed feedback covering all aspects
- Include specific examples and quotes from the text when relevant
- For evaluation questions, provide structured analysis with strengths, weaknesses, and suggestions
- If the pages appear to be scanned or image-based, mention this and still provide analysis based on what you can see
- Cite sources at the END of your response, not inline
- If asked to analyze quality, provide professional assessment with actionable feedback";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub sources: Vec<String>,
    pub context_mode: ContextMode,
}

/// Everything a chat turn needs besides its arguments.
pub struct ChatDeps<'a> {
    pub pool: &'a SqlitePool,
    pub embedder: &'a dyn Embedder,
    pub model: &'a dyn ChatModel,
    pub config: &'a Config,
}

pub fn build_prompt(context: &ContextBundle, message: &str) -> String {
    if !context.text.is_empty() {
        return format!(
            "{}\n\nContext from documents:\n{}\n\nUser Question: {}\n\nPlease provide a helpful answer based on the context above.",
            SYSTEM_PROMPT, context.text, message
        );
    }

    let titles = if context.sources.is_empty() {
        "documents in the workspace".to_string()
    } else {
        context.sources.join(", ")
    };
    format!(
        "You are a helpful assistant. The user has uploaded PDFs to this workspace but is asking: \"{}\".\n\nBased on the available document titles: {}, provide a helpful response. If you cannot answer the specific question, explain what kind of information is available in the documents.",
        message, titles
    )
}

fn validate(workspace_id: &str, message: &str) -> Result<()> {
    if workspace_id.trim().is_empty() || message.trim().is_empty() {
        return Err(Error::BadRequest("Missing required fields".into()));
    }
    Ok(())
}

/// Answer `message` from the workspace's documents.
pub async fn chat(
    deps: &ChatDeps<'_>,
    user_id: &str,
    workspace_id: &str,
    message: &str,
) -> Result<ChatReply> {
    validate(workspace_id, message)?;
    workspace::require_member(deps.pool, workspace_id, user_id).await?;
    usage::reserve_call(deps.pool, user_id, deps.config.limits.daily_api_calls).await?;

    let reply = match answer(deps, workspace_id, message).await {
        Ok(reply) => reply,
        Err(e) => {
            usage::release_call(deps.pool, user_id).await;
            return Err(e);
        }
    };

    record_turn(deps.pool, workspace_id, user_id, message, &reply.response).await?;
    Ok(reply)
}

async fn answer(deps: &ChatDeps<'_>, workspace_id: &str, message: &str) -> Result<ChatReply> {
    let context = search::assemble_context(
        deps.pool,
        deps.embedder,
        &deps.config.retrieval,
        workspace_id,
        message,
    )
    .await?;
    tracing::info!(
        workspace_id,
        mode = ?context.mode,
        sources = context.sources.len(),
        "context assembled"
    );

    let prompt = build_prompt(&context, message);
    let text = generate(deps, workspace_id, &prompt).await?;

    let response = if context.sources.is_empty() {
        text
    } else {
        format!("{}\n\n**Sources:** {}", text, context.sources.join(", "))
    };

    Ok(ChatReply {
        response,
        sources: context.sources,
        context_mode: context.mode,
    })
}

async fn generate(deps: &ChatDeps<'_>, workspace_id: &str, prompt: &str) -> Result<String> {
    deps.model.generate(prompt).await.map_err(|e| {
        tracing::error!(workspace_id, error = %format!("{:#}", e), "chat model call failed");
        Error::Internal(e)
    })
}

/// Lightweight chat over document previews; no retrieval.
pub async fn chat_simple(
    deps: &ChatDeps<'_>,
    user_id: &str,
    workspace_id: &str,
    message: &str,
) -> Result<String> {
    validate(workspace_id, message)?;
    workspace::require_member(deps.pool, workspace_id, user_id).await?;
    usage::reserve_call(deps.pool, user_id, deps.config.limits.daily_api_calls).await?;

    let context =
        match search::preview_context(deps.pool, deps.config.retrieval.preview_chars, workspace_id)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                usage::release_call(deps.pool, user_id).await;
                return Err(e);
            }
        };
    let prompt = format!(
        "You are a helpful assistant for a PDF chatbot application.\n\nContext: {}\n\nUser Question: {}\n\nPlease provide a helpful response based on the documents described above.",
        context, message
    );

    let response = match generate(deps, workspace_id, &prompt).await {
        Ok(response) => response,
        Err(e) => {
            usage::release_call(deps.pool, user_id).await;
            return Err(e);
        }
    };

    record_turn(deps.pool, workspace_id, user_id, message, &response).await?;
    Ok(response)
}

/// Store the user and assistant messages and their token counts.
async fn record_turn(
    pool: &SqlitePool,
    workspace_id: &str,
    user_id: &str,
    message: &str,
    response: &str,
) -> Result<()> {
    let now = now_millis();
    let mut tx = pool.begin().await?;
    for (author, role, text) in [
        (Some(user_id), MessageRole::User, message),
        (None, MessageRole::Assistant, response),
    ] {
        sqlx::query(
            "INSERT INTO messages (id, workspace_id, user_id, role, content, token_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(workspace_id)
        .bind(author)
        .bind(role.as_str())
        .bind(serde_json::json!({ "text": text }).to_string())
        .bind(word_count(text))
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    usage::record_tokens(pool, user_id, word_count(message), word_count(response)).await
}

/// The most recent `limit` messages of a workspace, oldest first.
pub async fn list_messages(
    pool: &SqlitePool,
    user_id: &str,
    workspace_id: &str,
    limit: i64,
) -> Result<Vec<Message>> {
    workspace::require_member(pool, workspace_id, user_id).await?;

    let rows = sqlx::query(
        "SELECT id, workspace_id, user_id, role, content, token_count, created_at
         FROM messages WHERE workspace_id = ?
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?",
    )
    .bind(workspace_id)
    .bind(limit.max(1))
    .fetch_all(pool)
    .await?;

    let mut messages = rows
        .iter()
        .map(|row| -> Result<Message> {
            let role: String = row.get("role");
            let content: String = row.get("content");
            Ok(Message {
                id: row.get("id"),
                workspace_id: row.get("workspace_id"),
                user_id: row.get("user_id"),
                role: role.parse()?,
                content: serde_json::from_str(&content).map_err(anyhow::Error::from)?,
                token_count: row.get("token_count"),
                created_at: row.get("created_at"),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    messages.reverse();
    Ok(messages)
}

// ============ CLI ============

pub async fn run_ask(
    config: &Config,
    user_id: &str,
    workspace_id: &str,
    message: &str,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let embedder = embedding::create_embedder(&config.embedding)?;
    let model = llm::create_chat_model(&config.chat)?;
    let deps = ChatDeps {
        pool: &pool,
        embedder: embedder.as_ref(),
        model: model.as_ref(),
        config,
    };

    let reply = chat(&deps, user_id, workspace_id, message).await?;
    println!("{}", reply.response);

    let used = usage::api_calls(&pool, user_id, &usage::today_key()).await?;
    eprintln!(
        "[{:?} context, {}/{} calls today]",
        reply.context_mode, used, config.limits.daily_api_calls
    );
    Ok(())
}
