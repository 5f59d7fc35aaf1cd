//! Workspaces, membership checks, and workspace teardown.
//!
//! Every workspace has exactly one owner, recorded both as
//! `workspaces.owner_id` and as an `owner` row in `workspace_members`.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::documents;
use crate::error::{Error, Result};
use crate::models::{now_millis, MemberRole, Workspace, WorkspaceMembership};
use crate::storage::{self, ObjectStore};

fn workspace_from_row(row: &SqliteRow) -> Workspace {
    Workspace {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        plan: row.get("plan"),
        created_at: row.get("created_at"),
    }
}

/// Create a free-plan workspace owned by `owner_id`.
pub async fn create_workspace(pool: &SqlitePool, owner_id: &str, name: &str) -> Result<Workspace> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest("Workspace name is required".into()));
    }

    let workspace = Workspace {
        id: Uuid::new_v4().to_string(),
        owner_id: owner_id.to_string(),
        name: name.to_string(),
        plan: "free".to_string(),
        created_at: now_millis(),
    };

    let mut tx = pool.begin().await?;
    sqlx::query("INSERT INTO workspaces (id, owner_id, name, plan, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&workspace.id)
        .bind(&workspace.owner_id)
        .bind(&workspace.name)
        .bind(&workspace.plan)
        .bind(workspace.created_at)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO workspace_members (workspace_id, user_id, role, created_at) VALUES (?, ?, 'owner', ?)",
    )
    .bind(&workspace.id)
    .bind(owner_id)
    .bind(workspace.created_at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(workspace_id = %workspace.id, owner_id, "workspace created");
    Ok(workspace)
}

pub async fn get_workspace(pool: &SqlitePool, id: &str) -> Result<Workspace> {
    let row = sqlx::query("SELECT id, owner_id, name, plan, created_at FROM workspaces WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound("Workspace not found".into()))?;
    Ok(workspace_from_row(&row))
}

/// Workspaces `user_id` belongs to, newest first.
pub async fn list_for_user(pool: &SqlitePool, user_id: &str) -> Result<Vec<WorkspaceMembership>> {
    let rows = sqlx::query(
        "SELECT w.id, w.owner_id, w.name, w.plan, w.created_at, m.role
         FROM workspace_members m
         JOIN workspaces w ON w.id = m.workspace_id
         WHERE m.user_id = ?
         ORDER BY w.created_at DESC, w.rowid DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<WorkspaceMembership> {
            let role: String = row.get("role");
            Ok(WorkspaceMembership {
                workspace: workspace_from_row(row),
                role: role.parse()?,
            })
        })
        .collect()
}

pub async fn member_role(
    pool: &SqlitePool,
    workspace_id: &str,
    user_id: &str,
) -> Result<Option<MemberRole>> {
    let role: Option<String> = sqlx::query_scalar(
        "SELECT role FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
    )
    .bind(workspace_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(role.map(|r| r.parse::<MemberRole>()).transpose()?)
}

/// 404 for an unknown workspace, 403 when `user_id` is not a member.
pub async fn require_member(
    pool: &SqlitePool,
    workspace_id: &str,
    user_id: &str,
) -> Result<MemberRole> {
    get_workspace(pool, workspace_id).await?;
    member_role(pool, workspace_id, user_id)
        .await?
        .ok_or_else(|| Error::Forbidden("Access denied".into()))
}

async fn require_owner(
    pool: &SqlitePool,
    workspace_id: &str,
    user_id: &str,
    denied: &str,
) -> Result<Workspace> {
    let workspace = get_workspace(pool, workspace_id).await?;
    if workspace.owner_id != user_id {
        return Err(Error::Forbidden(denied.to_string()));
    }
    Ok(workspace)
}

/// Add `user_id` to a workspace. Only the owner may add members.
pub async fn add_member(
    pool: &SqlitePool,
    workspace_id: &str,
    actor_id: &str,
    user_id: &str,
    role: MemberRole,
) -> Result<()> {
    require_owner(
        pool,
        workspace_id,
        actor_id,
        "Only workspace owner can add members",
    )
    .await?;

    if user_id.trim().is_empty() {
        return Err(Error::BadRequest("userId is required".into()));
    }
    if role == MemberRole::Owner {
        return Err(Error::BadRequest("A workspace has exactly one owner".into()));
    }
    if member_role(pool, workspace_id, user_id).await?.is_some() {
        return Err(Error::BadRequest("User is already a member".into()));
    }

    sqlx::query(
        "INSERT INTO workspace_members (workspace_id, user_id, role, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(workspace_id)
    .bind(user_id)
    .bind(role.as_str())
    .bind(now_millis())
    .execute(pool)
    .await?;

    tracing::info!(workspace_id, user_id, "member added");
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDeletion {
    pub documents: usize,
    pub objects: usize,
}

/// Owner-only teardown of a workspace and everything under it.
///
/// Stored objects go first, then chunks, pages, messages, documents and
/// members. Failures along the way are logged and the teardown continues;
/// only the final delete of the workspace row is fatal.
pub async fn delete_workspace(
    pool: &SqlitePool,
    store: &dyn ObjectStore,
    workspace_id: &str,
    user_id: &str,
) -> Result<WorkspaceDeletion> {
    require_owner(
        pool,
        workspace_id,
        user_id,
        "Only workspace owner can delete workspace",
    )
    .await?;

    let document_ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE workspace_id = ?")
            .bind(workspace_id)
            .fetch_all(pool)
            .await?;

    let mut objects = 0;
    for document_id in &document_ids {
        objects += documents::remove_objects(store, document_id).await;
    }

    let steps: [(&str, &str); 5] = [
        (
            "chunks",
            "DELETE FROM chunks WHERE page_id IN (
                SELECT p.id FROM pages p JOIN documents d ON d.id = p.document_id
                WHERE d.workspace_id = ?)",
        ),
        (
            "pages",
            "DELETE FROM pages WHERE document_id IN (SELECT id FROM documents WHERE workspace_id = ?)",
        ),
        ("messages", "DELETE FROM messages WHERE workspace_id = ?"),
        ("documents", "DELETE FROM documents WHERE workspace_id = ?"),
        ("members", "DELETE FROM workspace_members WHERE workspace_id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = sqlx::query(sql).bind(workspace_id).execute(pool).await {
            tracing::error!(workspace_id, table, error = %e, "failed to delete workspace rows");
        }
    }

    sqlx::query("DELETE FROM workspaces WHERE id = ?")
        .bind(workspace_id)
        .execute(pool)
        .await?;

    tracing::info!(
        workspace_id,
        documents = document_ids.len(),
        objects,
        "workspace deleted"
    );
    Ok(WorkspaceDeletion {
        documents: document_ids.len(),
        objects,
    })
}

// ============ CLI ============

pub async fn run_create(config: &Config, user_id: &str, name: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let ws = create_workspace(&pool, user_id, name).await?;
    println!("Created workspace {} ({})", ws.name, ws.id);
    Ok(())
}

pub async fn run_list(config: &Config, user_id: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let memberships = list_for_user(&pool, user_id).await?;
    if memberships.is_empty() {
        println!("No workspaces.");
        return Ok(());
    }

    for m in &memberships {
        let docs = documents::count_documents(&pool, &m.workspace.id).await?;
        println!(
            "{}  {:<24} {:<6} {} document(s)",
            m.workspace.id,
            m.workspace.name,
            m.role.as_str(),
            docs
        );
    }
    Ok(())
}

pub async fn run_delete(
    config: &Config,
    user_id: &str,
    workspace_id: &str,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = storage::create_object_store(&config.storage)?;
    let report = delete_workspace(&pool, store.as_ref(), workspace_id, user_id).await?;
    println!(
        "Deleted workspace {} ({} document(s), {} object(s))",
        workspace_id, report.documents, report.objects
    );
    Ok(())
}
