//! Action items: the universal inbox task row, polymorphic over its source
//! entity. Duplicate suppression for open items is a partial unique index
//! (`action_items_open_dedup`); inserts go through `insert_action_item`
//! which relies on `ON CONFLICT DO NOTHING` rather than a prior SELECT.

pub mod inbox;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::enums::{ActionItemStatus, Priority, SourceType};
use crate::core::shared::error::{GovError, GovResult};
use crate::core::shared::schema::action_items;
use crate::core::shared::state::AppState;
use crate::directory::resolve_context;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = action_items)]
pub struct DbActionItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub action_type: String,
    pub source_type: String,
    pub source_id: Uuid,
    pub assigned_to: Uuid,
    pub assigned_role: Option<String>,
    pub status: String,
    pub priority: String,
    pub workflow_ticket_id: Option<String>,
    pub payload: serde_json::Value,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ActionItemSpec {
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub action_type: String,
    pub source_type: SourceType,
    pub source_id: Uuid,
    pub assigned_to: Uuid,
    pub assigned_role: Option<String>,
    pub priority: Priority,
    pub workflow_ticket_id: Option<String>,
    pub payload: serde_json::Value,
    pub due_date: Option<DateTime<Utc>>,
}

/// Insert a pending item. Returns the number of rows actually written: 0
/// means an open duplicate already existed and the unique index swallowed
/// the insert.
pub fn insert_action_item(conn: &mut PgConnection, spec: ActionItemSpec) -> GovResult<usize> {
    let now = Utc::now();
    let item = DbActionItem {
        id: Uuid::new_v4(),
        tenant_id: spec.tenant_id,
        title: spec.title,
        description: spec.description,
        action_type: spec.action_type,
        source_type: spec.source_type.to_string(),
        source_id: spec.source_id,
        assigned_to: spec.assigned_to,
        assigned_role: spec.assigned_role,
        status: ActionItemStatus::Pending.to_string(),
        priority: spec.priority.to_string(),
        workflow_ticket_id: spec.workflow_ticket_id,
        payload: spec.payload,
        due_date: spec.due_date,
        assigned_at: now,
        completed_at: None,
        created_at: now,
        updated_at: now,
    };
    let written = diesel::insert_into(action_items::table)
        .values(&item)
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(written)
}

/// Complete the assignee's open items for one source entity. Other
/// assignees' items are untouched.
pub fn complete_open_items(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    assigned_to: Uuid,
    source_type: SourceType,
    source_id: Uuid,
) -> QueryResult<usize> {
    let now = Utc::now();
    diesel::update(
        action_items::table
            .filter(action_items::tenant_id.eq(tenant_id))
            .filter(action_items::assigned_to.eq(assigned_to))
            .filter(action_items::source_type.eq(source_type.to_string()))
            .filter(action_items::source_id.eq(source_id))
            .filter(action_items::status.ne(ActionItemStatus::Completed.to_string())),
    )
    .set((
        action_items::status.eq(ActionItemStatus::Completed.to_string()),
        action_items::completed_at.eq(Some(now)),
        action_items::updated_at.eq(now),
    ))
    .execute(conn)
}

fn load_item(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    id: Uuid,
) -> GovResult<DbActionItem> {
    let item: Option<DbActionItem> = action_items::table
        .find(id)
        .filter(action_items::tenant_id.eq(tenant_id))
        .first(conn)
        .optional()?;
    item.ok_or_else(|| GovError::NotFound("Action item not found".to_string()))
}

pub async fn start_action_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<Json<DbActionItem>> {
    set_item_status(state, headers, id, ActionItemStatus::InProgress).await
}

pub async fn complete_action_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<Json<DbActionItem>> {
    set_item_status(state, headers, id, ActionItemStatus::Completed).await
}

async fn set_item_status(
    state: Arc<AppState>,
    headers: HeaderMap,
    id: Uuid,
    status: ActionItemStatus,
) -> GovResult<Json<DbActionItem>> {
    let pool = state.conn.clone();
    let item = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let item = load_item(&mut conn, ctx.tenant_id, id)?;
        if item.assigned_to != ctx.user_id() && !ctx.is_admin() {
            return Err(GovError::Permission(
                "item is assigned to another user".to_string(),
            ));
        }

        let now = Utc::now();
        let completed_at = match status {
            ActionItemStatus::Completed => Some(now),
            _ => None,
        };
        diesel::update(action_items::table.find(item.id))
            .set((
                action_items::status.eq(status.to_string()),
                action_items::completed_at.eq(completed_at),
                action_items::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        load_item(&mut conn, ctx.tenant_id, id)
    })
    .await??;
    Ok(Json(item))
}

pub fn configure_action_items_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/inbox", get(inbox::get_user_inbox))
        .route("/api/action-items/:id/start", put(start_action_item))
        .route("/api/action-items/:id/complete", put(complete_action_item))
}
