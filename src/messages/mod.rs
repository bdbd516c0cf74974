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

use crate::core::shared::error::{GovError, GovResult};
use crate::core::shared::schema::messages;
use crate::core::shared::state::AppState;
use crate::directory::resolve_context;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = messages)]
pub struct DbMessage {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub subject: String,
    pub body: String,
    pub is_public: bool,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: Option<Uuid>,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub subject: String,
    pub body: String,
    pub is_public: Option<bool>,
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> GovResult<Json<DbMessage>> {
    if req.recipient_id.is_none() && !req.is_public.unwrap_or(false) {
        return Err(GovError::Validation(
            "message needs a recipient or is_public".to_string(),
        ));
    }
    let pool = state.conn.clone();
    let message = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;

        let message = DbMessage {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            sender_id: Some(ctx.user_id()),
            recipient_id: req.recipient_id,
            resource_type: req.resource_type,
            resource_id: req.resource_id,
            subject: req.subject,
            body: req.body,
            is_public: req.is_public.unwrap_or(false),
            is_read: false,
            created_at: Utc::now(),
        };
        diesel::insert_into(messages::table)
            .values(&message)
            .execute(&mut conn)?;
        Ok::<_, GovError>(message)
    })
    .await??;
    Ok(Json(message))
}

pub async fn list_my_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> GovResult<Json<Vec<DbMessage>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let list: Vec<DbMessage> = messages::table
            .filter(messages::tenant_id.eq(ctx.tenant_id))
            .filter(messages::recipient_id.eq(ctx.user_id()))
            .order(messages::created_at.desc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<Json<DbMessage>> {
    let pool = state.conn.clone();
    let message = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;

        let message: Option<DbMessage> = messages::table
            .find(id)
            .filter(messages::tenant_id.eq(ctx.tenant_id))
            .first(&mut conn)
            .optional()?;
        let message =
            message.ok_or_else(|| GovError::NotFound("Message not found".to_string()))?;
        if message.recipient_id != Some(ctx.user_id()) && !message.is_public && !ctx.is_admin() {
            return Err(GovError::Permission(
                "message is addressed to another user".to_string(),
            ));
        }

        diesel::update(messages::table.find(id))
            .set(messages::is_read.eq(true))
            .execute(&mut conn)?;
        Ok::<_, GovError>(DbMessage {
            is_read: true,
            ..message
        })
    })
    .await??;
    Ok(Json(message))
}

pub fn configure_messages_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/messages", get(list_my_messages).post(send_message))
        .route("/api/messages/:id/read", put(mark_read))
}
