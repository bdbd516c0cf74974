use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::error::{GovError, GovResult};
use crate::core::shared::schema::vendors;
use crate::core::shared::state::AppState;
use crate::directory::resolve_context;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = vendors)]
pub struct DbVendor {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub contact_email: Option<String>,
    pub compliance_score: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVendorRequest {
    pub name: String,
    pub contact_email: Option<String>,
}

pub fn load_vendor(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    vendor_id: Uuid,
) -> GovResult<DbVendor> {
    let vendor: Option<DbVendor> = vendors::table
        .find(vendor_id)
        .filter(vendors::tenant_id.eq(tenant_id))
        .first(conn)
        .optional()?;
    vendor.ok_or_else(|| GovError::NotFound("Vendor not found".to_string()))
}

pub async fn create_vendor(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateVendorRequest>,
) -> GovResult<Json<DbVendor>> {
    let pool = state.conn.clone();
    let vendor = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.role().can_manage_assessments() {
            return Err(GovError::Permission(
                "not allowed to manage vendors".to_string(),
            ));
        }

        let now = Utc::now();
        let vendor = DbVendor {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: req.name,
            contact_email: req.contact_email,
            compliance_score: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(vendors::table)
            .values(&vendor)
            .execute(&mut conn)?;
        Ok::<_, GovError>(vendor)
    })
    .await??;
    Ok(Json(vendor))
}

pub async fn list_vendors(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> GovResult<Json<Vec<DbVendor>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let list: Vec<DbVendor> = vendors::table
            .filter(vendors::tenant_id.eq(ctx.tenant_id))
            .filter(vendors::is_active.eq(true))
            .order(vendors::created_at.desc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub async fn get_vendor(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<Json<DbVendor>> {
    let pool = state.conn.clone();
    let vendor = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        load_vendor(&mut conn, ctx.tenant_id, id)
    })
    .await??;
    Ok(Json(vendor))
}

pub fn configure_vendors_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/vendors", get(list_vendors).post(create_vendor))
        .route("/api/vendors/:id", get(get_vendor))
}
