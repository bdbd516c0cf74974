//! Users, tenants and the per-request context.
//!
//! Authentication itself is upstream (an API gateway terminates the session
//! and forwards a trusted `x-user-id` header); this module resolves that
//! header into a [`RequestContext`] carrying the user row and the effective
//! tenant. Every service takes the context explicitly instead of looking up
//! tenancy ad hoc.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::enums::UserRole;
use crate::core::shared::error::{GovError, GovResult};
use crate::core::shared::models::{DbTenant, DbUser};
use crate::core::shared::schema::{tenants, users};
use crate::core::shared::state::AppState;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_id: Uuid,
    pub user: DbUser,
}

impl RequestContext {
    pub fn role(&self) -> UserRole {
        self.user.user_role()
    }

    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.role().is_admin()
    }
}

/// Resolve the calling user and effective tenant from request headers.
/// Platform admins may act on another tenant via `x-tenant-id`.
pub fn resolve_context(
    conn: &mut PgConnection,
    headers: &HeaderMap,
) -> GovResult<RequestContext> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GovError::Permission("missing x-user-id header".to_string()))?;
    let user_id = Uuid::parse_str(raw)
        .map_err(|_| GovError::Validation(format!("malformed user id: {raw}")))?;

    let user: Option<DbUser> = users::table
        .find(user_id)
        .filter(users::is_active.eq(true))
        .first(conn)
        .optional()?;
    let user = user.ok_or_else(|| GovError::Permission("unknown or inactive user".to_string()))?;

    let tenant_id = if user.user_role() == UserRole::PlatformAdmin {
        headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .unwrap_or(user.tenant_id)
    } else {
        user.tenant_id
    };

    Ok(RequestContext { tenant_id, user })
}

pub fn active_tenant_users(
    conn: &mut PgConnection,
    tenant_id: Uuid,
) -> QueryResult<Vec<DbUser>> {
    users::table
        .filter(users::tenant_id.eq(tenant_id))
        .filter(users::is_active.eq(true))
        .order(users::created_at.asc())
        .load(conn)
}

/// Vendor users matched by the vendor's contact email.
pub fn users_matching_contact(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    contact_email: &str,
) -> QueryResult<Vec<DbUser>> {
    users::table
        .filter(users::tenant_id.eq(tenant_id))
        .filter(users::is_active.eq(true))
        .filter(users::email.eq(contact_email))
        .load(conn)
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub role: Option<String>,
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<String>,
}

/// Bootstrap seam: tenant provisioning is expected to be gateway-protected,
/// the server itself does not gate it on an existing user.
pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTenantRequest>,
) -> GovResult<Json<DbTenant>> {
    let pool = state.conn.clone();
    let tenant = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let tenant = DbTenant {
            id: Uuid::new_v4(),
            name: req.name,
            slug: req.slug,
            is_active: true,
            created_at: Utc::now(),
        };
        diesel::insert_into(tenants::table)
            .values(&tenant)
            .execute(&mut conn)?;
        Ok::<_, GovError>(tenant)
    })
    .await??;
    Ok(Json(tenant))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> GovResult<Json<DbUser>> {
    let pool = state.conn.clone();
    let user = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let role: UserRole = match &req.role {
            Some(r) => r
                .parse()
                .map_err(|e: String| GovError::Validation(e))?,
            None => UserRole::Member,
        };

        // First user of a tenant may be created without a context; after
        // that, only admins may add users.
        let target_tenant = match resolve_context(&mut conn, &headers) {
            Ok(ctx) => {
                if !ctx.is_admin() {
                    return Err(GovError::Permission(
                        "only admins may create users".to_string(),
                    ));
                }
                req.tenant_id.unwrap_or(ctx.tenant_id)
            }
            Err(_) => {
                let tenant_id = req.tenant_id.ok_or_else(|| {
                    GovError::Validation("tenant_id is required".to_string())
                })?;
                let existing: i64 = users::table
                    .filter(users::tenant_id.eq(tenant_id))
                    .count()
                    .get_result(&mut conn)?;
                if existing > 0 {
                    return Err(GovError::Permission(
                        "only admins may create users".to_string(),
                    ));
                }
                tenant_id
            }
        };

        let now = Utc::now();
        let user = DbUser {
            id: Uuid::new_v4(),
            tenant_id: target_tenant,
            username: req.username,
            email: req.email,
            role: role.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(users::table)
            .values(&user)
            .execute(&mut conn)?;
        Ok::<_, GovError>(user)
    })
    .await??;
    Ok(Json(user))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListUsersQuery>,
) -> GovResult<Json<Vec<DbUser>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;

        let mut q = users::table
            .filter(users::tenant_id.eq(ctx.tenant_id))
            .filter(users::is_active.eq(true))
            .into_boxed();
        if let Some(role) = query.role {
            q = q.filter(users::role.eq(role));
        }
        let list: Vec<DbUser> = q.order(users::created_at.asc()).load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub fn configure_directory_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tenants", post(create_tenant))
        .route("/api/users", get(list_users).post(create_user))
}
