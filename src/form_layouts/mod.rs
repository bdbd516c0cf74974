//! Form layout resolution: maps a (request_type, workflow_stage) pair to a
//! stored form definition. Three tiers: an explicit process-mapping entry,
//! a seeded layout matched by derived layout type (and agent type), then
//! the tenant default for the request type. Nothing is auto-created; an
//! unresolvable lookup is a 404. Custom fields are joined from the catalog
//! at read time, never duplicated into the layout row.

use axum::{
    extract::{Query, State},
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
use crate::core::shared::schema::{custom_fields, form_layouts, process_mappings};
use crate::core::shared::state::AppState;
use crate::directory::resolve_context;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = form_layouts)]
pub struct DbFormLayout {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub request_type: String,
    pub layout_type: String,
    pub agent_type: Option<String>,
    pub sections: serde_json::Value,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = custom_fields)]
pub struct DbCustomField {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub field_key: String,
    pub label: String,
    pub field_type: String,
    pub options: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = process_mappings)]
pub struct DbProcessMapping {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub request_type: String,
    pub workflow_configuration_id: Option<Uuid>,
    pub stage_mappings: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub fn load_process_mapping(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    request_type: &str,
) -> QueryResult<Option<DbProcessMapping>> {
    process_mappings::table
        .filter(process_mappings::tenant_id.eq(tenant_id))
        .filter(process_mappings::request_type.eq(request_type))
        .filter(process_mappings::is_active.eq(true))
        .first(conn)
        .optional()
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Fixed stage-to-layout-type table.
pub fn layout_type_for_stage(stage: &str) -> Option<&'static str> {
    match stage {
        "submission" | "response" | "resubmission" => Some("assessment_form"),
        "review" | "question_review" => Some("review_form"),
        "approval" | "final_approval" => Some("approval_form"),
        "onboarding" => Some("onboarding_form"),
        _ => None,
    }
}

/// A stage mapping entry is either a bare layout id or an object carrying
/// `form_layout_id`.
pub fn mapped_layout_id(stage_mappings: &serde_json::Value, action: &str) -> Option<Uuid> {
    let entry = stage_mappings.get(action)?;
    let raw = match entry {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => map.get("form_layout_id")?.as_str()?,
        _ => return None,
    };
    Uuid::parse_str(raw).ok()
}

/// Collect custom-field references out of a layout's sections blob.
pub fn field_ids_from_sections(sections: &serde_json::Value) -> Vec<Uuid> {
    let mut ids = Vec::new();
    let Some(sections) = sections.as_array() else {
        return ids;
    };
    for section in sections {
        let Some(field_ids) = section.get("field_ids").and_then(|v| v.as_array()) else {
            continue;
        };
        for raw in field_ids {
            if let Some(id) = raw.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

fn layout_by_id(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    id: Uuid,
) -> QueryResult<Option<DbFormLayout>> {
    form_layouts::table
        .find(id)
        .filter(form_layouts::tenant_id.eq(tenant_id))
        .filter(form_layouts::is_active.eq(true))
        .first(conn)
        .optional()
}

fn layout_by_type(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    layout_type: &str,
    agent_type: Option<&str>,
) -> QueryResult<Option<DbFormLayout>> {
    if let Some(agent_type) = agent_type {
        let exact: Option<DbFormLayout> = form_layouts::table
            .filter(form_layouts::tenant_id.eq(tenant_id))
            .filter(form_layouts::layout_type.eq(layout_type))
            .filter(form_layouts::agent_type.eq(agent_type))
            .filter(form_layouts::is_active.eq(true))
            .first(conn)
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }
    }
    form_layouts::table
        .filter(form_layouts::tenant_id.eq(tenant_id))
        .filter(form_layouts::layout_type.eq(layout_type))
        .filter(form_layouts::agent_type.is_null())
        .filter(form_layouts::is_active.eq(true))
        .first(conn)
        .optional()
}

fn default_layout(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    request_type: &str,
) -> QueryResult<Option<DbFormLayout>> {
    form_layouts::table
        .filter(form_layouts::tenant_id.eq(tenant_id))
        .filter(form_layouts::request_type.eq(request_type))
        .filter(form_layouts::is_default.eq(true))
        .filter(form_layouts::is_active.eq(true))
        .first(conn)
        .optional()
}

/// Three-tier lookup; `None` means 404 to the caller.
pub fn resolve_layout(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    request_type: &str,
    workflow_stage: &str,
    agent_type: Option<&str>,
) -> QueryResult<Option<DbFormLayout>> {
    if let Some(mapping) = load_process_mapping(conn, tenant_id, request_type)? {
        if let Some(layout_id) = mapped_layout_id(&mapping.stage_mappings, workflow_stage) {
            if let Some(layout) = layout_by_id(conn, tenant_id, layout_id)? {
                return Ok(Some(layout));
            }
        }
    }

    if let Some(layout_type) = layout_type_for_stage(workflow_stage) {
        if let Some(layout) = layout_by_type(conn, tenant_id, layout_type, agent_type)? {
            return Ok(Some(layout));
        }
    }

    default_layout(conn, tenant_id, request_type)
}

// ============================================================================
// API
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub request_type: String,
    pub workflow_stage: String,
    pub agent_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolvedForm {
    pub layout: DbFormLayout,
    pub fields: Vec<DbCustomField>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLayoutRequest {
    pub name: String,
    pub request_type: String,
    pub layout_type: String,
    pub agent_type: Option<String>,
    pub sections: serde_json::Value,
    pub is_default: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCustomFieldRequest {
    pub field_key: String,
    pub label: String,
    pub field_type: Option<String>,
    pub options: Option<serde_json::Value>,
}

pub async fn resolve_form_layout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ResolveQuery>,
) -> GovResult<Json<ResolvedForm>> {
    let pool = state.conn.clone();
    let resolved = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;

        let layout = resolve_layout(
            &mut conn,
            ctx.tenant_id,
            &query.request_type,
            &query.workflow_stage,
            query.agent_type.as_deref(),
        )?
        .ok_or_else(|| {
            GovError::NotFound(format!(
                "no form layout for {} / {}",
                query.request_type, query.workflow_stage
            ))
        })?;

        let wanted = field_ids_from_sections(&layout.sections);
        let fields: Vec<DbCustomField> = if wanted.is_empty() {
            Vec::new()
        } else {
            custom_fields::table
                .filter(custom_fields::tenant_id.eq(ctx.tenant_id))
                .filter(custom_fields::id.eq_any(&wanted))
                .filter(custom_fields::is_active.eq(true))
                .load(&mut conn)?
        };

        Ok::<_, GovError>(ResolvedForm { layout, fields })
    })
    .await??;
    Ok(Json(resolved))
}

pub async fn create_layout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateLayoutRequest>,
) -> GovResult<Json<DbFormLayout>> {
    let pool = state.conn.clone();
    let layout = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.is_admin() {
            return Err(GovError::Permission(
                "only admins may manage form layouts".to_string(),
            ));
        }
        if !req.sections.is_array() {
            return Err(GovError::Validation(
                "sections must be a JSON array".to_string(),
            ));
        }

        let now = Utc::now();
        let layout = DbFormLayout {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: req.name,
            request_type: req.request_type,
            layout_type: req.layout_type,
            agent_type: req.agent_type,
            sections: req.sections,
            is_default: req.is_default.unwrap_or(false),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(form_layouts::table)
            .values(&layout)
            .execute(&mut conn)?;
        Ok::<_, GovError>(layout)
    })
    .await??;
    Ok(Json(layout))
}

pub async fn list_layouts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> GovResult<Json<Vec<DbFormLayout>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let list: Vec<DbFormLayout> = form_layouts::table
            .filter(form_layouts::tenant_id.eq(ctx.tenant_id))
            .filter(form_layouts::is_active.eq(true))
            .order(form_layouts::created_at.desc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub async fn create_custom_field(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateCustomFieldRequest>,
) -> GovResult<Json<DbCustomField>> {
    let pool = state.conn.clone();
    let field = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.is_admin() {
            return Err(GovError::Permission(
                "only admins may manage custom fields".to_string(),
            ));
        }

        let field = DbCustomField {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            field_key: req.field_key,
            label: req.label,
            field_type: req.field_type.unwrap_or_else(|| "text".to_string()),
            options: req.options,
            is_active: true,
            created_at: Utc::now(),
        };
        diesel::insert_into(custom_fields::table)
            .values(&field)
            .execute(&mut conn)?;
        Ok::<_, GovError>(field)
    })
    .await??;
    Ok(Json(field))
}

pub async fn list_custom_fields(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> GovResult<Json<Vec<DbCustomField>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let list: Vec<DbCustomField> = custom_fields::table
            .filter(custom_fields::tenant_id.eq(ctx.tenant_id))
            .filter(custom_fields::is_active.eq(true))
            .order(custom_fields::field_key.asc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub fn configure_form_layouts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/form-layouts", get(list_layouts).post(create_layout))
        .route("/api/form-layouts/resolve", get(resolve_form_layout))
        .route(
            "/api/custom-fields",
            get(list_custom_fields).post(create_custom_field),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_table_is_fixed() {
        assert_eq!(layout_type_for_stage("submission"), Some("assessment_form"));
        assert_eq!(layout_type_for_stage("review"), Some("review_form"));
        assert_eq!(layout_type_for_stage("final_approval"), Some("approval_form"));
        assert_eq!(layout_type_for_stage("onboarding"), Some("onboarding_form"));
        assert_eq!(layout_type_for_stage("interpretive_dance"), None);
    }

    #[test]
    fn stage_mappings_accept_both_shapes() {
        let id = Uuid::new_v4();
        let bare = serde_json::json!({ "approve": id.to_string() });
        assert_eq!(mapped_layout_id(&bare, "approve"), Some(id));

        let object = serde_json::json!({ "approve": { "form_layout_id": id.to_string() } });
        assert_eq!(mapped_layout_id(&object, "approve"), Some(id));

        assert_eq!(mapped_layout_id(&bare, "reject"), None);
        let junk = serde_json::json!({ "approve": 42 });
        assert_eq!(mapped_layout_id(&junk, "approve"), None);
    }

    #[test]
    fn field_ids_are_collected_and_deduped() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let sections = serde_json::json!([
            { "title": "General", "field_ids": [a.to_string(), b.to_string()] },
            { "title": "Risk", "field_ids": [a.to_string(), "not-a-uuid"] },
            { "title": "No fields" }
        ]);
        assert_eq!(field_ids_from_sections(&sections), vec![a, b]);
        assert!(field_ids_from_sections(&serde_json::json!({})).is_empty());
    }
}
