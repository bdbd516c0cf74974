//! Assessments: questionnaire templates, their questions, and the
//! assignments that carry a submission through review and approval.

pub mod service;
pub mod workflow;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::enums::AssignmentStatus;
use crate::core::shared::error::{GovError, GovResult};
use crate::core::shared::schema::{
    assessment_assignments, assessment_question_responses, assessment_question_reviews,
    assessment_questions, assessment_workflow_history, assessments, question_library,
    submission_requirement_responses,
};
use crate::core::shared::state::AppState;
use crate::directory::resolve_context;
use service::{
    AssessmentService, CreateAssignmentRequest, DecisionOutcome, FinalDecisionRequest,
    ReviewQuestionRequest, SaveResponsesOutcome, SaveResponsesRequest,
};

// ============================================================================
// MODELS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = assessments)]
pub struct DbAssessment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub team_ids: Vec<Uuid>,
    pub schedule: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = assessment_questions)]
pub struct DbAssessmentQuestion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub assessment_id: Uuid,
    pub question_type: String,
    pub question_text: String,
    pub section: Option<String>,
    pub sort_order: i32,
    pub is_required: bool,
    pub requirement_id: Option<Uuid>,
    pub validation: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = question_library)]
pub struct DbLibraryQuestion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub question_type: String,
    pub question_text: String,
    pub section: Option<String>,
    pub is_required: bool,
    pub validation: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = assessment_assignments)]
pub struct DbAssignment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub assessment_id: Uuid,
    pub vendor_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub assigned_by: Uuid,
    pub status: String,
    pub workflow_ticket_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = assessment_question_responses)]
pub struct DbQuestionResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub assignment_id: Uuid,
    pub question_id: Uuid,
    pub value: Option<String>,
    pub comment: Option<String>,
    pub documents: serde_json::Value,
    pub responded_by: Option<Uuid>,
    pub ai_evaluation: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = assessment_question_reviews)]
pub struct DbQuestionReview {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub assignment_id: Uuid,
    pub question_id: Uuid,
    pub status: String,
    pub comment: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = submission_requirement_responses)]
pub struct DbRequirementResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub requirement_id: Uuid,
    pub value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = assessment_workflow_history)]
pub struct DbWorkflowHistory {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub assignment_id: Uuid,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor_id: Option<Uuid>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Best-effort history row; a write failure is logged, never surfaced.
pub fn record_history(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    assignment_id: Uuid,
    from: Option<AssignmentStatus>,
    to: AssignmentStatus,
    actor_id: Option<Uuid>,
    comment: Option<String>,
) {
    let row = DbWorkflowHistory {
        id: Uuid::new_v4(),
        tenant_id,
        assignment_id,
        from_status: from.map(|s| s.to_string()),
        to_status: to.to_string(),
        actor_id,
        comment,
        created_at: Utc::now(),
    };
    if let Err(e) = diesel::insert_into(assessment_workflow_history::table)
        .values(&row)
        .execute(conn)
    {
        warn!("workflow history write failed for assignment {assignment_id}: {e}");
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAssessmentRequest {
    pub name: String,
    pub description: Option<String>,
    pub team_ids: Option<Vec<Uuid>>,
    pub schedule: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAssessmentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub team_ids: Option<Vec<Uuid>>,
    pub schedule: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct AddQuestionRequest {
    pub question_type: Option<String>,
    pub question_text: String,
    pub section: Option<String>,
    pub sort_order: Option<i32>,
    pub is_required: Option<bool>,
    pub requirement_id: Option<Uuid>,
    pub validation: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PopulateFromLibraryRequest {
    /// Restrict to these library entries; omit to copy the whole library.
    pub question_ids: Option<Vec<Uuid>>,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn create_assessment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateAssessmentRequest>,
) -> GovResult<Json<DbAssessment>> {
    let pool = state.conn.clone();
    let assessment = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.role().can_manage_assessments() {
            return Err(GovError::Permission(
                "not allowed to create assessments".to_string(),
            ));
        }

        let now = Utc::now();
        let assessment = DbAssessment {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: req.name,
            description: req.description,
            owner_id: ctx.user_id(),
            team_ids: req.team_ids.unwrap_or_default(),
            schedule: req.schedule,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(assessments::table)
            .values(&assessment)
            .execute(&mut conn)?;
        crate::audit::log_action(
            &mut conn,
            ctx.tenant_id,
            Some(ctx.user_id()),
            "assessment_created",
            "assessment",
            Some(assessment.id),
            serde_json::json!({ "name": assessment.name }),
        );
        Ok::<_, GovError>(assessment)
    })
    .await??;
    Ok(Json(assessment))
}

pub async fn update_assessment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAssessmentRequest>,
) -> GovResult<Json<DbAssessment>> {
    let pool = state.conn.clone();
    let assessment = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.role().can_manage_assessments() {
            return Err(GovError::Permission(
                "not allowed to update assessments".to_string(),
            ));
        }

        let mut assessment: DbAssessment = assessments::table
            .find(id)
            .filter(assessments::tenant_id.eq(ctx.tenant_id))
            .filter(assessments::is_active.eq(true))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| GovError::NotFound("Assessment not found".to_string()))?;

        if let Some(name) = req.name {
            assessment.name = name;
        }
        if let Some(description) = req.description {
            assessment.description = Some(description);
        }
        if let Some(team_ids) = req.team_ids {
            assessment.team_ids = team_ids;
        }
        if let Some(schedule) = req.schedule {
            assessment.schedule = Some(schedule);
        }
        assessment.updated_at = Utc::now();

        diesel::update(assessments::table.find(assessment.id))
            .set(&assessment)
            .execute(&mut conn)?;
        Ok::<_, GovError>(assessment)
    })
    .await??;
    Ok(Json(assessment))
}

pub async fn delete_assessment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<axum::http::StatusCode> {
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.role().can_manage_assessments() {
            return Err(GovError::Permission(
                "not allowed to delete assessments".to_string(),
            ));
        }

        // Soft delete only; assignments keep their history.
        let updated = diesel::update(
            assessments::table
                .find(id)
                .filter(assessments::tenant_id.eq(ctx.tenant_id)),
        )
        .set((
            assessments::is_active.eq(false),
            assessments::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;
        if updated == 0 {
            return Err(GovError::NotFound("Assessment not found".to_string()));
        }
        Ok::<_, GovError>(())
    })
    .await??;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn list_assessments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> GovResult<Json<Vec<DbAssessment>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let list: Vec<DbAssessment> = assessments::table
            .filter(assessments::tenant_id.eq(ctx.tenant_id))
            .filter(assessments::is_active.eq(true))
            .order(assessments::created_at.desc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub async fn add_question(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<AddQuestionRequest>,
) -> GovResult<Json<DbAssessmentQuestion>> {
    let pool = state.conn.clone();
    let question = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.role().can_manage_assessments() {
            return Err(GovError::Permission(
                "not allowed to edit assessments".to_string(),
            ));
        }

        let exists: i64 = assessments::table
            .find(id)
            .filter(assessments::tenant_id.eq(ctx.tenant_id))
            .filter(assessments::is_active.eq(true))
            .count()
            .get_result(&mut conn)?;
        if exists == 0 {
            return Err(GovError::NotFound("Assessment not found".to_string()));
        }

        let question_type = req
            .question_type
            .unwrap_or_else(|| "new_question".to_string());
        if question_type == service::QUESTION_TYPE_REQUIREMENT && req.requirement_id.is_none() {
            return Err(GovError::Validation(
                "requirement_reference questions need a requirement_id".to_string(),
            ));
        }

        let question = DbAssessmentQuestion {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            assessment_id: id,
            question_type,
            question_text: req.question_text,
            section: req.section,
            sort_order: req.sort_order.unwrap_or(0),
            is_required: req.is_required.unwrap_or(false),
            requirement_id: req.requirement_id,
            validation: req.validation,
            created_at: Utc::now(),
        };
        diesel::insert_into(assessment_questions::table)
            .values(&question)
            .execute(&mut conn)?;
        Ok::<_, GovError>(question)
    })
    .await??;
    Ok(Json(question))
}

pub async fn populate_from_library(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<PopulateFromLibraryRequest>,
) -> GovResult<Json<Vec<DbAssessmentQuestion>>> {
    let pool = state.conn.clone();
    let created = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.role().can_manage_assessments() {
            return Err(GovError::Permission(
                "not allowed to edit assessments".to_string(),
            ));
        }

        let mut q = question_library::table
            .filter(question_library::tenant_id.eq(ctx.tenant_id))
            .into_boxed();
        if let Some(ids) = req.question_ids {
            q = q.filter(question_library::id.eq_any(ids));
        }
        let entries: Vec<DbLibraryQuestion> =
            q.order(question_library::created_at.asc()).load(&mut conn)?;
        if entries.is_empty() {
            return Err(GovError::Validation(
                "no matching library questions".to_string(),
            ));
        }

        let max_order: Option<i32> = assessment_questions::table
            .filter(assessment_questions::assessment_id.eq(id))
            .select(diesel::dsl::max(assessment_questions::sort_order))
            .first(&mut conn)?;
        let mut order = max_order.unwrap_or(0);

        let now = Utc::now();
        let questions: Vec<DbAssessmentQuestion> = entries
            .into_iter()
            .map(|entry| {
                order += 1;
                DbAssessmentQuestion {
                    id: Uuid::new_v4(),
                    tenant_id: ctx.tenant_id,
                    assessment_id: id,
                    question_type: entry.question_type,
                    question_text: entry.question_text,
                    section: entry.section,
                    sort_order: order,
                    is_required: entry.is_required,
                    requirement_id: None,
                    validation: entry.validation,
                    created_at: now,
                }
            })
            .collect();
        diesel::insert_into(assessment_questions::table)
            .values(&questions)
            .execute(&mut conn)?;
        Ok::<_, GovError>(questions)
    })
    .await??;
    Ok(Json(created))
}

pub async fn list_questions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<Json<Vec<DbAssessmentQuestion>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let list: Vec<DbAssessmentQuestion> = assessment_questions::table
            .filter(assessment_questions::tenant_id.eq(ctx.tenant_id))
            .filter(assessment_questions::assessment_id.eq(id))
            .order(assessment_questions::sort_order.asc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub async fn create_assignment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateAssignmentRequest>,
) -> GovResult<Json<DbAssignment>> {
    let pool = state.conn.clone();
    let assignment = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        AssessmentService::new(ctx).create_assignment(&mut conn, id, req)
    })
    .await??;
    Ok(Json(assignment))
}

pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> GovResult<Json<Vec<DbAssignment>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let mut q = assessment_assignments::table
            .filter(assessment_assignments::tenant_id.eq(ctx.tenant_id))
            .into_boxed();
        if !ctx.is_admin() && !ctx.role().can_approve() {
            q = q.filter(assessment_assignments::assigned_to.eq(ctx.user_id()));
        }
        let list: Vec<DbAssignment> = q
            .order(assessment_assignments::created_at.desc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub async fn get_assignment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<Json<DbAssignment>> {
    let pool = state.conn.clone();
    let assignment = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let assignment: Option<DbAssignment> = assessment_assignments::table
            .find(id)
            .filter(assessment_assignments::tenant_id.eq(ctx.tenant_id))
            .first(&mut conn)
            .optional()?;
        assignment.ok_or_else(|| GovError::NotFound("Assignment not found".to_string()))
    })
    .await??;
    Ok(Json(assignment))
}

pub async fn save_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<SaveResponsesRequest>,
) -> GovResult<Json<SaveResponsesOutcome>> {
    let pool = state.conn.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        AssessmentService::new(ctx).save_responses(&mut conn, id, req)
    })
    .await??;
    Ok(Json(outcome))
}

pub async fn review_question(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewQuestionRequest>,
) -> GovResult<Json<DbQuestionReview>> {
    let pool = state.conn.clone();
    let review = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        AssessmentService::new(ctx).review_question(&mut conn, id, req)
    })
    .await??;
    Ok(Json(review))
}

pub async fn submit_final_decision(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<FinalDecisionRequest>,
) -> GovResult<Json<DecisionOutcome>> {
    let pool = state.conn.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        AssessmentService::new(ctx).submit_final_decision(&mut conn, id, req)
    })
    .await??;
    Ok(Json(outcome))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<Json<Vec<DbWorkflowHistory>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let list: Vec<DbWorkflowHistory> = assessment_workflow_history::table
            .filter(assessment_workflow_history::tenant_id.eq(ctx.tenant_id))
            .filter(assessment_workflow_history::assignment_id.eq(id))
            .order(assessment_workflow_history::created_at.asc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub fn configure_assessments_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/assessments",
            get(list_assessments).post(create_assessment),
        )
        .route(
            "/api/assessments/:id",
            put(update_assessment).delete(delete_assessment),
        )
        .route(
            "/api/assessments/:id/questions",
            get(list_questions).post(add_question),
        )
        .route(
            "/api/assessments/:id/questions/populate",
            post(populate_from_library),
        )
        .route("/api/assessments/:id/assignments", post(create_assignment))
        .route("/api/assignments", get(list_assignments))
        .route("/api/assignments/:id", get(get_assignment))
        .route("/api/assignments/:id/responses", post(save_responses))
        .route("/api/assignments/:id/reviews", post(review_question))
        .route("/api/assignments/:id/decision", post(submit_final_decision))
        .route("/api/assignments/:id/history", get(get_history))
}
