//! AI-agent records and the per-agent onboarding workflow. Onboarding is
//! tracked independently of assessments but feeds the same inbox; the
//! request snapshots its workflow steps at submit time so later
//! configuration edits do not reroute in-flight requests.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::action_items::{complete_open_items, insert_action_item, ActionItemSpec};
use crate::assessments::workflow::{
    default_steps, next_step_after, parse_steps, resolve_approvers, step_named, StepConfig,
};
use crate::core::shared::enums::{ApprovalDecision, Priority, SourceType};
use crate::core::shared::error::{GovError, GovResult};
use crate::core::shared::schema::{agents, onboarding_requests, workflow_configurations};
use crate::core::shared::state::AppState;
use crate::directory::{active_tenant_users, resolve_context, RequestContext};

pub const ONBOARDING_REQUEST_TYPE: &str = "agent_onboarding";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = agents)]
pub struct DbAgent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub vendor_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub agent_type: String,
    pub status: String,
    pub compliance_score: Option<i32>,
    pub submitted_by: Option<Uuid>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = onboarding_requests)]
pub struct DbOnboardingRequest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub status: String,
    pub current_step: i32,
    pub workflow_steps: serde_json::Value,
    pub assigned_to: Option<Uuid>,
    pub requested_by: Uuid,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inbox classification: a request sitting on an approval-type step is an
/// `approval` task, anything else is an `onboarding_review`.
pub fn classify_onboarding(steps_json: &serde_json::Value, current_step: i32) -> &'static str {
    let steps = match parse_steps(steps_json) {
        Ok(steps) => steps,
        Err(_) => return "onboarding_review",
    };
    match step_named(&steps, current_step) {
        Some(step) if step.is_approval() => "approval",
        _ => "onboarding_review",
    }
}

fn resolve_onboarding_steps(conn: &mut PgConnection, tenant_id: Uuid) -> Vec<StepConfig> {
    let cfg: Option<crate::assessments::workflow::DbWorkflowConfiguration> =
        workflow_configurations::table
            .filter(workflow_configurations::tenant_id.eq(tenant_id))
            .filter(workflow_configurations::request_type.eq(ONBOARDING_REQUEST_TYPE))
            .filter(workflow_configurations::is_default.eq(true))
            .filter(workflow_configurations::is_active.eq(true))
            .first(conn)
            .optional()
            .unwrap_or(None);
    cfg.and_then(|c| parse_steps(&c.workflow_steps).ok())
        .unwrap_or_else(default_steps)
}

pub fn active_request(
    conn: &mut PgConnection,
    agent_id: Uuid,
) -> QueryResult<Option<DbOnboardingRequest>> {
    onboarding_requests::table
        .filter(onboarding_requests::agent_id.eq(agent_id))
        .filter(onboarding_requests::status.eq("in_progress"))
        .first(conn)
        .optional()
}

fn load_agent(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> GovResult<DbAgent> {
    let agent: Option<DbAgent> = agents::table
        .find(id)
        .filter(agents::tenant_id.eq(tenant_id))
        .first(conn)
        .optional()?;
    agent.ok_or_else(|| GovError::NotFound("Agent not found".to_string()))
}

fn onboarding_item(
    conn: &mut PgConnection,
    ctx: &RequestContext,
    agent: &DbAgent,
    assignee: Uuid,
    step: &StepConfig,
) -> GovResult<usize> {
    insert_action_item(
        conn,
        ActionItemSpec {
            tenant_id: ctx.tenant_id,
            title: format!("Onboarding: {}", agent.name),
            description: agent.description.clone(),
            action_type: if step.is_approval() {
                "approval".to_string()
            } else {
                "onboarding_review".to_string()
            },
            source_type: SourceType::OnboardingRequest,
            source_id: agent.id,
            assigned_to: assignee,
            assigned_role: Some(step.assigned_role.clone()),
            priority: Priority::Medium,
            workflow_ticket_id: None,
            payload: serde_json::json!({ "step_number": step.step_number }),
            due_date: None,
        },
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub description: Option<String>,
    pub vendor_id: Option<Uuid>,
    pub agent_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OnboardingDecisionRequest {
    pub decision: String,
    pub comment: Option<String>,
}

pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateAgentRequest>,
) -> GovResult<Json<DbAgent>> {
    let pool = state.conn.clone();
    let agent = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;

        let now = Utc::now();
        let agent = DbAgent {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            vendor_id: req.vendor_id,
            name: req.name,
            description: req.description,
            agent_type: req.agent_type.unwrap_or_else(|| "standard".to_string()),
            status: "draft".to_string(),
            compliance_score: None,
            submitted_by: None,
            submitted_at: None,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(agents::table)
            .values(&agent)
            .execute(&mut conn)?;
        Ok::<_, GovError>(agent)
    })
    .await??;
    Ok(Json(agent))
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> GovResult<Json<Vec<DbAgent>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let list: Vec<DbAgent> = agents::table
            .filter(agents::tenant_id.eq(ctx.tenant_id))
            .order(agents::created_at.desc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<Json<DbAgent>> {
    let pool = state.conn.clone();
    let agent = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        load_agent(&mut conn, ctx.tenant_id, id)
    })
    .await??;
    Ok(Json(agent))
}

/// Submit an agent for onboarding. Idempotent: resubmitting an agent with
/// an active request returns the existing request unchanged.
pub async fn submit_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> GovResult<Json<DbOnboardingRequest>> {
    let pool = state.conn.clone();
    let request = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let agent = load_agent(&mut conn, ctx.tenant_id, id)?;

        if let Some(existing) = active_request(&mut conn, agent.id)? {
            return Ok(existing);
        }

        let steps = resolve_onboarding_steps(&mut conn, ctx.tenant_id);
        let first = steps
            .first()
            .cloned()
            .ok_or_else(|| GovError::Internal("onboarding workflow has no steps".to_string()))?;

        let tenant_users = active_tenant_users(&mut conn, ctx.tenant_id)?;
        let reviewers = resolve_approvers(None, &[], &tenant_users, ctx.user_id());
        let assignee = reviewers.first().copied();

        let now = Utc::now();
        let request = DbOnboardingRequest {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            agent_id: agent.id,
            status: "in_progress".to_string(),
            current_step: first.step_number,
            workflow_steps: serde_json::to_value(&steps)
                .map_err(|e| GovError::Internal(e.to_string()))?,
            assigned_to: assignee,
            requested_by: ctx.user_id(),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(onboarding_requests::table)
            .values(&request)
            .on_conflict_do_nothing()
            .execute(&mut conn)?;

        // A concurrent submit may have won; hand back whichever row is live.
        let request = active_request(&mut conn, agent.id)?
            .ok_or_else(|| GovError::Internal("onboarding request vanished".to_string()))?;

        diesel::update(agents::table.find(agent.id))
            .set((
                agents::status.eq("submitted"),
                agents::submitted_by.eq(Some(ctx.user_id())),
                agents::submitted_at.eq(Some(now)),
                agents::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        for reviewer in &reviewers {
            onboarding_item(&mut conn, &ctx, &agent, *reviewer, &first)?;
        }
        crate::audit::log_action(
            &mut conn,
            ctx.tenant_id,
            Some(ctx.user_id()),
            "agent_submitted",
            "agent",
            Some(agent.id),
            serde_json::json!({ "request_id": request.id }),
        );

        Ok::<_, GovError>(request)
    })
    .await??;
    Ok(Json(request))
}

pub async fn decide_onboarding(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<OnboardingDecisionRequest>,
) -> GovResult<Json<DbOnboardingRequest>> {
    let pool = state.conn.clone();
    let request = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.role().can_approve() {
            return Err(GovError::Permission(
                "not allowed to act on onboarding requests".to_string(),
            ));
        }

        let decision: ApprovalDecision = req
            .decision
            .parse()
            .map_err(|e: String| GovError::Validation(e))?;
        let agent = load_agent(&mut conn, ctx.tenant_id, id)?;
        let request = active_request(&mut conn, agent.id)?
            .ok_or_else(|| GovError::NotFound("No active onboarding request".to_string()))?;

        let steps = parse_steps(&request.workflow_steps).unwrap_or_else(|_| default_steps());
        let now = Utc::now();

        let updated = if decision.is_accept() {
            match next_step_after(&steps, request.current_step) {
                Some(next) => {
                    diesel::update(onboarding_requests::table.find(request.id))
                        .set((
                            onboarding_requests::current_step.eq(next.step_number),
                            onboarding_requests::updated_at.eq(now),
                        ))
                        .execute(&mut conn)?;

                    let tenant_users = active_tenant_users(&mut conn, ctx.tenant_id)?;
                    let reviewers =
                        resolve_approvers(None, &[], &tenant_users, request.requested_by);
                    for reviewer in &reviewers {
                        onboarding_item(&mut conn, &ctx, &agent, *reviewer, next)?;
                    }
                    DbOnboardingRequest {
                        current_step: next.step_number,
                        updated_at: now,
                        ..request
                    }
                }
                None => {
                    diesel::update(onboarding_requests::table.find(request.id))
                        .set((
                            onboarding_requests::status.eq("approved"),
                            onboarding_requests::completed_at.eq(Some(now)),
                            onboarding_requests::updated_at.eq(now),
                        ))
                        .execute(&mut conn)?;
                    diesel::update(agents::table.find(agent.id))
                        .set((
                            agents::status.eq("approved"),
                            agents::compliance_score.eq(Some(100)),
                            agents::updated_at.eq(now),
                        ))
                        .execute(&mut conn)?;
                    DbOnboardingRequest {
                        status: "approved".to_string(),
                        completed_at: Some(now),
                        updated_at: now,
                        ..request
                    }
                }
            }
        } else {
            diesel::update(onboarding_requests::table.find(request.id))
                .set((
                    onboarding_requests::status.eq("rejected"),
                    onboarding_requests::completed_at.eq(Some(now)),
                    onboarding_requests::updated_at.eq(now),
                ))
                .execute(&mut conn)?;
            diesel::update(agents::table.find(agent.id))
                .set((agents::status.eq("rejected"), agents::updated_at.eq(now)))
                .execute(&mut conn)?;
            DbOnboardingRequest {
                status: "rejected".to_string(),
                completed_at: Some(now),
                updated_at: now,
                ..request
            }
        };

        complete_open_items(
            &mut conn,
            ctx.tenant_id,
            ctx.user_id(),
            SourceType::OnboardingRequest,
            agent.id,
        )?;
        crate::audit::log_action(
            &mut conn,
            ctx.tenant_id,
            Some(ctx.user_id()),
            "onboarding_decision",
            "agent",
            Some(agent.id),
            serde_json::json!({ "decision": decision.to_string(), "comment": req.comment }),
        );

        Ok::<_, GovError>(updated)
    })
    .await??;
    Ok(Json(request))
}

pub fn configure_agents_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/agents", get(list_agents).post(create_agent))
        .route("/api/agents/:id", get(get_agent))
        .route("/api/agents/:id/submit", post(submit_agent))
        .route("/api/agents/:id/onboarding/decision", post(decide_onboarding))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_the_current_step_type() {
        let steps = serde_json::json!([
            {"step_number": 1, "step_name": "Intake", "step_type": "review"},
            {"step_number": 2, "step_name": "Sign-off", "step_type": "approval"}
        ]);
        assert_eq!(classify_onboarding(&steps, 1), "onboarding_review");
        assert_eq!(classify_onboarding(&steps, 2), "approval");
    }

    #[test]
    fn classification_degrades_on_bad_snapshots() {
        assert_eq!(
            classify_onboarding(&serde_json::json!("not steps"), 1),
            "onboarding_review"
        );
        let steps = serde_json::json!([{"step_number": 1}]);
        // step 5 does not exist in the snapshot
        assert_eq!(classify_onboarding(&steps, 5), "onboarding_review");
    }
}
