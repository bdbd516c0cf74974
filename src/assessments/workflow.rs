//! Approval workflow engine.
//!
//! A tenant's `workflow_configurations.workflow_steps` JSONB is parsed into
//! `Vec<StepConfig>` once, at load time; downstream code only ever sees the
//! validated form. An `ApprovalInstance` tracks `current_step` through the
//! configured chain and goes terminal when a non-accept decision arrives or
//! the last step is accepted.

use axum::{
    extract::State,
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::action_items::{insert_action_item, ActionItemSpec};
use crate::core::shared::enums::{InstanceStatus, Priority, SourceType, StepStatus, UserRole};
use crate::core::shared::error::{GovError, GovResult};
use crate::core::shared::models::DbUser;
use crate::core::shared::schema::{
    approval_instances, approval_steps, users, workflow_configurations,
};
use crate::core::shared::state::AppState;
use crate::directory::{resolve_context, RequestContext};
use crate::form_layouts::load_process_mapping;

pub const ASSESSMENT_REQUEST_TYPE: &str = "assessment_workflow";

// ============================================================================
// STEP CONFIGURATION
// ============================================================================

fn default_step_type() -> String {
    "approval".to_string()
}

fn default_assigned_role() -> String {
    "approver".to_string()
}

fn default_auto_assign() -> bool {
    true
}

/// One entry of a workflow configuration. Validated once when the
/// configuration is loaded; never re-parsed per read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub step_number: i32,
    #[serde(default)]
    pub step_name: String,
    #[serde(default = "default_step_type")]
    pub step_type: String,
    #[serde(default = "default_assigned_role")]
    pub assigned_role: String,
    #[serde(default = "default_auto_assign")]
    pub auto_assign: bool,
}

impl StepConfig {
    pub fn is_approval(&self) -> bool {
        self.step_type == "approval"
    }
}

/// Parse and validate a stored `workflow_steps` blob. Returns the steps
/// sorted by `step_number`.
pub fn parse_steps(value: &serde_json::Value) -> Result<Vec<StepConfig>, String> {
    let entries = value
        .as_array()
        .ok_or_else(|| "workflow_steps must be a JSON array".to_string())?;

    let mut steps = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut step: StepConfig = serde_json::from_value(entry.clone())
            .map_err(|e| format!("invalid workflow step: {e}"))?;
        if step.step_number < 1 {
            return Err(format!("step_number must be >= 1, got {}", step.step_number));
        }
        if step.step_name.is_empty() {
            step.step_name = format!("Step {}", step.step_number);
        }
        steps.push(step);
    }
    if steps.is_empty() {
        return Err("workflow_steps must contain at least one step".to_string());
    }

    steps.sort_by_key(|s| s.step_number);
    for pair in steps.windows(2) {
        if pair[0].step_number == pair[1].step_number {
            return Err(format!("duplicate step_number {}", pair[0].step_number));
        }
    }
    Ok(steps)
}

/// Hard-coded chain used when a tenant has no configuration.
pub fn default_steps() -> Vec<StepConfig> {
    vec![
        StepConfig {
            step_number: 1,
            step_name: "Assessment Review".to_string(),
            step_type: "approval".to_string(),
            assigned_role: "approver".to_string(),
            auto_assign: true,
        },
        StepConfig {
            step_number: 2,
            step_name: "Final Approval".to_string(),
            step_type: "approval".to_string(),
            assigned_role: "approver".to_string(),
            auto_assign: true,
        },
    ]
}

pub fn first_step(steps: &[StepConfig]) -> Option<&StepConfig> {
    steps.first()
}

/// The next configured step strictly after `current`, if any.
pub fn next_step_after(steps: &[StepConfig], current: i32) -> Option<&StepConfig> {
    steps.iter().find(|s| s.step_number > current)
}

pub fn step_named(steps: &[StepConfig], number: i32) -> Option<&StepConfig> {
    steps.iter().find(|s| s.step_number == number)
}

// ============================================================================
// MODELS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = workflow_configurations)]
pub struct DbWorkflowConfiguration {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub request_type: String,
    pub workflow_steps: serde_json::Value,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = approval_instances)]
pub struct DbApprovalInstance {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub assignment_id: Uuid,
    pub status: String,
    pub current_step: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = approval_steps)]
pub struct DbApprovalStep {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub instance_id: Uuid,
    pub step_number: i32,
    pub step_name: String,
    pub status: String,
    pub assigned_to: Option<Uuid>,
    pub assigned_role: Option<String>,
    pub decision: Option<String>,
    pub comment: Option<String>,
    pub acted_by: Option<Uuid>,
    pub acted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// STEP RESOLUTION
// ============================================================================

fn steps_from_configuration(cfg: &DbWorkflowConfiguration) -> Option<Vec<StepConfig>> {
    match parse_steps(&cfg.workflow_steps) {
        Ok(steps) => Some(steps),
        Err(e) => {
            warn!(
                "workflow configuration {} has invalid steps, skipping: {e}",
                cfg.id
            );
            None
        }
    }
}

/// Resolve the step chain for assessment approvals: process mapping, then
/// the tenant default configuration, then the built-in two-step chain.
pub fn resolve_workflow_steps(conn: &mut PgConnection, tenant_id: Uuid) -> Vec<StepConfig> {
    if let Ok(Some(mapping)) = load_process_mapping(conn, tenant_id, ASSESSMENT_REQUEST_TYPE) {
        if let Some(cfg_id) = mapping.workflow_configuration_id {
            let cfg: Option<DbWorkflowConfiguration> = workflow_configurations::table
                .find(cfg_id)
                .filter(workflow_configurations::is_active.eq(true))
                .first(conn)
                .optional()
                .unwrap_or(None);
            if let Some(steps) = cfg.as_ref().and_then(steps_from_configuration) {
                return steps;
            }
        }
    }

    let default_cfg: Option<DbWorkflowConfiguration> = workflow_configurations::table
        .filter(workflow_configurations::tenant_id.eq(tenant_id))
        .filter(workflow_configurations::request_type.eq(ASSESSMENT_REQUEST_TYPE))
        .filter(workflow_configurations::is_default.eq(true))
        .filter(workflow_configurations::is_active.eq(true))
        .first(conn)
        .optional()
        .unwrap_or(None);
    if let Some(steps) = default_cfg.as_ref().and_then(steps_from_configuration) {
        return steps;
    }

    default_steps()
}

// ============================================================================
// APPROVER RESOLUTION
// ============================================================================

fn role_of(user: &DbUser) -> UserRole {
    user.user_role()
}

fn push_unique(out: &mut Vec<Uuid>, id: Uuid) {
    if !out.contains(&id) {
        out.push(id);
    }
}

/// Resolve who should receive approval action items. The submitter is
/// always excluded from their own approval queue.
pub fn resolve_approvers(
    owner: Option<&DbUser>,
    team_members: &[DbUser],
    tenant_users: &[DbUser],
    submitter: Uuid,
) -> Vec<Uuid> {
    let usable = |u: &DbUser| u.is_active && u.id != submitter;
    let mut out = Vec::new();

    if let Some(owner) = owner {
        if usable(owner) && (role_of(owner).can_approve()) {
            push_unique(&mut out, owner.id);
        }
    }
    if !out.is_empty() {
        return out;
    }

    for member in team_members.iter().filter(|u| usable(u)) {
        if role_of(member).can_approve() {
            push_unique(&mut out, member.id);
        }
    }
    if !out.is_empty() {
        return out;
    }

    for user in tenant_users.iter().filter(|u| usable(u)) {
        if matches!(
            role_of(user),
            UserRole::Approver | UserRole::Reviewer | UserRole::PlatformAdmin
        ) {
            push_unique(&mut out, user.id);
        }
    }
    if !out.is_empty() {
        return out;
    }

    // Fallback chain: tenant admin, then any active non-submitter, then
    // the assessment owner as last resort.
    if let Some(admin) = tenant_users
        .iter()
        .find(|u| usable(u) && role_of(u) == UserRole::TenantAdmin)
    {
        return vec![admin.id];
    }
    if let Some(anyone) = tenant_users.iter().find(|u| usable(u)) {
        return vec![anyone.id];
    }
    if let Some(owner) = owner {
        if usable(owner) {
            return vec![owner.id];
        }
    }
    out
}

/// Query the user pools and run the resolution chain.
pub fn resolve_approvers_for_assessment(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    owner_id: Uuid,
    team_ids: &[Uuid],
    submitter: Uuid,
) -> GovResult<Vec<Uuid>> {
    let owner: Option<DbUser> = users::table.find(owner_id).first(conn).optional()?;
    let team: Vec<DbUser> = if team_ids.is_empty() {
        Vec::new()
    } else {
        users::table
            .filter(users::tenant_id.eq(tenant_id))
            .filter(users::id.eq_any(team_ids))
            .load(conn)?
    };
    let tenant_users = crate::directory::active_tenant_users(conn, tenant_id)?;
    Ok(resolve_approvers(
        owner.as_ref(),
        &team,
        &tenant_users,
        submitter,
    ))
}

// ============================================================================
// INSTANCE LIFECYCLE
// ============================================================================

pub fn active_instance(
    conn: &mut PgConnection,
    assignment_id: Uuid,
) -> QueryResult<Option<DbApprovalInstance>> {
    approval_instances::table
        .filter(approval_instances::assignment_id.eq(assignment_id))
        .filter(approval_instances::status.eq(InstanceStatus::InProgress.to_string()))
        .first(conn)
        .optional()
}

fn insert_step_row(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    instance_id: Uuid,
    cfg: &StepConfig,
    assigned_to: Option<Uuid>,
    status: StepStatus,
) -> QueryResult<DbApprovalStep> {
    let step = DbApprovalStep {
        id: Uuid::new_v4(),
        tenant_id,
        instance_id,
        step_number: cfg.step_number,
        step_name: cfg.step_name.clone(),
        status: status.to_string(),
        assigned_to,
        assigned_role: if cfg.auto_assign {
            Some(cfg.assigned_role.clone())
        } else {
            None
        },
        decision: None,
        comment: None,
        acted_by: None,
        acted_at: None,
        created_at: Utc::now(),
    };
    diesel::insert_into(approval_steps::table)
        .values(&step)
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(step)
}

pub struct ApprovalTarget<'a> {
    pub assignment_id: Uuid,
    pub assessment_name: &'a str,
    pub owner_id: Uuid,
    pub team_ids: &'a [Uuid],
    pub workflow_ticket_id: Option<&'a str>,
    pub due_date: Option<DateTime<Utc>>,
}

fn approval_items_for(
    conn: &mut PgConnection,
    ctx: &RequestContext,
    target: &ApprovalTarget<'_>,
    step: &StepConfig,
    approvers: &[Uuid],
) -> GovResult<usize> {
    // Review-type steps surface as review tasks, everything else as
    // approval tasks.
    let (source_type, action_type) = if step.is_approval() {
        (SourceType::AssessmentApproval, "approval")
    } else {
        (SourceType::AssessmentReview, "review")
    };
    let mut created = 0;
    for approver in approvers {
        created += insert_action_item(
            conn,
            ActionItemSpec {
                tenant_id: ctx.tenant_id,
                title: format!("{}: {}", step.step_name, target.assessment_name),
                description: Some(format!(
                    "Assessment submission awaiting {}",
                    step.step_name.to_lowercase()
                )),
                action_type: action_type.to_string(),
                source_type,
                source_id: target.assignment_id,
                assigned_to: *approver,
                assigned_role: Some(step.assigned_role.clone()),
                priority: Priority::High,
                workflow_ticket_id: target.workflow_ticket_id.map(str::to_string),
                payload: serde_json::json!({ "step_number": step.step_number }),
                due_date: target.due_date,
            },
        )?;
    }
    Ok(created)
}

/// Start (or return the already-running) approval chain for a completed
/// assignment. Concurrent submitters are serialized by the partial unique
/// index on `approval_instances`.
pub fn start_approval(
    conn: &mut PgConnection,
    ctx: &RequestContext,
    target: &ApprovalTarget<'_>,
) -> GovResult<DbApprovalInstance> {
    if let Some(existing) = active_instance(conn, target.assignment_id)? {
        return Ok(existing);
    }

    let steps = resolve_workflow_steps(conn, ctx.tenant_id);
    let first = first_step(&steps)
        .ok_or_else(|| GovError::Internal("resolved workflow has no steps".to_string()))?;

    let now = Utc::now();
    let created_id = Uuid::new_v4();
    let instance = DbApprovalInstance {
        id: created_id,
        tenant_id: ctx.tenant_id,
        assignment_id: target.assignment_id,
        status: InstanceStatus::InProgress.to_string(),
        current_step: first.step_number,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(approval_instances::table)
        .values(&instance)
        .on_conflict_do_nothing()
        .execute(conn)?;

    // Re-read in case a concurrent submit won the insert race.
    let instance = active_instance(conn, target.assignment_id)?
        .ok_or_else(|| GovError::Internal("approval instance vanished".to_string()))?;
    if instance.id != created_id {
        return Ok(instance);
    }

    insert_step_row(
        conn,
        ctx.tenant_id,
        instance.id,
        first,
        None,
        StepStatus::InProgress,
    )?;

    let approvers = resolve_approvers_for_assessment(
        conn,
        ctx.tenant_id,
        target.owner_id,
        target.team_ids,
        ctx.user_id(),
    )?;
    if approvers.is_empty() {
        warn!(
            "no approvers resolved for assignment {}, approval chain is unassigned",
            target.assignment_id
        );
    }
    approval_items_for(conn, ctx, target, first, &approvers)?;

    Ok(instance)
}

/// Advance the instance after an accept on a non-final step. Creates the
/// next step row (targeted at `forward_to` when given) and its action
/// items. Returns the step the instance moved to.
pub fn advance_instance(
    conn: &mut PgConnection,
    ctx: &RequestContext,
    instance: &DbApprovalInstance,
    target: &ApprovalTarget<'_>,
    next: &StepConfig,
    forward_to: Option<Uuid>,
) -> GovResult<StepConfig> {
    diesel::update(approval_instances::table.find(instance.id))
        .set((
            approval_instances::current_step.eq(next.step_number),
            approval_instances::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;

    insert_step_row(
        conn,
        ctx.tenant_id,
        instance.id,
        next,
        forward_to,
        StepStatus::InProgress,
    )?;

    let approvers = match forward_to {
        Some(user) => vec![user],
        None => resolve_approvers_for_assessment(
            conn,
            ctx.tenant_id,
            target.owner_id,
            target.team_ids,
            ctx.user_id(),
        )?,
    };
    approval_items_for(conn, ctx, target, next, &approvers)?;
    Ok(next.clone())
}

/// Close out the current step row with the actor's verdict.
pub fn complete_current_step(
    conn: &mut PgConnection,
    instance: &DbApprovalInstance,
    decision: &str,
    comment: Option<&str>,
    actor: Uuid,
) -> GovResult<()> {
    let now = Utc::now();
    diesel::update(
        approval_steps::table
            .filter(approval_steps::instance_id.eq(instance.id))
            .filter(approval_steps::step_number.eq(instance.current_step)),
    )
    .set((
        approval_steps::status.eq(StepStatus::Completed.to_string()),
        approval_steps::decision.eq(Some(decision.to_string())),
        approval_steps::comment.eq(comment.map(str::to_string)),
        approval_steps::acted_by.eq(Some(actor)),
        approval_steps::acted_at.eq(Some(now)),
    ))
    .execute(conn)?;
    Ok(())
}

pub fn finish_instance(
    conn: &mut PgConnection,
    instance: &DbApprovalInstance,
    status: InstanceStatus,
) -> GovResult<()> {
    diesel::update(approval_instances::table.find(instance.id))
        .set((
            approval_instances::status.eq(status.to_string()),
            approval_instances::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

// ============================================================================
// CONFIGURATION API
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub request_type: Option<String>,
    pub workflow_steps: serde_json::Value,
    pub is_default: Option<bool>,
}

pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateWorkflowRequest>,
) -> GovResult<Json<DbWorkflowConfiguration>> {
    let pool = state.conn.clone();
    let cfg = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        if !ctx.is_admin() {
            return Err(GovError::Permission(
                "only admins may configure workflows".to_string(),
            ));
        }

        // Validate at write time so readers never see malformed chains.
        parse_steps(&req.workflow_steps).map_err(GovError::Validation)?;

        let now = Utc::now();
        let cfg = DbWorkflowConfiguration {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: req.name,
            request_type: req
                .request_type
                .unwrap_or_else(|| ASSESSMENT_REQUEST_TYPE.to_string()),
            workflow_steps: req.workflow_steps,
            is_default: req.is_default.unwrap_or(false),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(workflow_configurations::table)
            .values(&cfg)
            .execute(&mut conn)?;
        Ok::<_, GovError>(cfg)
    })
    .await??;
    Ok(Json(cfg))
}

pub async fn list_workflows(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> GovResult<Json<Vec<DbWorkflowConfiguration>>> {
    let pool = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;
        let list: Vec<DbWorkflowConfiguration> = workflow_configurations::table
            .filter(workflow_configurations::tenant_id.eq(ctx.tenant_id))
            .filter(workflow_configurations::is_active.eq(true))
            .order(workflow_configurations::created_at.desc())
            .load(&mut conn)?;
        Ok::<_, GovError>(list)
    })
    .await??;
    Ok(Json(list))
}

pub fn configure_workflow_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/workflows", get(list_workflows).post(create_workflow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::{inactive_user, user};

    #[test]
    fn parse_steps_rejects_non_array() {
        assert!(parse_steps(&serde_json::json!({"step_number": 1})).is_err());
        assert!(parse_steps(&serde_json::json!("steps")).is_err());
    }

    #[test]
    fn parse_steps_rejects_missing_or_duplicate_numbers() {
        assert!(parse_steps(&serde_json::json!([{"step_name": "Review"}])).is_err());
        let dup = serde_json::json!([
            {"step_number": 1, "step_name": "A"},
            {"step_number": 1, "step_name": "B"}
        ]);
        assert!(parse_steps(&dup).is_err());
        assert!(parse_steps(&serde_json::json!([])).is_err());
        assert!(parse_steps(&serde_json::json!([{"step_number": 0}])).is_err());
    }

    #[test]
    fn parse_steps_sorts_and_defaults() {
        let steps = parse_steps(&serde_json::json!([
            {"step_number": 2, "step_name": "Final Approval"},
            {"step_number": 1}
        ]))
        .unwrap();
        assert_eq!(steps[0].step_number, 1);
        assert_eq!(steps[0].step_name, "Step 1");
        assert_eq!(steps[0].assigned_role, "approver");
        assert!(steps[0].auto_assign);
        assert_eq!(steps[1].step_name, "Final Approval");
    }

    #[test]
    fn next_step_selection() {
        let steps = default_steps();
        assert_eq!(next_step_after(&steps, 1).unwrap().step_number, 2);
        assert!(next_step_after(&steps, 2).is_none());
        // gaps in numbering are allowed
        let gapped = parse_steps(&serde_json::json!([
            {"step_number": 10}, {"step_number": 30}
        ]))
        .unwrap();
        assert_eq!(next_step_after(&gapped, 10).unwrap().step_number, 30);
    }

    #[test]
    fn approver_owner_takes_precedence() {
        let owner = user("owner", "approver");
        let team = vec![user("team-approver", "approver")];
        let tenant = vec![user("other", "reviewer")];
        let submitter = Uuid::new_v4();
        let resolved = resolve_approvers(Some(&owner), &team, &tenant, submitter);
        assert_eq!(resolved, vec![owner.id]);
    }

    #[test]
    fn approver_submitter_is_always_excluded() {
        let owner = user("owner", "approver");
        let team = vec![user("team-approver", "approver")];
        let resolved = resolve_approvers(Some(&owner), &team, &[], owner.id);
        assert_eq!(resolved, vec![team[0].id]);
    }

    #[test]
    fn approver_tenant_pool_excludes_tenant_admin_until_fallback() {
        let admin = user("admin", "tenant_admin");
        let reviewer = user("reviewer", "reviewer");
        let tenant = vec![admin.clone(), reviewer.clone()];
        let resolved = resolve_approvers(None, &[], &tenant, Uuid::new_v4());
        assert_eq!(resolved, vec![reviewer.id]);
    }

    #[test]
    fn approver_fallback_chain() {
        let submitter = user("submitter", "vendor_user");
        let admin = user("admin", "tenant_admin");
        let member = user("member", "member");

        // tenant admin preferred
        let resolved = resolve_approvers(
            None,
            &[],
            &[member.clone(), admin.clone(), submitter.clone()],
            submitter.id,
        );
        assert_eq!(resolved, vec![admin.id]);

        // then any active non-submitter
        let resolved =
            resolve_approvers(None, &[], &[member.clone(), submitter.clone()], submitter.id);
        assert_eq!(resolved, vec![member.id]);

        // owner as last resort
        let owner = user("owner", "member");
        let resolved = resolve_approvers(Some(&owner), &[], &[submitter.clone()], submitter.id);
        assert_eq!(resolved, vec![owner.id]);

        // nobody left
        let resolved = resolve_approvers(Some(&owner), &[], &[], owner.id);
        assert!(resolved.is_empty());
    }

    #[test]
    fn approver_inactive_users_are_skipped() {
        let gone = inactive_user("gone", "approver");
        let live = user("live", "reviewer");
        let resolved =
            resolve_approvers(Some(&gone), &[gone.clone()], &[live.clone()], Uuid::new_v4());
        assert_eq!(resolved, vec![live.id]);
    }
}
