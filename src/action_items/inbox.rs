//! Inbox aggregation: one ranked, deduplicated, paginated task list per
//! user, unioned from five sources. Each source is queried in its own
//! error-isolated block so one failing source degrades to zero items
//! instead of failing the whole request. Counts are computed over the
//! unfiltered set before the caller's filters are applied.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::action_items::DbActionItem;
use crate::agents::{classify_onboarding, DbOnboardingRequest};
use crate::core::shared::enums::{Priority, SourceType, UserRole};
use crate::core::shared::error::{GovError, GovResult};
use crate::core::shared::schema::{
    action_items, approval_instances, approval_steps, assessment_assignments, messages,
    onboarding_requests, support_tickets,
};
use crate::core::shared::state::AppState;
use crate::directory::{resolve_context, RequestContext};

#[derive(Debug, Clone, Serialize)]
pub struct InboxItem {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub action_type: String,
    pub source_type: String,
    pub source_id: Uuid,
    pub status: String,
    pub priority: String,
    pub workflow_ticket_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InboxItem {
    pub fn is_open(&self) -> bool {
        matches!(self.status.as_str(), "pending" | "in_progress" | "open")
    }

    fn dedup_key(&self) -> String {
        match self.workflow_ticket_id.as_deref() {
            Some(ticket) if !ticket.is_empty() => format!("t:{ticket}"),
            _ => format!("s:{}:{}", self.source_type, self.source_id),
        }
    }

    /// Used to pick the survivor when two items collapse: higher priority,
    /// then the richer record.
    fn richness(&self) -> (u8, u8) {
        let detail = u8::from(self.description.is_some()) + u8::from(self.due_date.is_some());
        (Priority::rank_str(&self.priority), detail)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InboxCounts {
    pub pending_count: usize,
    pub completed_count: usize,
    pub overdue_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    pub status: Option<String>,
    pub action_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct InboxResponse {
    pub items: Vec<InboxItem>,
    pub total: usize,
    pub pending_count: usize,
    pub completed_count: usize,
    pub overdue_count: usize,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// ROLE-DEPENDENT QUERY SHAPE
// ============================================================================

/// Which assessment-related source types a role may see in its inbox.
/// Vendor-side roles never see approval/review traffic.
pub fn allowed_assessment_sources(role: UserRole) -> Vec<SourceType> {
    match role {
        UserRole::PlatformAdmin | UserRole::TenantAdmin => vec![
            SourceType::AssessmentAssignment,
            SourceType::AssessmentResubmission,
            SourceType::AssessmentApproval,
            SourceType::AssessmentReview,
        ],
        UserRole::Approver | UserRole::Reviewer => vec![
            SourceType::AssessmentApproval,
            SourceType::AssessmentReview,
        ],
        UserRole::VendorUser | UserRole::Member => vec![
            SourceType::AssessmentAssignment,
            SourceType::AssessmentResubmission,
        ],
    }
}

/// Resource types whose public messages a role may see.
pub fn visible_resource_types(role: UserRole) -> Vec<&'static str> {
    match role {
        UserRole::VendorUser | UserRole::Member => vec!["assessment"],
        _ => vec!["assessment", "agent", "vendor", "ticket"],
    }
}

// ============================================================================
// SOURCES
// ============================================================================

fn gather_approval_steps(
    conn: &mut PgConnection,
    ctx: &RequestContext,
) -> GovResult<Vec<InboxItem>> {
    let mut q = approval_steps::table
        .filter(approval_steps::tenant_id.eq(ctx.tenant_id))
        .filter(approval_steps::status.eq_any(vec!["pending", "in_progress"]))
        .into_boxed();
    if !ctx.is_admin() {
        let role = ctx.role().to_string();
        q = q.filter(
            approval_steps::assigned_to
                .eq(ctx.user_id())
                .or(approval_steps::assigned_role.eq(role)),
        );
    }
    let steps: Vec<crate::assessments::workflow::DbApprovalStep> =
        q.order(approval_steps::created_at.desc()).load(conn)?;
    if steps.is_empty() {
        return Ok(Vec::new());
    }

    let instance_ids: Vec<Uuid> = steps.iter().map(|s| s.instance_id).collect();
    let instances: Vec<crate::assessments::workflow::DbApprovalInstance> =
        approval_instances::table
            .filter(approval_instances::id.eq_any(&instance_ids))
            .load(conn)?;
    let assignment_of: HashMap<Uuid, Uuid> = instances
        .iter()
        .map(|i| (i.id, i.assignment_id))
        .collect();

    let assignment_ids: Vec<Uuid> = instances.iter().map(|i| i.assignment_id).collect();
    let assignments: Vec<crate::assessments::DbAssignment> = assessment_assignments::table
        .filter(assessment_assignments::id.eq_any(&assignment_ids))
        .load(conn)?;
    let by_assignment: HashMap<Uuid, &crate::assessments::DbAssignment> =
        assignments.iter().map(|a| (a.id, a)).collect();

    let items = steps
        .iter()
        .filter_map(|step| {
            let assignment_id = *assignment_of.get(&step.instance_id)?;
            let assignment = by_assignment.get(&assignment_id);
            Some(InboxItem {
                id: step.id,
                title: step.step_name.clone(),
                description: None,
                action_type: "approval".to_string(),
                source_type: SourceType::AssessmentApproval.to_string(),
                source_id: assignment_id,
                status: step.status.clone(),
                priority: Priority::High.to_string(),
                workflow_ticket_id: assignment
                    .and_then(|a| a.workflow_ticket_id.clone()),
                due_date: assignment.and_then(|a| a.due_date),
                assigned_at: step.created_at,
                completed_at: step.acted_at,
            })
        })
        .collect();
    Ok(items)
}

fn gather_action_items(
    conn: &mut PgConnection,
    ctx: &RequestContext,
) -> GovResult<Vec<InboxItem>> {
    let sources: Vec<String> = allowed_assessment_sources(ctx.role())
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let mut q = action_items::table
        .filter(action_items::tenant_id.eq(ctx.tenant_id))
        .filter(action_items::source_type.eq_any(sources))
        .into_boxed();
    if !ctx.is_admin() {
        q = q.filter(action_items::assigned_to.eq(ctx.user_id()));
    }
    let rows: Vec<DbActionItem> = q.order(action_items::assigned_at.desc()).load(conn)?;

    // Approver-class items are hidden once the underlying assignment is
    // terminal; vendor-side items always show.
    let approval_like = [
        SourceType::AssessmentApproval.to_string(),
        SourceType::AssessmentReview.to_string(),
    ];
    let assignment_ids: Vec<Uuid> = rows
        .iter()
        .filter(|r| approval_like.contains(&r.source_type))
        .map(|r| r.source_id)
        .collect();
    let settled: Vec<Uuid> = if assignment_ids.is_empty() {
        Vec::new()
    } else {
        assessment_assignments::table
            .filter(assessment_assignments::id.eq_any(&assignment_ids))
            .filter(assessment_assignments::status.eq_any(vec!["approved", "rejected"]))
            .select(assessment_assignments::id)
            .load(conn)?
    };

    let items = rows
        .into_iter()
        .filter(|r| {
            !(approval_like.contains(&r.source_type) && settled.contains(&r.source_id))
        })
        .map(|r| InboxItem {
            id: r.id,
            title: r.title,
            description: r.description,
            action_type: r.action_type,
            source_type: r.source_type,
            source_id: r.source_id,
            status: r.status,
            priority: r.priority,
            workflow_ticket_id: r.workflow_ticket_id,
            due_date: r.due_date,
            assigned_at: r.assigned_at,
            completed_at: r.completed_at,
        })
        .collect();
    Ok(items)
}

fn gather_onboarding(
    conn: &mut PgConnection,
    ctx: &RequestContext,
) -> GovResult<Vec<InboxItem>> {
    let mut q = onboarding_requests::table
        .filter(onboarding_requests::tenant_id.eq(ctx.tenant_id))
        .filter(onboarding_requests::status.eq("in_progress"))
        .into_boxed();
    if !ctx.is_admin() {
        q = q.filter(onboarding_requests::assigned_to.eq(ctx.user_id()));
    }
    let rows: Vec<DbOnboardingRequest> =
        q.order(onboarding_requests::created_at.desc()).load(conn)?;

    let items = rows
        .into_iter()
        .map(|r| InboxItem {
            id: r.id,
            title: "Agent onboarding".to_string(),
            description: None,
            action_type: classify_onboarding(&r.workflow_steps, r.current_step).to_string(),
            source_type: SourceType::OnboardingRequest.to_string(),
            source_id: r.agent_id,
            status: "pending".to_string(),
            priority: Priority::Medium.to_string(),
            workflow_ticket_id: None,
            due_date: None,
            assigned_at: r.created_at,
            completed_at: r.completed_at,
        })
        .collect();
    Ok(items)
}

fn gather_tickets(conn: &mut PgConnection, ctx: &RequestContext) -> GovResult<Vec<InboxItem>> {
    let mut q = support_tickets::table
        .filter(support_tickets::tenant_id.eq(ctx.tenant_id))
        .filter(support_tickets::status.eq_any(vec!["open", "in_progress"]))
        .into_boxed();
    if !ctx.is_admin() {
        q = q.filter(support_tickets::assignee_id.eq(ctx.user_id()));
    }
    let rows: Vec<crate::tickets::SupportTicket> =
        q.order(support_tickets::created_at.desc()).load(conn)?;

    let items = rows
        .into_iter()
        .map(|t| InboxItem {
            id: t.id,
            title: t.subject,
            description: t.description,
            action_type: "ticket".to_string(),
            source_type: SourceType::Ticket.to_string(),
            source_id: t.id,
            status: if t.status == "open" {
                "pending".to_string()
            } else {
                t.status
            },
            priority: t.priority,
            workflow_ticket_id: Some(t.ticket_number),
            due_date: t.due_date,
            assigned_at: t.created_at,
            completed_at: t.resolved_at,
        })
        .collect();
    Ok(items)
}

fn gather_messages(conn: &mut PgConnection, ctx: &RequestContext) -> GovResult<Vec<InboxItem>> {
    let visible: Vec<String> = visible_resource_types(ctx.role())
        .into_iter()
        .map(str::to_string)
        .collect();
    let rows: Vec<crate::messages::DbMessage> = messages::table
        .filter(messages::tenant_id.eq(ctx.tenant_id))
        .filter(messages::is_read.eq(false))
        .filter(
            messages::recipient_id.eq(ctx.user_id()).or(messages::is_public
                .eq(true)
                .and(messages::resource_type.eq_any(visible))),
        )
        .order(messages::created_at.desc())
        .load(conn)?;

    let items = rows
        .into_iter()
        .map(|m| InboxItem {
            id: m.id,
            title: m.subject,
            description: Some(m.body),
            action_type: "message".to_string(),
            source_type: SourceType::Message.to_string(),
            source_id: m.id,
            status: "pending".to_string(),
            priority: Priority::Low.to_string(),
            workflow_ticket_id: None,
            due_date: None,
            assigned_at: m.created_at,
            completed_at: None,
        })
        .collect();
    Ok(items)
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Collapse duplicates, preferring the higher-priority / richer record.
/// First key: workflow ticket id; fallback: (source_type, source_id).
pub fn dedupe_inbox(items: Vec<InboxItem>) -> Vec<InboxItem> {
    let mut out: Vec<InboxItem> = Vec::with_capacity(items.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for item in items {
        let key = item.dedup_key();
        match index.get(&key) {
            Some(&at) => {
                if item.richness() > out[at].richness() {
                    out[at] = item;
                }
            }
            None => {
                index.insert(key, out.len());
                out.push(item);
            }
        }
    }
    out
}

/// Counts over the full, unfiltered set; callers apply filters afterwards.
pub fn compute_counts(items: &[InboxItem], now: DateTime<Utc>) -> InboxCounts {
    let mut counts = InboxCounts::default();
    for item in items {
        if item.is_open() {
            counts.pending_count += 1;
            if item.due_date.is_some_and(|d| d < now) {
                counts.overdue_count += 1;
            }
        } else if item.status == "completed" {
            counts.completed_count += 1;
        }
    }
    counts
}

pub fn apply_filters(
    items: Vec<InboxItem>,
    status: Option<&str>,
    action_type: Option<&str>,
) -> Vec<InboxItem> {
    items
        .into_iter()
        .filter(|i| status.is_none_or(|s| i.status == s))
        .filter(|i| action_type.is_none_or(|t| i.action_type == t))
        .collect()
}

pub fn sort_by_assigned_desc(items: &mut [InboxItem]) {
    items.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at));
}

pub fn paginate(items: Vec<InboxItem>, offset: i64, limit: i64) -> Vec<InboxItem> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

fn source_or_empty(
    label: &str,
    result: GovResult<Vec<InboxItem>>,
) -> Vec<InboxItem> {
    match result {
        Ok(items) => items,
        Err(e) => {
            warn!("inbox source {label} failed, returning no items: {e}");
            Vec::new()
        }
    }
}

/// Union all five sources. Individual failures degrade to empty slices.
pub fn aggregate_inbox(conn: &mut PgConnection, ctx: &RequestContext) -> Vec<InboxItem> {
    let mut all = Vec::new();
    all.extend(source_or_empty(
        "approval_steps",
        gather_approval_steps(conn, ctx),
    ));
    all.extend(source_or_empty("action_items", gather_action_items(conn, ctx)));
    all.extend(source_or_empty("onboarding", gather_onboarding(conn, ctx)));
    all.extend(source_or_empty("tickets", gather_tickets(conn, ctx)));
    all.extend(source_or_empty("messages", gather_messages(conn, ctx)));
    all
}

pub async fn get_user_inbox(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<InboxQuery>,
) -> GovResult<Json<InboxResponse>> {
    let pool = state.conn.clone();
    let response = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let ctx = resolve_context(&mut conn, &headers)?;

        let gathered = aggregate_inbox(&mut conn, &ctx);
        let deduped = dedupe_inbox(gathered);
        let counts = compute_counts(&deduped, Utc::now());

        let mut filtered = apply_filters(
            deduped,
            query.status.as_deref(),
            query.action_type.as_deref(),
        );
        sort_by_assigned_desc(&mut filtered);

        let total = filtered.len();
        let limit = query.limit.unwrap_or(50);
        let offset = query.offset.unwrap_or(0);
        let items = paginate(filtered, offset, limit);

        Ok::<_, GovError>(InboxResponse {
            items,
            total,
            pending_count: counts.pending_count,
            completed_count: counts.completed_count,
            overdue_count: counts.overdue_count,
            limit,
            offset,
        })
    })
    .await??;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::ts;

    fn item(source_type: SourceType, ticket: Option<&str>, status: &str) -> InboxItem {
        InboxItem {
            id: Uuid::new_v4(),
            title: "item".to_string(),
            description: None,
            action_type: "approval".to_string(),
            source_type: source_type.to_string(),
            source_id: Uuid::from_u128(7),
            status: status.to_string(),
            priority: "medium".to_string(),
            workflow_ticket_id: ticket.map(str::to_string),
            due_date: None,
            assigned_at: ts(0),
            completed_at: None,
        }
    }

    #[test]
    fn dedupe_collapses_shared_ticket_ids() {
        let a = item(SourceType::AssessmentApproval, Some("ASMT-2026-017"), "pending");
        let mut b = item(SourceType::Ticket, Some("ASMT-2026-017"), "pending");
        b.source_id = Uuid::from_u128(99);
        let out = dedupe_inbox(vec![a, b]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn dedupe_falls_back_to_source_pair() {
        let a = item(SourceType::AssessmentApproval, None, "pending");
        let b = item(SourceType::AssessmentApproval, None, "pending");
        // same source pair, no tickets
        let out = dedupe_inbox(vec![a, b]);
        assert_eq!(out.len(), 1);

        let c = item(SourceType::AssessmentReview, None, "pending");
        let d = item(SourceType::AssessmentApproval, None, "pending");
        let out = dedupe_inbox(vec![c, d]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn dedupe_keeps_the_richer_duplicate() {
        let poor = item(SourceType::AssessmentApproval, Some("T-1"), "pending");
        let mut rich = item(SourceType::AssessmentApproval, Some("T-1"), "pending");
        rich.priority = "critical".to_string();
        rich.description = Some("details".to_string());
        let rich_id = rich.id;
        let out = dedupe_inbox(vec![poor, rich]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, rich_id);
    }

    #[test]
    fn counts_are_computed_before_filters() {
        let mut open = item(SourceType::AssessmentAssignment, None, "pending");
        open.action_type = "assignment".to_string();
        let mut done = item(SourceType::AssessmentReview, None, "completed");
        done.completed_at = Some(ts(10));
        let mut late = item(SourceType::Ticket, Some("TKT-000001"), "pending");
        late.due_date = Some(ts(-100));
        late.action_type = "ticket".to_string();

        let all = vec![open, done, late];
        let counts = compute_counts(&all, ts(0));
        assert_eq!(counts.pending_count, 2);
        assert_eq!(counts.completed_count, 1);
        assert_eq!(counts.overdue_count, 1);

        // the status filter shrinks the list but must not shrink the counts
        let filtered = apply_filters(all, Some("completed"), None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(counts.pending_count, 2);
    }

    #[test]
    fn vendor_roles_never_see_approval_sources() {
        let sources = allowed_assessment_sources(UserRole::VendorUser);
        assert!(!sources.contains(&SourceType::AssessmentApproval));
        assert!(!sources.contains(&SourceType::AssessmentReview));
        assert!(sources.contains(&SourceType::AssessmentAssignment));
        assert!(sources.contains(&SourceType::AssessmentResubmission));

        let approver = allowed_assessment_sources(UserRole::Approver);
        assert!(approver.contains(&SourceType::AssessmentApproval));
        assert!(!approver.contains(&SourceType::AssessmentAssignment));

        let admin = allowed_assessment_sources(UserRole::TenantAdmin);
        assert_eq!(admin.len(), 4);
    }

    #[test]
    fn sorting_is_assigned_at_descending() {
        let mut early = item(SourceType::Ticket, Some("a"), "pending");
        early.assigned_at = ts(0);
        let mut late = item(SourceType::Ticket, Some("b"), "pending");
        late.assigned_at = ts(100);
        let mut items = vec![early, late];
        sort_by_assigned_desc(&mut items);
        assert_eq!(items[0].workflow_ticket_id.as_deref(), Some("b"));
    }

    #[test]
    fn pagination_applies_after_everything_else() {
        let items: Vec<InboxItem> = (0..10)
            .map(|i| {
                let mut it = item(SourceType::Ticket, None, "pending");
                it.source_id = Uuid::from_u128(i);
                it
            })
            .collect();
        let page = paginate(items.clone(), 8, 5);
        assert_eq!(page.len(), 2);
        let page = paginate(items, 0, 3);
        assert_eq!(page.len(), 3);
    }
}
