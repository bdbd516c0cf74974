//! Assessment workflow service: drives an assignment from creation through
//! response collection, completion detection, review, and the final
//! decision. Constructed per request with an explicit [`RequestContext`].

use chrono::{Datelike, Utc};
use diesel::prelude::*;
use log::warn;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::action_items::{complete_open_items, insert_action_item, ActionItemSpec};
use crate::assessments::workflow::{
    active_instance, advance_instance, complete_current_step, finish_instance, next_step_after,
    resolve_workflow_steps, start_approval, ApprovalTarget,
};
use crate::assessments::{
    record_history, DbAssessment, DbAssessmentQuestion, DbAssignment, DbQuestionResponse,
    DbQuestionReview, DbRequirementResponse,
};
use crate::core::shared::enums::{
    ApprovalDecision, AssignmentStatus, InstanceStatus, Priority, ReviewStatus, SourceType,
};
use crate::core::shared::error::{GovError, GovResult};
use crate::core::shared::schema::{
    agents, assessment_assignments, assessment_question_responses, assessment_question_reviews,
    assessment_questions, assessments, submission_requirement_responses, users, vendors,
};
use crate::directory::RequestContext;

pub const QUESTION_TYPE_REQUIREMENT: &str = "requirement_reference";

// ============================================================================
// COMPLETION RULES
// ============================================================================

pub fn has_answer(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct QuestionCompletion {
    pub id: Uuid,
    pub is_required: bool,
}

/// An assignment is complete when every required question is answered.
/// When nothing is marked required, every question must be answered; this
/// asymmetry is deliberate and mirrors how authors use the required flag.
pub fn completion_satisfied(questions: &[QuestionCompletion], answered: &HashSet<Uuid>) -> bool {
    let required: Vec<&QuestionCompletion> =
        questions.iter().filter(|q| q.is_required).collect();
    if required.is_empty() {
        questions.iter().all(|q| answered.contains(&q.id))
    } else {
        required.iter().all(|q| answered.contains(&q.id))
    }
}

pub fn format_workflow_ticket(year: i32, seq: i64) -> String {
    format!("ASMT-{year}-{seq:03}")
}

// ============================================================================
// REQUESTS / OUTCOMES
// ============================================================================

#[derive(Debug, serde::Deserialize)]
pub struct CreateAssignmentRequest {
    pub vendor_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub due_date: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, serde::Deserialize)]
pub struct ResponsePayload {
    pub question_id: Uuid,
    pub value: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct SaveResponsesRequest {
    pub responses: Vec<ResponsePayload>,
    #[serde(default)]
    pub is_draft: bool,
}

#[derive(Debug, Serialize)]
pub struct SaveResponsesOutcome {
    pub assignment_id: Uuid,
    pub status: String,
    pub completed: bool,
    pub workflow_ticket_id: Option<String>,
    pub answered_count: usize,
    pub question_count: usize,
}

#[derive(Debug, serde::Deserialize)]
pub struct ReviewQuestionRequest {
    pub question_id: Uuid,
    pub status: String,
    pub comment: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct FinalDecisionRequest {
    pub decision: String,
    pub comment: Option<String>,
    pub forward_to: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DecisionOutcome {
    pub assignment_id: Uuid,
    pub status: String,
    pub is_final: bool,
    pub next_step: Option<i32>,
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct AssessmentService {
    ctx: RequestContext,
}

impl AssessmentService {
    pub fn new(ctx: RequestContext) -> Self {
        Self { ctx }
    }

    fn load_assignment(
        &self,
        conn: &mut PgConnection,
        assignment_id: Uuid,
    ) -> GovResult<DbAssignment> {
        let assignment: Option<DbAssignment> = assessment_assignments::table
            .find(assignment_id)
            .filter(assessment_assignments::tenant_id.eq(self.ctx.tenant_id))
            .first(conn)
            .optional()?;
        assignment.ok_or_else(|| GovError::NotFound("Assignment not found".to_string()))
    }

    fn load_assessment(
        &self,
        conn: &mut PgConnection,
        assessment_id: Uuid,
    ) -> GovResult<DbAssessment> {
        let assessment: Option<DbAssessment> = assessments::table
            .find(assessment_id)
            .filter(assessments::tenant_id.eq(self.ctx.tenant_id))
            .filter(assessments::is_active.eq(true))
            .first(conn)
            .optional()?;
        assessment.ok_or_else(|| GovError::NotFound("Assessment not found".to_string()))
    }

    fn questions_for(
        &self,
        conn: &mut PgConnection,
        assessment_id: Uuid,
    ) -> GovResult<Vec<DbAssessmentQuestion>> {
        Ok(assessment_questions::table
            .filter(assessment_questions::assessment_id.eq(assessment_id))
            .order(assessment_questions::sort_order.asc())
            .load(conn)?)
    }

    /// Who should work on a fresh assignment: an explicit assignee, vendor
    /// users matched by contact email, or the assigner themselves.
    fn resolve_assignment_targets(
        &self,
        conn: &mut PgConnection,
        req: &CreateAssignmentRequest,
    ) -> GovResult<Vec<Uuid>> {
        if let Some(user) = req.assigned_to {
            return Ok(vec![user]);
        }
        if let Some(vendor_id) = req.vendor_id {
            let contact: Option<Option<String>> = vendors::table
                .find(vendor_id)
                .filter(vendors::tenant_id.eq(self.ctx.tenant_id))
                .select(vendors::contact_email)
                .first(conn)
                .optional()?;
            if let Some(Some(email)) = contact {
                let matched =
                    crate::directory::users_matching_contact(conn, self.ctx.tenant_id, &email)?;
                if !matched.is_empty() {
                    return Ok(matched.into_iter().map(|u| u.id).collect());
                }
            }
        }
        Ok(vec![self.ctx.user_id()])
    }

    pub fn create_assignment(
        &self,
        conn: &mut PgConnection,
        assessment_id: Uuid,
        req: CreateAssignmentRequest,
    ) -> GovResult<DbAssignment> {
        if !self.ctx.role().can_manage_assessments() {
            return Err(GovError::Permission(
                "not allowed to create assignments".to_string(),
            ));
        }
        let assessment = self.load_assessment(conn, assessment_id)?;

        let question_count: i64 = assessment_questions::table
            .filter(assessment_questions::assessment_id.eq(assessment.id))
            .count()
            .get_result(conn)?;
        if question_count == 0 {
            return Err(GovError::Validation(
                "assessment has no questions to answer".to_string(),
            ));
        }

        let targets = self.resolve_assignment_targets(conn, &req)?;
        let now = Utc::now();
        let assignment = DbAssignment {
            id: Uuid::new_v4(),
            tenant_id: self.ctx.tenant_id,
            assessment_id: assessment.id,
            vendor_id: req.vendor_id,
            agent_id: req.agent_id,
            assigned_to: targets.first().copied(),
            assigned_by: self.ctx.user_id(),
            status: AssignmentStatus::Pending.to_string(),
            workflow_ticket_id: None,
            due_date: req.due_date,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(assessment_assignments::table)
            .values(&assignment)
            .execute(conn)?;

        for target in &targets {
            insert_action_item(
                conn,
                ActionItemSpec {
                    tenant_id: self.ctx.tenant_id,
                    title: format!("Complete assessment: {}", assessment.name),
                    description: assessment.description.clone(),
                    action_type: "assignment".to_string(),
                    source_type: SourceType::AssessmentAssignment,
                    source_id: assignment.id,
                    assigned_to: *target,
                    assigned_role: None,
                    priority: Priority::Medium,
                    workflow_ticket_id: None,
                    payload: serde_json::json!({ "assessment_id": assessment.id }),
                    due_date: req.due_date,
                },
            )?;
        }

        record_history(
            conn,
            self.ctx.tenant_id,
            assignment.id,
            None,
            AssignmentStatus::Pending,
            Some(self.ctx.user_id()),
            None,
        );
        crate::audit::log_action(
            conn,
            self.ctx.tenant_id,
            Some(self.ctx.user_id()),
            "assignment_created",
            "assessment_assignment",
            Some(assignment.id),
            serde_json::json!({ "assessment_id": assessment.id }),
        );

        Ok(assignment)
    }

    fn upsert_response(
        &self,
        conn: &mut PgConnection,
        assignment: &DbAssignment,
        payload: &ResponsePayload,
    ) -> GovResult<()> {
        let now = Utc::now();
        let row = DbQuestionResponse {
            id: Uuid::new_v4(),
            tenant_id: self.ctx.tenant_id,
            assignment_id: assignment.id,
            question_id: payload.question_id,
            value: payload.value.clone(),
            comment: payload.comment.clone(),
            documents: serde_json::json!([]),
            responded_by: Some(self.ctx.user_id()),
            ai_evaluation: None,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(assessment_question_responses::table)
            .values(&row)
            .on_conflict((
                assessment_question_responses::assignment_id,
                assessment_question_responses::question_id,
            ))
            .do_update()
            .set((
                assessment_question_responses::value.eq(payload.value.clone()),
                assessment_question_responses::comment.eq(payload.comment.clone()),
                assessment_question_responses::responded_by.eq(Some(self.ctx.user_id())),
                assessment_question_responses::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn mirror_requirement_response(
        &self,
        conn: &mut PgConnection,
        agent_id: Uuid,
        requirement_id: Uuid,
        value: Option<&str>,
    ) -> GovResult<()> {
        let now = Utc::now();
        let row = DbRequirementResponse {
            id: Uuid::new_v4(),
            tenant_id: self.ctx.tenant_id,
            agent_id,
            requirement_id,
            value: value.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(submission_requirement_responses::table)
            .values(&row)
            .on_conflict((
                submission_requirement_responses::agent_id,
                submission_requirement_responses::requirement_id,
            ))
            .do_update()
            .set((
                submission_requirement_responses::value.eq(value.map(str::to_string)),
                submission_requirement_responses::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Answered question ids, sourced from stored responses and the
    /// requirement-response mirror.
    fn answered_questions(
        &self,
        conn: &mut PgConnection,
        assignment: &DbAssignment,
        questions: &[DbAssessmentQuestion],
    ) -> GovResult<HashSet<Uuid>> {
        let mut answered: HashSet<Uuid> = HashSet::new();

        let stored: Vec<(Uuid, Option<String>)> = assessment_question_responses::table
            .filter(assessment_question_responses::assignment_id.eq(assignment.id))
            .select((
                assessment_question_responses::question_id,
                assessment_question_responses::value,
            ))
            .load(conn)?;
        for (question_id, value) in stored {
            if has_answer(value.as_deref()) {
                answered.insert(question_id);
            }
        }

        if let Some(agent_id) = assignment.agent_id {
            let requirement_of: HashMap<Uuid, Uuid> = questions
                .iter()
                .filter(|q| q.question_type == QUESTION_TYPE_REQUIREMENT)
                .filter_map(|q| q.requirement_id.map(|r| (r, q.id)))
                .collect();
            if !requirement_of.is_empty() {
                let requirement_ids: Vec<Uuid> = requirement_of.keys().copied().collect();
                let mirrored: Vec<(Uuid, Option<String>)> =
                    submission_requirement_responses::table
                        .filter(submission_requirement_responses::agent_id.eq(agent_id))
                        .filter(
                            submission_requirement_responses::requirement_id
                                .eq_any(&requirement_ids),
                        )
                        .select((
                            submission_requirement_responses::requirement_id,
                            submission_requirement_responses::value,
                        ))
                        .load(conn)?;
                for (requirement_id, value) in mirrored {
                    if has_answer(value.as_deref()) {
                        if let Some(question_id) = requirement_of.get(&requirement_id) {
                            answered.insert(*question_id);
                        }
                    }
                }
            }
        }

        Ok(answered)
    }

    fn next_ticket_id(&self, conn: &mut PgConnection) -> GovResult<String> {
        let seq: i64 = assessment_assignments::table
            .filter(assessment_assignments::tenant_id.eq(self.ctx.tenant_id))
            .filter(assessment_assignments::workflow_ticket_id.is_not_null())
            .count()
            .get_result(conn)?;
        Ok(format_workflow_ticket(Utc::now().year(), seq + 1))
    }

    fn trigger_approval(
        &self,
        conn: &mut PgConnection,
        assessment: &DbAssessment,
        assignment: &DbAssignment,
    ) {
        let target = ApprovalTarget {
            assignment_id: assignment.id,
            assessment_name: &assessment.name,
            owner_id: assessment.owner_id,
            team_ids: &assessment.team_ids,
            workflow_ticket_id: assignment.workflow_ticket_id.as_deref(),
            due_date: assignment.due_date,
        };
        if let Err(e) = start_approval(conn, &self.ctx, &target) {
            warn!(
                "approval workflow start failed for assignment {}: {e}",
                assignment.id
            );
        }
    }

    pub fn save_responses(
        &self,
        conn: &mut PgConnection,
        assignment_id: Uuid,
        req: SaveResponsesRequest,
    ) -> GovResult<SaveResponsesOutcome> {
        let assignment = self.load_assignment(conn, assignment_id)?;
        let previous: AssignmentStatus = assignment
            .status
            .parse()
            .map_err(|e: String| GovError::Internal(e))?;
        if previous.is_terminal() {
            return Err(GovError::Validation(
                "assignment is closed to further responses".to_string(),
            ));
        }

        let questions = self.questions_for(conn, assignment.assessment_id)?;
        let known: HashSet<Uuid> = questions.iter().map(|q| q.id).collect();
        for payload in &req.responses {
            if !known.contains(&payload.question_id) {
                return Err(GovError::Validation(format!(
                    "question {} does not belong to this assessment",
                    payload.question_id
                )));
            }
        }

        let now = Utc::now();
        if previous == AssignmentStatus::Pending {
            diesel::update(assessment_assignments::table.find(assignment.id))
                .set((
                    assessment_assignments::status
                        .eq(AssignmentStatus::InProgress.to_string()),
                    assessment_assignments::started_at.eq(Some(now)),
                    assessment_assignments::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        let question_by_id: HashMap<Uuid, &DbAssessmentQuestion> =
            questions.iter().map(|q| (q.id, q)).collect();
        for payload in &req.responses {
            self.upsert_response(conn, &assignment, payload)?;
            let question = question_by_id[&payload.question_id];
            if question.question_type == QUESTION_TYPE_REQUIREMENT {
                if let (Some(agent_id), Some(requirement_id)) =
                    (assignment.agent_id, question.requirement_id)
                {
                    self.mirror_requirement_response(
                        conn,
                        agent_id,
                        requirement_id,
                        payload.value.as_deref(),
                    )?;
                }
            }
        }

        let current = if previous == AssignmentStatus::Pending {
            AssignmentStatus::InProgress
        } else {
            previous
        };

        if req.is_draft {
            return Ok(SaveResponsesOutcome {
                assignment_id: assignment.id,
                status: current.to_string(),
                completed: false,
                workflow_ticket_id: assignment.workflow_ticket_id.clone(),
                answered_count: 0,
                question_count: questions.len(),
            });
        }

        let answered = self.answered_questions(conn, &assignment, &questions)?;
        let completion: Vec<QuestionCompletion> = questions
            .iter()
            .map(|q| QuestionCompletion {
                id: q.id,
                is_required: q.is_required,
            })
            .collect();

        if !completion_satisfied(&completion, &answered) {
            return Ok(SaveResponsesOutcome {
                assignment_id: assignment.id,
                status: current.to_string(),
                completed: false,
                workflow_ticket_id: assignment.workflow_ticket_id.clone(),
                answered_count: answered.len(),
                question_count: questions.len(),
            });
        }

        let ticket = match &assignment.workflow_ticket_id {
            Some(ticket) => ticket.clone(),
            None => self.next_ticket_id(conn)?,
        };
        diesel::update(assessment_assignments::table.find(assignment.id))
            .set((
                assessment_assignments::status.eq(AssignmentStatus::Completed.to_string()),
                assessment_assignments::completed_at.eq(Some(now)),
                assessment_assignments::workflow_ticket_id.eq(Some(ticket.clone())),
                assessment_assignments::updated_at.eq(now),
            ))
            .execute(conn)?;

        let resubmission = previous.is_resubmission_origin()
            && previous != AssignmentStatus::InProgress;
        record_history(
            conn,
            self.ctx.tenant_id,
            assignment.id,
            Some(previous),
            AssignmentStatus::Completed,
            Some(self.ctx.user_id()),
            resubmission.then(|| "resubmission".to_string()),
        );
        crate::audit::log_action(
            conn,
            self.ctx.tenant_id,
            Some(self.ctx.user_id()),
            "assignment_completed",
            "assessment_assignment",
            Some(assignment.id),
            serde_json::json!({ "workflow_ticket_id": ticket, "resubmission": resubmission }),
        );

        // Approval is triggered synchronously but its failure does not undo
        // the saved responses.
        let assessment = self.load_assessment(conn, assignment.assessment_id)?;
        let mut updated = assignment.clone();
        updated.workflow_ticket_id = Some(ticket.clone());
        self.trigger_approval(conn, &assessment, &updated);

        Ok(SaveResponsesOutcome {
            assignment_id: assignment.id,
            status: AssignmentStatus::Completed.to_string(),
            completed: true,
            workflow_ticket_id: Some(ticket),
            answered_count: answered.len(),
            question_count: questions.len(),
        })
    }

    pub fn review_question(
        &self,
        conn: &mut PgConnection,
        assignment_id: Uuid,
        req: ReviewQuestionRequest,
    ) -> GovResult<DbQuestionReview> {
        if !self.ctx.role().can_approve() {
            return Err(GovError::Permission(
                "not allowed to review questions".to_string(),
            ));
        }
        let status: ReviewStatus = req
            .status
            .parse()
            .map_err(|e: String| GovError::Validation(e))?;
        if status.requires_comment() && !has_answer(req.comment.as_deref()) {
            return Err(GovError::Validation(format!(
                "a comment is required for a {status} verdict"
            )));
        }

        let assignment = self.load_assignment(conn, assignment_id)?;
        let questions = self.questions_for(conn, assignment.assessment_id)?;
        if !questions.iter().any(|q| q.id == req.question_id) {
            return Err(GovError::NotFound(
                "Question not found on this assessment".to_string(),
            ));
        }

        let now = Utc::now();
        let review = DbQuestionReview {
            id: Uuid::new_v4(),
            tenant_id: self.ctx.tenant_id,
            assignment_id: assignment.id,
            question_id: req.question_id,
            status: status.to_string(),
            comment: req.comment.clone(),
            reviewed_by: Some(self.ctx.user_id()),
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(assessment_question_reviews::table)
            .values(&review)
            .on_conflict((
                assessment_question_reviews::assignment_id,
                assessment_question_reviews::question_id,
            ))
            .do_update()
            .set((
                assessment_question_reviews::status.eq(status.to_string()),
                assessment_question_reviews::comment.eq(req.comment.clone()),
                assessment_question_reviews::reviewed_by.eq(Some(self.ctx.user_id())),
                assessment_question_reviews::updated_at.eq(now),
            ))
            .execute(conn)?;

        // When every question carries a non-pending verdict, the assignment
        // moves on to the approval chain.
        let reviews: Vec<(Uuid, String)> = assessment_question_reviews::table
            .filter(assessment_question_reviews::assignment_id.eq(assignment.id))
            .select((
                assessment_question_reviews::question_id,
                assessment_question_reviews::status,
            ))
            .load(conn)?;
        let verdicts: HashMap<Uuid, String> = reviews.into_iter().collect();
        let all_reviewed = questions.iter().all(|q| {
            verdicts
                .get(&q.id)
                .is_some_and(|s| s != &ReviewStatus::Pending.to_string())
        });
        if all_reviewed {
            let assessment = self.load_assessment(conn, assignment.assessment_id)?;
            self.trigger_approval(conn, &assessment, &assignment);
        }

        Ok(review)
    }

    /// Resubmission routing: the originally assigned user, then vendor
    /// users matched by contact email, then any active tenant user.
    fn resolve_resubmission_targets(
        &self,
        conn: &mut PgConnection,
        assignment: &DbAssignment,
    ) -> GovResult<Vec<Uuid>> {
        if let Some(user_id) = assignment.assigned_to {
            let active: Option<Uuid> = users::table
                .find(user_id)
                .filter(users::is_active.eq(true))
                .select(users::id)
                .first(conn)
                .optional()?;
            if let Some(id) = active {
                return Ok(vec![id]);
            }
        }
        if let Some(vendor_id) = assignment.vendor_id {
            let contact: Option<Option<String>> = vendors::table
                .find(vendor_id)
                .select(vendors::contact_email)
                .first(conn)
                .optional()?;
            if let Some(Some(email)) = contact {
                let matched =
                    crate::directory::users_matching_contact(conn, self.ctx.tenant_id, &email)?;
                if !matched.is_empty() {
                    return Ok(matched.into_iter().map(|u| u.id).collect());
                }
            }
        }
        let tenant_users = crate::directory::active_tenant_users(conn, self.ctx.tenant_id)?;
        Ok(tenant_users.first().map(|u| vec![u.id]).unwrap_or_default())
    }

    fn flagged_questions(
        &self,
        conn: &mut PgConnection,
        assignment_id: Uuid,
    ) -> GovResult<Vec<serde_json::Value>> {
        let flagged: Vec<(Uuid, String, Option<String>)> = assessment_question_reviews::table
            .filter(assessment_question_reviews::assignment_id.eq(assignment_id))
            .filter(assessment_question_reviews::status.eq_any(vec![
                ReviewStatus::Fail.to_string(),
                ReviewStatus::InProgress.to_string(),
            ]))
            .select((
                assessment_question_reviews::question_id,
                assessment_question_reviews::status,
                assessment_question_reviews::comment,
            ))
            .load(conn)?;
        Ok(flagged
            .into_iter()
            .map(|(question_id, status, comment)| {
                serde_json::json!({
                    "question_id": question_id,
                    "status": status,
                    "comment": comment,
                })
            })
            .collect())
    }

    fn start_resubmission(
        &self,
        conn: &mut PgConnection,
        assessment: &DbAssessment,
        assignment: &DbAssignment,
        decision_comment: Option<&str>,
    ) -> GovResult<()> {
        let flagged = self.flagged_questions(conn, assignment.id)?;
        let targets = self.resolve_resubmission_targets(conn, assignment)?;
        for target in &targets {
            insert_action_item(
                conn,
                ActionItemSpec {
                    tenant_id: self.ctx.tenant_id,
                    title: format!("Revise assessment: {}", assessment.name),
                    description: decision_comment.map(str::to_string),
                    action_type: "resubmission".to_string(),
                    source_type: SourceType::AssessmentResubmission,
                    source_id: assignment.id,
                    assigned_to: *target,
                    assigned_role: None,
                    priority: Priority::High,
                    workflow_ticket_id: assignment.workflow_ticket_id.clone(),
                    payload: serde_json::json!({
                        "flagged_questions": flagged,
                        "comment": decision_comment,
                    }),
                    due_date: assignment.due_date,
                },
            )?;
        }
        Ok(())
    }

    fn mark_counterparty_compliant(
        &self,
        conn: &mut PgConnection,
        assignment: &DbAssignment,
    ) -> GovResult<()> {
        let now = Utc::now();
        if let Some(vendor_id) = assignment.vendor_id {
            diesel::update(vendors::table.find(vendor_id))
                .set((
                    vendors::compliance_score.eq(Some(100)),
                    vendors::updated_at.eq(now),
                ))
                .execute(conn)?;
        }
        if let Some(agent_id) = assignment.agent_id {
            diesel::update(agents::table.find(agent_id))
                .set((
                    agents::status.eq("approved"),
                    agents::compliance_score.eq(Some(100)),
                    agents::updated_at.eq(now),
                ))
                .execute(conn)?;
        }
        Ok(())
    }

    fn notify_assignee(
        &self,
        conn: &mut PgConnection,
        assignment: &DbAssignment,
        subject: &str,
        body: &str,
    ) {
        let Some(user_id) = assignment.assigned_to else {
            return;
        };
        let email: Option<String> = users::table
            .find(user_id)
            .select(users::email)
            .first(conn)
            .optional()
            .ok()
            .flatten();
        if let Some(email) = email {
            crate::outbox::enqueue_email(conn, self.ctx.tenant_id, &email, subject, body);
        }
    }

    pub fn submit_final_decision(
        &self,
        conn: &mut PgConnection,
        assignment_id: Uuid,
        req: FinalDecisionRequest,
    ) -> GovResult<DecisionOutcome> {
        if !self.ctx.role().can_approve() {
            return Err(GovError::Permission(
                "not allowed to decide on assignments".to_string(),
            ));
        }
        let decision: ApprovalDecision = req
            .decision
            .parse()
            .map_err(|e: String| GovError::Validation(e))?;

        let assignment = self.load_assignment(conn, assignment_id)?;
        let previous: AssignmentStatus = assignment
            .status
            .parse()
            .map_err(|e: String| GovError::Internal(e))?;
        if previous.is_terminal() {
            return Err(GovError::Validation(
                "assignment already has a final decision".to_string(),
            ));
        }

        let assessment = self.load_assessment(conn, assignment.assessment_id)?;
        let now = Utc::now();

        if let Some(instance) = active_instance(conn, assignment.id)? {
            complete_current_step(
                conn,
                &instance,
                &decision.to_string(),
                req.comment.as_deref(),
                self.ctx.user_id(),
            )?;

            let steps = resolve_workflow_steps(conn, self.ctx.tenant_id);
            if decision.is_accept() {
                if let Some(next) = next_step_after(&steps, instance.current_step).cloned() {
                    let target = ApprovalTarget {
                        assignment_id: assignment.id,
                        assessment_name: &assessment.name,
                        owner_id: assessment.owner_id,
                        team_ids: &assessment.team_ids,
                        workflow_ticket_id: assignment.workflow_ticket_id.as_deref(),
                        due_date: assignment.due_date,
                    };
                    advance_instance(conn, &self.ctx, &instance, &target, &next, req.forward_to)?;
                    for source in [SourceType::AssessmentApproval, SourceType::AssessmentReview] {
                        complete_open_items(
                            conn,
                            self.ctx.tenant_id,
                            self.ctx.user_id(),
                            source,
                            assignment.id,
                        )?;
                    }
                    record_history(
                        conn,
                        self.ctx.tenant_id,
                        assignment.id,
                        Some(previous),
                        previous,
                        Some(self.ctx.user_id()),
                        Some(format!("approved step, advanced to step {}", next.step_number)),
                    );
                    crate::audit::log_action(
                        conn,
                        self.ctx.tenant_id,
                        Some(self.ctx.user_id()),
                        "approval_step_accepted",
                        "assessment_assignment",
                        Some(assignment.id),
                        serde_json::json!({ "next_step": next.step_number }),
                    );
                    return Ok(DecisionOutcome {
                        assignment_id: assignment.id,
                        status: previous.to_string(),
                        is_final: false,
                        next_step: Some(next.step_number),
                    });
                }
            }

            let terminal = if decision.is_accept() {
                InstanceStatus::Approved
            } else {
                InstanceStatus::Rejected
            };
            finish_instance(conn, &instance, terminal)?;
        }

        let new_status = decision.assignment_status();
        diesel::update(assessment_assignments::table.find(assignment.id))
            .set((
                assessment_assignments::status.eq(new_status.to_string()),
                assessment_assignments::updated_at.eq(now),
            ))
            .execute(conn)?;

        for source in [SourceType::AssessmentApproval, SourceType::AssessmentReview] {
            complete_open_items(
                conn,
                self.ctx.tenant_id,
                self.ctx.user_id(),
                source,
                assignment.id,
            )?;
        }
        record_history(
            conn,
            self.ctx.tenant_id,
            assignment.id,
            Some(previous),
            new_status,
            Some(self.ctx.user_id()),
            req.comment.clone(),
        );
        crate::audit::log_action(
            conn,
            self.ctx.tenant_id,
            Some(self.ctx.user_id()),
            "final_decision",
            "assessment_assignment",
            Some(assignment.id),
            serde_json::json!({ "decision": decision.to_string(), "comment": req.comment }),
        );

        match decision {
            ApprovalDecision::Accepted => {
                self.mark_counterparty_compliant(conn, &assignment)?;
                self.notify_assignee(
                    conn,
                    &assignment,
                    &format!("Assessment approved: {}", assessment.name),
                    "Your assessment submission was approved.",
                );
            }
            ApprovalDecision::Denied | ApprovalDecision::NeedInfo => {
                self.start_resubmission(conn, &assessment, &assignment, req.comment.as_deref())?;
                self.notify_assignee(
                    conn,
                    &assignment,
                    &format!("Assessment needs attention: {}", assessment.name),
                    req.comment.as_deref().unwrap_or("Revisions were requested."),
                );
            }
        }

        Ok(DecisionOutcome {
            assignment_id: assignment.id,
            status: new_status.to_string(),
            is_final: true,
            next_step: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(required: bool) -> QuestionCompletion {
        QuestionCompletion {
            id: Uuid::new_v4(),
            is_required: required,
        }
    }

    #[test]
    fn answers_must_be_non_empty() {
        assert!(!has_answer(None));
        assert!(!has_answer(Some("")));
        assert!(!has_answer(Some("   ")));
        assert!(has_answer(Some("yes")));
    }

    #[test]
    fn required_questions_gate_completion() {
        // 3 questions, 2 required: answering the 2 required completes
        let questions = vec![q(true), q(true), q(false)];
        let mut answered = HashSet::new();
        answered.insert(questions[0].id);
        assert!(!completion_satisfied(&questions, &answered));
        answered.insert(questions[1].id);
        assert!(completion_satisfied(&questions, &answered));
        // the optional question never mattered
        assert!(!answered.contains(&questions[2].id));
    }

    #[test]
    fn without_required_questions_all_must_be_answered() {
        let questions = vec![q(false), q(false), q(false)];
        let mut answered: HashSet<Uuid> =
            questions.iter().take(2).map(|q| q.id).collect();
        assert!(!completion_satisfied(&questions, &answered));
        answered.insert(questions[2].id);
        assert!(completion_satisfied(&questions, &answered));
    }

    #[test]
    fn empty_question_lists_are_vacuously_complete() {
        assert!(completion_satisfied(&[], &HashSet::new()));
    }

    #[test]
    fn ticket_codes_are_year_scoped_and_padded() {
        assert_eq!(format_workflow_ticket(2026, 17), "ASMT-2026-017");
        assert_eq!(format_workflow_ticket(2026, 1), "ASMT-2026-001");
        assert_eq!(format_workflow_ticket(2027, 1234), "ASMT-2027-1234");
    }
}
