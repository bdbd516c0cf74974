//! Status and role vocabularies shared across the governance modules.
//!
//! Statuses are persisted as TEXT columns; these enums are the typed edge
//! used by the workflow logic. `Display`/`FromStr` round-trip the stored
//! strings.

use serde::{Deserialize, Serialize};

// ============================================================================
// USER ROLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    PlatformAdmin,
    TenantAdmin,
    Approver,
    Reviewer,
    VendorUser,
    Member,
}

impl UserRole {
    pub fn is_admin(self) -> bool {
        matches!(self, Self::PlatformAdmin | Self::TenantAdmin)
    }

    /// Roles allowed to act on approval steps and reviews.
    pub fn can_approve(self) -> bool {
        matches!(
            self,
            Self::PlatformAdmin | Self::TenantAdmin | Self::Approver | Self::Reviewer
        )
    }

    pub fn can_manage_assessments(self) -> bool {
        matches!(self, Self::PlatformAdmin | Self::TenantAdmin | Self::Approver)
    }
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Member
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PlatformAdmin => "platform_admin",
            Self::TenantAdmin => "tenant_admin",
            Self::Approver => "approver",
            Self::Reviewer => "reviewer",
            Self::VendorUser => "vendor_user",
            Self::Member => "member",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform_admin" => Ok(Self::PlatformAdmin),
            "tenant_admin" => Ok(Self::TenantAdmin),
            "approver" => Ok(Self::Approver),
            "reviewer" => Ok(Self::Reviewer),
            "vendor_user" => Ok(Self::VendorUser),
            "member" => Ok(Self::Member),
            _ => Err(format!("Unknown user role: {s}")),
        }
    }
}

// ============================================================================
// ASSIGNMENT LIFECYCLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Completed,
    Approved,
    Rejected,
    NeedsRevision,
    Cancelled,
    Overdue,
}

impl AssignmentStatus {
    /// Statuses from which a vendor resubmission is expected.
    pub fn is_resubmission_origin(self) -> bool {
        matches!(self, Self::InProgress | Self::Rejected | Self::NeedsRevision)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsRevision => "needs_revision",
            Self::Cancelled => "cancelled",
            Self::Overdue => "overdue",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AssignmentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "needs_revision" => Ok(Self::NeedsRevision),
            "cancelled" => Ok(Self::Cancelled),
            "overdue" => Ok(Self::Overdue),
            _ => Err(format!("Unknown assignment status: {s}")),
        }
    }
}

// ============================================================================
// QUESTION REVIEWS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Pass,
    Fail,
    InProgress,
    Resolved,
}

impl ReviewStatus {
    /// Fail / in-progress verdicts must carry an explanation.
    pub fn requires_comment(self) -> bool {
        matches!(self, Self::Fail | Self::InProgress)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("Unknown review status: {s}")),
        }
    }
}

// ============================================================================
// APPROVAL DECISIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Accepted,
    Denied,
    NeedInfo,
}

impl ApprovalDecision {
    /// The assignment status an approval decision maps onto.
    pub fn assignment_status(self) -> AssignmentStatus {
        match self {
            Self::Accepted => AssignmentStatus::Approved,
            Self::Denied => AssignmentStatus::Rejected,
            Self::NeedInfo => AssignmentStatus::NeedsRevision,
        }
    }

    pub fn is_accept(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Denied => "denied",
            Self::NeedInfo => "need_info",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ApprovalDecision {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "denied" => Ok(Self::Denied),
            "need_info" => Ok(Self::NeedInfo),
            _ => Err(format!("Unknown approval decision: {s}")),
        }
    }
}

// ============================================================================
// APPROVAL INSTANCES & STEPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    InProgress,
    Approved,
    Rejected,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown instance status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Unknown step status: {s}")),
        }
    }
}

// ============================================================================
// ACTION ITEMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionItemStatus {
    Pending,
    InProgress,
    Completed,
}

impl ActionItemStatus {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl std::fmt::Display for ActionItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ActionItemStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Unknown action item status: {s}")),
        }
    }
}

/// Polymorphic source entity of an action item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    AssessmentAssignment,
    AssessmentResubmission,
    AssessmentApproval,
    AssessmentReview,
    OnboardingRequest,
    Ticket,
    Message,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AssessmentAssignment => "assessment_assignment",
            Self::AssessmentResubmission => "assessment_resubmission",
            Self::AssessmentApproval => "assessment_approval",
            Self::AssessmentReview => "assessment_review",
            Self::OnboardingRequest => "onboarding_request",
            Self::Ticket => "ticket",
            Self::Message => "message",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assessment_assignment" => Ok(Self::AssessmentAssignment),
            "assessment_resubmission" => Ok(Self::AssessmentResubmission),
            "assessment_approval" => Ok(Self::AssessmentApproval),
            "assessment_review" => Ok(Self::AssessmentReview),
            "onboarding_request" => Ok(Self::OnboardingRequest),
            "ticket" => Ok(Self::Ticket),
            "message" => Ok(Self::Message),
            _ => Err(format!("Unknown source type: {s}")),
        }
    }
}

// ============================================================================
// PRIORITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Ordering used when collapsing inbox duplicates.
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn rank_str(s: &str) -> u8 {
        s.parse::<Priority>().map(Priority::rank).unwrap_or(0)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown priority: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_maps_to_assignment_status() {
        assert_eq!(
            ApprovalDecision::Accepted.assignment_status(),
            AssignmentStatus::Approved
        );
        assert_eq!(
            ApprovalDecision::Denied.assignment_status(),
            AssignmentStatus::Rejected
        );
        assert_eq!(
            ApprovalDecision::NeedInfo.assignment_status(),
            AssignmentStatus::NeedsRevision
        );
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            "pending",
            "in_progress",
            "completed",
            "approved",
            "rejected",
            "needs_revision",
            "cancelled",
            "overdue",
        ] {
            let parsed: AssignmentStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("bogus".parse::<AssignmentStatus>().is_err());
    }

    #[test]
    fn resubmission_origins() {
        assert!(AssignmentStatus::NeedsRevision.is_resubmission_origin());
        assert!(AssignmentStatus::Rejected.is_resubmission_origin());
        assert!(AssignmentStatus::InProgress.is_resubmission_origin());
        assert!(!AssignmentStatus::Pending.is_resubmission_origin());
        assert!(!AssignmentStatus::Completed.is_resubmission_origin());
    }

    #[test]
    fn review_comment_requirements() {
        assert!(ReviewStatus::Fail.requires_comment());
        assert!(ReviewStatus::InProgress.requires_comment());
        assert!(!ReviewStatus::Pass.requires_comment());
    }

    #[test]
    fn priority_ranking() {
        assert!(Priority::Critical.rank() > Priority::High.rank());
        assert_eq!(Priority::rank_str("high"), 2);
        // unknown strings sort lowest
        assert_eq!(Priority::rank_str("???"), 0);
    }
}
