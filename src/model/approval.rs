//! Approval sub-process model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalType {
    Single,
    MultiStep,
    Parallel,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    PartiallyApproved,
    Expired,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Approved
                | ApprovalStatus::Rejected
                | ApprovalStatus::Expired
                | ApprovalStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalComment {
    pub approver_id: String,
    pub decision: ApprovalDecision,
    pub comments: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One human-approval sub-process, created when an approval node suspends its
/// execution and mutated by each approver response until terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub approval_type: ApprovalType,
    /// Flattened approver set; ordered per step for MULTI_STEP.
    pub required_approvers: Vec<String>,
    /// MULTI_STEP only: approvers grouped by step.
    #[serde(default)]
    pub steps: Vec<Vec<String>>,
    #[serde(default)]
    pub current_step: usize,
    /// PARALLEL only: quorum size. Zero means "all approvers".
    #[serde(default)]
    pub required_approval_count: usize,
    pub approved_by: Vec<String>,
    pub status: ApprovalStatus,
    pub request_data: Value,
    pub requested_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comments: Vec<ApprovalComment>,
}

impl ApprovalRequest {
    pub fn quorum(&self) -> usize {
        match self.approval_type {
            ApprovalType::Single | ApprovalType::Review => 1,
            ApprovalType::Parallel => {
                if self.required_approval_count == 0 {
                    self.required_approvers.len()
                } else {
                    self.required_approval_count
                }
            }
            ApprovalType::MultiStep => self.required_approvers.len(),
        }
    }

    /// Approvers still expected to act at this point of the lifecycle.
    pub fn pending_approvers(&self) -> Vec<&str> {
        let pool: &[String] = match self.approval_type {
            ApprovalType::MultiStep => self
                .steps
                .get(self.current_step)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            _ => &self.required_approvers,
        };
        pool.iter()
            .filter(|a| !self.approved_by.contains(a))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parallel_request() -> ApprovalRequest {
        ApprovalRequest {
            id: "ap-1".into(),
            execution_id: "ex-1".into(),
            node_id: "n1".into(),
            approval_type: ApprovalType::Parallel,
            required_approvers: vec!["u1".into(), "u2".into(), "u3".into()],
            steps: Vec::new(),
            current_step: 0,
            required_approval_count: 2,
            approved_by: Vec::new(),
            status: ApprovalStatus::Pending,
            request_data: json!({}),
            requested_at: Utc::now(),
            expires_at: None,
            comments: Vec::new(),
        }
    }

    #[test]
    fn test_parallel_quorum() {
        let mut req = parallel_request();
        assert_eq!(req.quorum(), 2);
        req.required_approval_count = 0;
        assert_eq!(req.quorum(), 3);
    }

    #[test]
    fn test_pending_approvers_excludes_approved() {
        let mut req = parallel_request();
        req.approved_by.push("u2".into());
        assert_eq!(req.pending_approvers(), vec!["u1", "u3"]);
    }

    #[test]
    fn test_multi_step_pending_scoped_to_current_step() {
        let mut req = parallel_request();
        req.approval_type = ApprovalType::MultiStep;
        req.steps = vec![vec!["u1".into()], vec!["u2".into(), "u3".into()]];
        req.current_step = 1;
        assert_eq!(req.pending_approvers(), vec!["u2", "u3"]);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(!ApprovalStatus::PartiallyApproved.is_terminal());
    }
}
