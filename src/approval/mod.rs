//! Human-approval sub-processes.
//!
//! An approval node suspends its execution and creates an
//! [`ApprovalRequest`] here. Approver responses drive the request's state
//! machine; any terminal resolution resumes the owning execution through
//! the [`ExecutionResumer`] seam with an `approvalStatus` signal.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::WorkflowResult;
use crate::model::{
    ApprovalComment, ApprovalDecision, ApprovalRequest, ApprovalStatus, ApprovalType,
};
use crate::runtime::RuntimeContext;
use crate::services::NotificationSink;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Approval request not found: {0}")]
    NotFound(String),
    #[error("Approval request {approval_id} already resolved as {status:?}")]
    AlreadyResolved {
        approval_id: String,
        status: ApprovalStatus,
    },
    #[error("User {approver_id} is not a required approver on {approval_id}")]
    NotAnApprover {
        approval_id: String,
        approver_id: String,
    },
}

/// What an unanswered request resolves to once `expires_at` passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    #[default]
    ForceReject,
    ForceContinue,
}

/// Seam back into the engine: resolving a request must resume exactly the
/// execution that created it. Wired after construction to break the
/// orchestrator/engine dependency loop.
#[async_trait]
pub trait ExecutionResumer: Send + Sync {
    async fn resume_execution(&self, execution_id: &str, resume_data: Value) -> WorkflowResult<()>;
}

pub struct ApprovalOrchestrator {
    runtime: RuntimeContext,
    notifications: Arc<dyn NotificationSink>,
    resumer: RwLock<Option<Arc<dyn ExecutionResumer>>>,
    requests: RwLock<HashMap<String, ApprovalRequest>>,
    timeout_hours: i64,
    expiry_policy: ExpiryPolicy,
}

impl ApprovalOrchestrator {
    pub fn new(
        runtime: RuntimeContext,
        notifications: Arc<dyn NotificationSink>,
        timeout_hours: i64,
        expiry_policy: ExpiryPolicy,
    ) -> Self {
        Self {
            runtime,
            notifications,
            resumer: RwLock::new(None),
            requests: RwLock::new(HashMap::new()),
            timeout_hours,
            expiry_policy,
        }
    }

    pub fn set_resumer(&self, resumer: Arc<dyn ExecutionResumer>) {
        *self.resumer.write() = Some(resumer);
    }

    /// SINGLE or REVIEW request over a flat approver set.
    pub async fn create(
        &self,
        execution_id: &str,
        node_id: &str,
        approval_type: ApprovalType,
        approvers: Vec<String>,
        request_data: Value,
    ) -> ApprovalRequest {
        debug_assert!(matches!(
            approval_type,
            ApprovalType::Single | ApprovalType::Review
        ));
        self.insert(
            execution_id,
            node_id,
            approval_type,
            approvers,
            Vec::new(),
            0,
            request_data,
        )
        .await
    }

    /// Ordered steps, each a set of approvers that must all approve before
    /// the next step is notified.
    pub async fn create_multi_step(
        &self,
        execution_id: &str,
        node_id: &str,
        steps: Vec<Vec<String>>,
        request_data: Value,
    ) -> ApprovalRequest {
        let all: Vec<String> = steps.iter().flatten().cloned().collect();
        self.insert(
            execution_id,
            node_id,
            ApprovalType::MultiStep,
            all,
            steps,
            0,
            request_data,
        )
        .await
    }

    /// Quorum of `required_count` out of the approver set. Zero means all.
    pub async fn create_parallel(
        &self,
        execution_id: &str,
        node_id: &str,
        approvers: Vec<String>,
        required_count: usize,
        request_data: Value,
    ) -> ApprovalRequest {
        self.insert(
            execution_id,
            node_id,
            ApprovalType::Parallel,
            approvers,
            Vec::new(),
            required_count,
            request_data,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert(
        &self,
        execution_id: &str,
        node_id: &str,
        approval_type: ApprovalType,
        required_approvers: Vec<String>,
        steps: Vec<Vec<String>>,
        required_approval_count: usize,
        request_data: Value,
    ) -> ApprovalRequest {
        let now = self.runtime.now();
        let request = ApprovalRequest {
            id: self.runtime.next_id(),
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            approval_type,
            required_approvers,
            steps,
            current_step: 0,
            required_approval_count,
            approved_by: Vec::new(),
            status: ApprovalStatus::Pending,
            request_data,
            requested_at: now,
            expires_at: Some(now + chrono::Duration::hours(self.timeout_hours)),
            comments: Vec::new(),
        };
        info!(
            approval_id = %request.id,
            execution_id,
            ?approval_type,
            "approval request created"
        );
        self.notify_pending(&request).await;
        self.requests
            .write()
            .insert(request.id.clone(), request.clone());
        request
    }

    /// Current state of a request, after a lazy expiry check.
    pub async fn get(&self, approval_id: &str) -> Result<ApprovalRequest, ApprovalError> {
        self.expire_if_overdue(approval_id).await;
        self.requests
            .read()
            .get(approval_id)
            .cloned()
            .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))
    }

    /// Record one approver's decision and advance the state machine.
    ///
    /// A rejection from any required approver is terminal regardless of
    /// prior approvals. A duplicate approval from the same approver is an
    /// idempotent no-op.
    pub async fn respond(
        &self,
        approval_id: &str,
        approver_id: &str,
        decision: ApprovalDecision,
        comments: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.expire_if_overdue(approval_id).await;

        let (request, resolution, advanced) = {
            let mut guard = self.requests.write();
            let request = guard
                .get_mut(approval_id)
                .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))?;

            if request.status.is_terminal() {
                return Err(ApprovalError::AlreadyResolved {
                    approval_id: approval_id.to_string(),
                    status: request.status,
                });
            }
            if !request.required_approvers.iter().any(|a| a == approver_id) {
                return Err(ApprovalError::NotAnApprover {
                    approval_id: approval_id.to_string(),
                    approver_id: approver_id.to_string(),
                });
            }
            if decision == ApprovalDecision::Approve
                && request.approved_by.iter().any(|a| a == approver_id)
            {
                return Ok(request.clone());
            }

            request.comments.push(ApprovalComment {
                approver_id: approver_id.to_string(),
                decision,
                comments,
                timestamp: self.runtime.now(),
            });

            let step_before = request.current_step;
            let resolution = match decision {
                ApprovalDecision::Reject => {
                    info!(approval_id, approver_id, "approval rejected");
                    request.status = ApprovalStatus::Rejected;
                    Some("rejected")
                }
                ApprovalDecision::Approve => {
                    request.approved_by.push(approver_id.to_string());
                    self.advance(request)
                }
            };
            let advanced = request.current_step > step_before;
            (request.clone(), resolution, advanced)
        };

        if let Some(signal) = resolution {
            self.resume_owner(&request, signal).await;
        } else if advanced {
            // A step just completed; the next step's approvers have not
            // acted yet and need to hear about it.
            self.notify_pending(&request).await;
        }
        Ok(request)
    }

    /// Recompute completeness after an approval. Returns the resolution
    /// signal when the request just became terminal.
    fn advance(&self, request: &mut ApprovalRequest) -> Option<&'static str> {
        match request.approval_type {
            ApprovalType::Single | ApprovalType::Review => {
                request.status = ApprovalStatus::Approved;
                Some("approved")
            }
            ApprovalType::Parallel => {
                if request.approved_by.len() >= request.quorum() {
                    request.status = ApprovalStatus::Approved;
                    Some("approved")
                } else {
                    request.status = ApprovalStatus::PartiallyApproved;
                    None
                }
            }
            ApprovalType::MultiStep => {
                // Out-of-step approvals are recorded when they arrive, so a
                // completed step may already satisfy the ones after it.
                while request
                    .steps
                    .get(request.current_step)
                    .map(|step| step.iter().all(|a| request.approved_by.contains(a)))
                    .unwrap_or(false)
                {
                    request.current_step += 1;
                    info!(
                        approval_id = %request.id,
                        step = request.current_step,
                        "approval advanced to next step"
                    );
                }
                if request.current_step >= request.steps.len() {
                    request.status = ApprovalStatus::Approved;
                    Some("approved")
                } else {
                    request.status = ApprovalStatus::PartiallyApproved;
                    None
                }
            }
        }
    }

    /// Administrative cancellation; terminal, does not resume the owner.
    pub async fn cancel(&self, approval_id: &str, reason: &str) -> Result<(), ApprovalError> {
        let mut guard = self.requests.write();
        let request = guard
            .get_mut(approval_id)
            .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))?;
        if request.status.is_terminal() {
            return Err(ApprovalError::AlreadyResolved {
                approval_id: approval_id.to_string(),
                status: request.status,
            });
        }
        info!(approval_id, reason, "approval cancelled");
        request.status = ApprovalStatus::Cancelled;
        Ok(())
    }

    /// Sweep every pending request whose deadline has passed. Returns how
    /// many were expired.
    pub async fn expire_overdue(&self) -> usize {
        let overdue: Vec<String> = {
            let now = self.runtime.now();
            self.requests
                .read()
                .values()
                .filter(|r| !r.status.is_terminal())
                .filter(|r| r.expires_at.map(|at| at <= now).unwrap_or(false))
                .map(|r| r.id.clone())
                .collect()
        };
        for id in &overdue {
            self.expire_if_overdue(id).await;
        }
        overdue.len()
    }

    async fn expire_if_overdue(&self, approval_id: &str) {
        let expired = {
            let now = self.runtime.now();
            let mut guard = self.requests.write();
            match guard.get_mut(approval_id) {
                Some(request)
                    if !request.status.is_terminal()
                        && request.expires_at.map(|at| at <= now).unwrap_or(false) =>
                {
                    request.status = ApprovalStatus::Expired;
                    Some(request.clone())
                }
                _ => None,
            }
        };
        if let Some(request) = expired {
            let signal = match self.expiry_policy {
                ExpiryPolicy::ForceReject => "rejected",
                ExpiryPolicy::ForceContinue => "approved",
            };
            warn!(approval_id, signal, "approval request expired");
            self.resume_owner(&request, signal).await;
        }
    }

    async fn notify_pending(&self, request: &ApprovalRequest) {
        let pending: Vec<String> = request
            .pending_approvers()
            .into_iter()
            .map(String::from)
            .collect();
        if pending.is_empty() {
            return;
        }
        let message = request
            .request_data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("A workflow is waiting on your approval")
            .to_string();
        self.notifications
            .notify(&pending, "Approval requested", &message)
            .await;
    }

    async fn resume_owner(&self, request: &ApprovalRequest, signal: &str) {
        let resumer = self.resumer.read().clone();
        let Some(resumer) = resumer else {
            warn!(
                approval_id = %request.id,
                "no execution resumer wired, resolution not delivered"
            );
            return;
        };
        let resume_data = json!({
            "approvalStatus": signal,
            "approvalId": request.id,
        });
        if let Err(e) = resumer
            .resume_execution(&request.execution_id, resume_data)
            .await
        {
            warn!(
                approval_id = %request.id,
                execution_id = %request.execution_id,
                error = %e,
                "failed to resume execution after approval resolution"
            );
        }
    }
}
