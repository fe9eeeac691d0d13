//! Approval nodes wired through the orchestrator and back into the engine:
//! a decision recorded on the orchestrator resumes the suspended execution
//! and drives it down the approved or rejected edge.

use std::sync::Arc;

use serde_json::json;

use zenflow::services::{
    ExecutionStore, InMemoryActivityStore, InMemoryEntityStore, InMemoryExecutionStore,
    InMemoryMessenger, InMemoryNotificationSink, InMemoryWorkflowStore, StubHttpExecutor,
    WorkflowStore,
};
use zenflow::{
    build_registry, ApprovalDecision, ApprovalOrchestrator, ApprovalStatus, AssignmentEngine,
    EngineConfig, ExecutionEngine, ExecutionStatus, ExpiryPolicy, Node, NodeServices, NodeType,
    RuntimeContext, Workflow, WorkflowGraph,
};

struct Harness {
    engine: Arc<ExecutionEngine>,
    workflows: Arc<InMemoryWorkflowStore>,
    executions: Arc<InMemoryExecutionStore>,
    approvals: Arc<ApprovalOrchestrator>,
    notifications: Arc<InMemoryNotificationSink>,
}

fn harness() -> Harness {
    let runtime = RuntimeContext::fake();
    let notifications = Arc::new(InMemoryNotificationSink::new());
    let approvals = Arc::new(ApprovalOrchestrator::new(
        runtime.clone(),
        notifications.clone(),
        72,
        ExpiryPolicy::ForceReject,
    ));
    let services = NodeServices {
        runtime: runtime.clone(),
        entities: Arc::new(InMemoryEntityStore::new(runtime.clone())),
        activities: Arc::new(InMemoryActivityStore::new(runtime.clone())),
        messenger: Arc::new(InMemoryMessenger::new(runtime.clone())),
        notifications: notifications.clone(),
        http: Arc::new(StubHttpExecutor::new()),
        approvals: approvals.clone(),
        assignment: Arc::new(AssignmentEngine::new()),
    };
    let config = EngineConfig::default();
    let built = build_registry(&services, &config);
    let workflows = Arc::new(InMemoryWorkflowStore::new());
    let executions = Arc::new(InMemoryExecutionStore::new());
    let engine = Arc::new(ExecutionEngine::new(
        config,
        runtime,
        built.registry,
        workflows.clone(),
        executions.clone(),
    ));
    approvals.set_resumer(engine.clone());
    Harness {
        engine,
        workflows,
        executions,
        approvals,
        notifications,
    }
}

/// trigger -> approval -> (approved | rejected) branch markers.
fn approval_workflow(id: &str, subtype: &str, config: serde_json::Value) -> Workflow {
    let graph = WorkflowGraph::new(vec![
        Node::new("start", NodeType::Trigger, "record_created").connect("default", "sign_off"),
        Node::new("sign_off", NodeType::Approval, subtype)
            .with_config(config)
            .connect("approved", "granted")
            .connect("rejected", "denied"),
        Node::new("granted", NodeType::Data, "set_field")
            .with_config(json!({"field": "outcome", "value": "granted"})),
        Node::new("denied", NodeType::Data, "set_field")
            .with_config(json!({"field": "outcome", "value": "denied"})),
    ]);
    Workflow::new(id, "discount-approval", "DEAL", "record_created", graph)
}

async fn start_and_suspend(h: &Harness, wf: &Workflow) -> (String, String) {
    h.workflows.save(wf.clone()).await.unwrap();
    let ctx = h
        .engine
        .start(wf, json!({"dealId": "d1", "amount": 50_000}), "acme")
        .await
        .unwrap();
    assert_eq!(
        h.executions.status(&ctx.execution_id).await.unwrap(),
        ExecutionStatus::WaitingApproval
    );
    let approval_id = ctx
        .variable("approvalId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    (ctx.execution_id, approval_id)
}

async fn outcome_of(h: &Harness, execution_id: &str) -> (ExecutionStatus, Option<String>) {
    let (ctx, status) = h.executions.load(execution_id).await.unwrap();
    let outcome = ctx
        .variable("outcome")
        .and_then(|v| v.as_str())
        .map(String::from);
    (status, outcome)
}

#[tokio::test]
async fn test_single_approval_resumes_down_approved_edge() {
    let h = harness();
    let wf = approval_workflow(
        "wf-ap1",
        "approval_step",
        json!({
            "approvers": ["mgr"],
            "title": "Discount sign-off",
            "message": "Deal {{dealId}} needs a discount decision"
        }),
    );
    let (execution_id, approval_id) = start_and_suspend(&h, &wf).await;

    // The pending approver was notified with the resolved message.
    let inbox = h.notifications.delivered_to("mgr");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message, "Deal d1 needs a discount decision");

    h.approvals
        .respond(&approval_id, "mgr", ApprovalDecision::Approve, None)
        .await
        .unwrap();

    let (status, outcome) = outcome_of(&h, &execution_id).await;
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome.as_deref(), Some("granted"));

    // The resume bookkeeping does not leak into the finished context.
    let (ctx, _) = h.executions.load(&execution_id).await.unwrap();
    assert!(ctx.variable("approvalStatus").is_none());
    assert!(ctx.variable("approvalNodeId").is_none());
}

#[tokio::test]
async fn test_rejection_takes_rejected_edge() {
    let h = harness();
    let wf = approval_workflow(
        "wf-ap2",
        "approval_step",
        json!({"approvers": ["mgr"], "title": "Discount sign-off"}),
    );
    let (execution_id, approval_id) = start_and_suspend(&h, &wf).await;

    h.approvals
        .respond(
            &approval_id,
            "mgr",
            ApprovalDecision::Reject,
            Some("too steep".into()),
        )
        .await
        .unwrap();

    let (status, outcome) = outcome_of(&h, &execution_id).await;
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome.as_deref(), Some("denied"));
}

#[tokio::test]
async fn test_parallel_quorum_resolves_on_second_distinct_approver() {
    let h = harness();
    let wf = approval_workflow(
        "wf-ap3",
        "parallel_approval",
        json!({
            "approvers": ["a", "b", "c"],
            "requiredApprovals": 2,
            "title": "Big deal"
        }),
    );
    let (execution_id, approval_id) = start_and_suspend(&h, &wf).await;

    let first = h
        .approvals
        .respond(&approval_id, "a", ApprovalDecision::Approve, None)
        .await
        .unwrap();
    assert_eq!(first.status, ApprovalStatus::PartiallyApproved);
    assert_eq!(
        h.executions.status(&execution_id).await.unwrap(),
        ExecutionStatus::WaitingApproval
    );

    // A duplicate approval from the same approver changes nothing.
    let dup = h
        .approvals
        .respond(&approval_id, "a", ApprovalDecision::Approve, None)
        .await
        .unwrap();
    assert_eq!(dup.status, ApprovalStatus::PartiallyApproved);

    let second = h
        .approvals
        .respond(&approval_id, "c", ApprovalDecision::Approve, None)
        .await
        .unwrap();
    assert_eq!(second.status, ApprovalStatus::Approved);

    let (status, outcome) = outcome_of(&h, &execution_id).await;
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome.as_deref(), Some("granted"));
}

#[tokio::test]
async fn test_parallel_rejection_short_circuits_pending_quorum() {
    let h = harness();
    let wf = approval_workflow(
        "wf-ap4",
        "parallel_approval",
        json!({"approvers": ["a", "b", "c"], "requiredApprovals": 2}),
    );
    let (execution_id, approval_id) = start_and_suspend(&h, &wf).await;

    h.approvals
        .respond(&approval_id, "a", ApprovalDecision::Approve, None)
        .await
        .unwrap();
    let rejected = h
        .approvals
        .respond(&approval_id, "b", ApprovalDecision::Reject, None)
        .await
        .unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);

    let (status, outcome) = outcome_of(&h, &execution_id).await;
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome.as_deref(), Some("denied"));
}

#[tokio::test]
async fn test_multi_step_notifies_next_step_then_resolves() {
    let h = harness();
    let wf = approval_workflow(
        "wf-ap5",
        "multi_step_approval",
        json!({"steps": [["lead"], ["director"]], "title": "Contract"}),
    );
    let (execution_id, approval_id) = start_and_suspend(&h, &wf).await;

    // Only the first step hears about the request up front.
    assert_eq!(h.notifications.delivered_to("lead").len(), 1);
    assert!(h.notifications.delivered_to("director").is_empty());

    let after_first = h
        .approvals
        .respond(&approval_id, "lead", ApprovalDecision::Approve, None)
        .await
        .unwrap();
    assert_eq!(after_first.status, ApprovalStatus::PartiallyApproved);
    assert_eq!(h.notifications.delivered_to("director").len(), 1);
    assert_eq!(
        h.executions.status(&execution_id).await.unwrap(),
        ExecutionStatus::WaitingApproval
    );

    h.approvals
        .respond(&approval_id, "director", ApprovalDecision::Approve, None)
        .await
        .unwrap();

    let (status, outcome) = outcome_of(&h, &execution_id).await;
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome.as_deref(), Some("granted"));
}
