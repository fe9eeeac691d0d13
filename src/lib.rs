//! # Zenflow: a CRM Workflow Automation Engine
//!
//! `zenflow` executes declarative workflow graphs against CRM records.
//! A workflow is a set of typed nodes connected by named-outcome edges;
//! the engine traverses it, branching on conditions and suspending on
//! long-running operations. Highlights:
//!
//! - **Node execution**: trigger, condition, data, communication, task,
//!   approval, delay, integration, list, error, collection, scheduled and
//!   event categories, each with subtype-level operations.
//! - **Suspend/resume**: approvals, delays and event waits persist the
//!   execution context and resume from the exact node later, holding no
//!   in-process state across waits.
//! - **Templates and formulas**: `{{path.to.value}}` resolution in node
//!   config and a formula mini-language with functions (`UPPER`, `IF`,
//!   `DATE_DIFF`, ...) for computed conditions.
//! - **Validation**: structural and per-node-config checks with rich
//!   diagnostics, including cycle detection, before activation.
//! - **Assignment strategies**: round-robin, load-based, territory,
//!   skill-based and more for routing records to owners.
//! - **Approvals**: single, multi-step and parallel (quorum) approval
//!   requests that resume the owning execution on resolution.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use zenflow::{
//!     build_registry, ApprovalOrchestrator, AssignmentEngine, EngineConfig,
//!     ExecutionEngine, ExpiryPolicy, NodeServices, RuntimeContext,
//! };
//! use zenflow::services::{
//!     InMemoryActivityStore, InMemoryEntityStore, InMemoryExecutionStore,
//!     InMemoryMessenger, InMemoryNotificationSink, InMemoryWorkflowStore,
//!     StubHttpExecutor,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let runtime = RuntimeContext::default();
//!     let config = EngineConfig::default();
//!     let notifications = Arc::new(InMemoryNotificationSink::new());
//!     let services = NodeServices {
//!         runtime: runtime.clone(),
//!         entities: Arc::new(InMemoryEntityStore::new(runtime.clone())),
//!         activities: Arc::new(InMemoryActivityStore::new(runtime.clone())),
//!         messenger: Arc::new(InMemoryMessenger::new(runtime.clone())),
//!         notifications: notifications.clone(),
//!         http: Arc::new(StubHttpExecutor::new()),
//!         approvals: Arc::new(ApprovalOrchestrator::new(
//!             runtime.clone(),
//!             notifications,
//!             config.approval_timeout_hours,
//!             ExpiryPolicy::default(),
//!         )),
//!         assignment: Arc::new(AssignmentEngine::new()),
//!     };
//!     let built = build_registry(&services, &config);
//!     let engine = Arc::new(ExecutionEngine::new(
//!         config,
//!         runtime,
//!         built.registry,
//!         Arc::new(InMemoryWorkflowStore::new()),
//!         Arc::new(InMemoryExecutionStore::new()),
//!     ));
//!     services.approvals.set_resumer(engine.clone());
//!
//!     let started = engine.trigger("acme", "LEAD", "record_created", json!({"id": "l1"})).await;
//!     println!("started {started} executions");
//! }
//! ```

pub mod approval;
pub mod assignment;
pub mod engine;
pub mod error;
pub mod formula;
pub mod handlers;
pub mod model;
pub mod runtime;
pub mod services;
pub mod template;
pub mod validator;

pub use crate::approval::{ApprovalError, ApprovalOrchestrator, ExecutionResumer, ExpiryPolicy};
pub use crate::assignment::AssignmentEngine;
pub use crate::engine::{
    EngineConfig, ExecutionEngine, HandlerRegistry, NodeHandler, RegistrySequenceRunner,
    SubSequenceRunner,
};
pub use crate::error::{NodeError, WorkflowError, WorkflowResult};
pub use crate::formula::FormulaEngine;
pub use crate::handlers::{build_registry, BuiltHandlers, NodeServices, SubflowRunner};
pub use crate::model::{
    ApprovalDecision, ApprovalRequest, ApprovalStatus, ApprovalType, ExecutionContext,
    ExecutionResult, ExecutionStatus, Node, NodeType, ResultStatus, Workflow, WorkflowGraph,
};
pub use crate::runtime::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
pub use crate::validator::{validate, Diagnostic, DiagnosticLevel, ValidationReport};
