//! Collaborator seams consumed by node handlers and the engine.
//!
//! Each concern is a trait plus an in-memory implementation suitable for
//! tests and single-process deployments. Real transports and databases
//! plug in behind the same traits.

mod activity_store;
mod entity_store;
mod execution_store;
mod http;
mod messaging;
mod notification;
mod workflow_store;

pub use activity_store::{Activity, ActivityStore, InMemoryActivityStore};
pub use entity_store::{EntityStore, InMemoryEntityStore};
pub use execution_store::{ExecutionStore, InMemoryExecutionStore};
pub use http::{AuthScheme, HttpExecutor, HttpRequest, HttpResponse, StubHttpExecutor};
pub use messaging::{DeliveryReceipt, InMemoryMessenger, MessageChannel, SentMessage};
pub use notification::{InMemoryNotificationSink, Notification, NotificationSink};
pub use workflow_store::{InMemoryWorkflowStore, WorkflowStore};
