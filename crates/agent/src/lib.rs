//! Supervisor, response writer, and workflow orchestrator
//!
//! Drives the per-request state machine: SupervisorDecide → Retrieve →
//! Compose, with per-strategy timeouts, a single degraded-Compression
//! fallback, and a compose budget. Retrieval-confined failures never
//! surface as request errors; the response is composed over whatever
//! contexts survived.

pub mod response;
pub mod supervisor;
pub mod workflow;
pub mod writer;

pub use response::{AgentMessage, AgentResponse, ResponseMetadata};
pub use supervisor::{route, Supervisor};
pub use workflow::{Workflow, WorkflowConfig};
pub use writer::ResponseWriter;
