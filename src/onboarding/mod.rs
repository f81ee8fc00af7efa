//! Instructor onboarding — the program's task-progression subsystem.
//!
//! A template describes a pathway of phased tasks with dependency edges;
//! an assignment instantiates one for an instructor; the progression
//! engine moves individual tasks through their statuses under gate and
//! dependency rules, writing an audit event for every change. The routes
//! module exposes the whole thing over REST plus a live WebSocket stream.

pub mod assignment;
pub mod catalog;
pub mod context;
pub mod dashboard;
pub mod engine;
pub mod graph;
pub mod model;
pub mod routes;
pub mod ws;

pub use assignment::{AssignmentManager, CreateAssignmentRequest};
pub use catalog::TemplateCatalog;
pub use context::AssignmentContext;
pub use dashboard::Dashboard;
pub use engine::{ProgressionEngine, TransitionOutcome, TransitionPayload};
pub use graph::DependencyGraph;
pub use routes::{AppState, api_routes};
