//! Error types for MedicTrack.

use uuid::Uuid;

use crate::onboarding::model::{AssignmentStatus, GateType};
use crate::roles::SignOffRole;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Notification delivery errors. Never propagated past the notifier
/// boundary — callers log and move on.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid email address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    Send(String),
}

/// Errors surfaced by the onboarding engine and its collaborators.
///
/// Every variant carries enough structure for the API layer to render an
/// actionable response; `code()` gives the machine-readable label.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("No account found for {email}")]
    Unauthorized { email: String },

    #[error("{email} may not perform this action: {reason}")]
    Forbidden { email: String, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{instructor_email} already has an open assignment ({assignment_id})")]
    DuplicateAssignment {
        instructor_email: String,
        assignment_id: Uuid,
    },

    #[error("Assignment {assignment_id} is {status}, not active")]
    AssignmentNotActive {
        assignment_id: Uuid,
        status: AssignmentStatus,
    },

    #[error("Record {id} was modified concurrently, re-read and retry")]
    ConcurrentUpdate { id: Uuid },

    #[error("Assignment {assignment_id} still has {remaining} required task(s) open")]
    TasksOutstanding { assignment_id: Uuid, remaining: usize },

    #[error("Assignment status cannot change from {from} to {to}")]
    InvalidStatusChange {
        from: AssignmentStatus,
        to: AssignmentStatus,
    },

    #[error("Blocked by incomplete prerequisite '{title}' ({gate} dependency)")]
    Blocked {
        task_id: Uuid,
        title: String,
        gate: GateType,
    },

    #[error("Task '{title}' requires uploaded evidence before completion")]
    EvidenceRequired { title: String },

    #[error("Task '{title}' requires sign-off by {role}")]
    SignOffRequired { title: String, role: SignOffRole },

    #[error("Task '{title}' requires an active director endorsement")]
    DirectorEndorsementRequired { title: String },

    #[error("Invalid template: {reason}")]
    InvalidTemplate { reason: String },

    #[error("Invalid email address: {email}")]
    InvalidEmail { email: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl OnboardingError {
    /// Machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateAssignment { .. }
            | Self::AssignmentNotActive { .. }
            | Self::ConcurrentUpdate { .. }
            | Self::TasksOutstanding { .. }
            | Self::InvalidStatusChange { .. } => "conflict",
            Self::Blocked { .. } => "blocked",
            Self::EvidenceRequired { .. } => "evidence_required",
            Self::SignOffRequired { .. } => "sign_off_required",
            Self::DirectorEndorsementRequired { .. } => "director_endorsement_required",
            Self::InvalidTemplate { .. } => "invalid_template",
            Self::InvalidEmail { .. } => "invalid_email",
            Self::Database(_) => "unexpected",
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onboarding_error_codes() {
        let e = OnboardingError::Unauthorized {
            email: "x@y.org".into(),
        };
        assert_eq!(e.code(), "unauthorized");

        let e = OnboardingError::ConcurrentUpdate { id: Uuid::new_v4() };
        assert_eq!(e.code(), "conflict");

        let e = OnboardingError::DuplicateAssignment {
            instructor_email: "x@y.org".into(),
            assignment_id: Uuid::new_v4(),
        };
        assert_eq!(e.code(), "conflict");

        let e = OnboardingError::DirectorEndorsementRequired {
            title: "Final skills check".into(),
        };
        assert_eq!(e.code(), "director_endorsement_required");

        let e = OnboardingError::Database(DatabaseError::Query("boom".into()));
        assert_eq!(e.code(), "unexpected");
    }

    #[test]
    fn blocked_error_names_the_gate() {
        let e = OnboardingError::Blocked {
            task_id: Uuid::new_v4(),
            title: "Orientation session".into(),
            gate: GateType::Hard,
        };
        let msg = e.to_string();
        assert!(msg.contains("Orientation session"));
        assert!(msg.contains("hard"));
    }

    #[test]
    fn top_level_error_wraps_domain_errors() {
        let e: Error = DatabaseError::Query("select failed".into()).into();
        assert!(e.to_string().contains("Database error"));

        let e: Error = OnboardingError::NotFound {
            entity: "assignment",
            id: "abc".into(),
        }
        .into();
        assert!(e.to_string().contains("assignment not found"));
    }
}
