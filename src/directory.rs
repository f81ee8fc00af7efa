//! User directory and director endorsements.
//!
//! The engine consults the directory for actor resolution, role checks, and
//! endorsement lookups. Account administration is deliberately small: an
//! admin-tier upsert plus an endorsement toggle. Session handling lives in
//! the upstream gateway; this service only maps an email to an account.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::OnboardingError;
use crate::roles::Role;
use crate::store::Store;

/// A directory account. `role` drives every capability check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Emails are stored lowercased so header lookups are case-insensitive.
    pub fn new(email: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into().to_lowercase(),
            name: name.into(),
            role,
            created_at: Utc::now(),
        }
    }
}

/// Directory service over the store.
pub struct Directory {
    store: Arc<dyn Store>,
    email_re: Regex,
}

impl Directory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            // Shape check only; deliverability is the notifier's problem.
            email_re: Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap(),
        }
    }

    /// Map an identity-header email to an account, or `Unauthorized`.
    pub async fn resolve_actor(&self, email: &str) -> Result<User, OnboardingError> {
        let email = email.trim().to_lowercase();
        self.store
            .resolve_user(&email)
            .await?
            .ok_or(OnboardingError::Unauthorized { email })
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>, OnboardingError> {
        Ok(self.store.get_user(id).await?)
    }

    /// Look up an account by email (normalized), for referencing users other
    /// than the actor. Absence is the caller's problem to type.
    pub async fn lookup(&self, email: &str) -> Result<Option<User>, OnboardingError> {
        let email = email.trim().to_lowercase();
        Ok(self.store.resolve_user(&email).await?)
    }

    /// Create or update an account. Admin tier only. Re-creating an
    /// existing email updates name and role in place, keeping the id.
    pub async fn create_user(
        &self,
        actor: &User,
        email: &str,
        name: &str,
        role: Role,
    ) -> Result<User, OnboardingError> {
        if !actor.role.is_admin_tier() {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "only administrators may manage accounts".into(),
            });
        }

        let email = email.trim().to_lowercase();
        if !self.email_re.is_match(&email) {
            return Err(OnboardingError::InvalidEmail { email });
        }

        let user = self.store.upsert_user(&User::new(email, name, role)).await?;
        info!(user_id = %user.id, email = %user.email, role = %user.role, "User upserted");
        Ok(user)
    }

    /// Grant or revoke a director endorsement. Admin tier only.
    pub async fn set_director_endorsement(
        &self,
        actor: &User,
        user_id: Uuid,
        active: bool,
    ) -> Result<(), OnboardingError> {
        if !actor.role.is_admin_tier() {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "only administrators may manage endorsements".into(),
            });
        }

        let Some(user) = self.store.get_user(user_id).await? else {
            return Err(OnboardingError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            });
        };

        self.store
            .set_director_endorsement(user.id, active, &actor.email)
            .await?;
        info!(user_id = %user.id, email = %user.email, active, "Director endorsement updated");
        Ok(())
    }

    pub async fn has_active_director_endorsement(
        &self,
        user_id: Uuid,
    ) -> Result<bool, OnboardingError> {
        Ok(self.store.has_active_director_endorsement(user_id).await?)
    }

    /// Ensure the configured bootstrap admin exists. Runs at startup with
    /// no acting principal; idempotent by upsert.
    pub async fn ensure_bootstrap_admin(
        &self,
        email: &str,
        name: &str,
    ) -> Result<User, OnboardingError> {
        let email = email.trim().to_lowercase();
        if !self.email_re.is_match(&email) {
            return Err(OnboardingError::InvalidEmail { email });
        }
        let user = self
            .store
            .upsert_user(&User::new(email, name, Role::SuperAdmin))
            .await?;
        info!(email = %user.email, "Bootstrap admin ensured");
        Ok(user)
    }
}
