//! Role capability model.
//!
//! Roles form an explicit total order (derived `Ord` on declaration order),
//! so authorization checks are `has_min_role` comparisons instead of string
//! matching scattered through handlers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Directory role, least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Enrolled paramedic student.
    #[default]
    Student,
    /// Teaching staff; the population onboarding tracks.
    Instructor,
    /// Program administrator.
    Admin,
    /// Unrestricted administrator.
    SuperAdmin,
}

impl Role {
    /// True when this role is at or above the given threshold.
    pub fn has_min_role(self, min: Role) -> bool {
        self >= min
    }

    /// Admin tier: `Admin` and above. Gates back-office operations and
    /// administrative overrides such as waiving tasks.
    pub fn is_admin_tier(self) -> bool {
        self.has_min_role(Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Who a sign-off gate accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOffRole {
    /// The mentor named on the assignment (admins may substitute).
    Mentor,
    /// Program director; admin tier only.
    ProgramDirector,
}

impl SignOffRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SignOffRole::Mentor => "mentor",
            SignOffRole::ProgramDirector => "program_director",
        }
    }
}

impl fmt::Display for SignOffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignOffRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mentor" => Ok(SignOffRole::Mentor),
            "program_director" => Ok(SignOffRole::ProgramDirector),
            other => Err(format!("unknown sign-off role: {other}")),
        }
    }
}
