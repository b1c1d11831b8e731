use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role assigned to an account at registration. Exactly one per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employer,
    Applicant,
}

impl Role {
    /// Every role definition, in the order they are presented on forms.
    pub const ALL: [Role; 2] = [Role::Employer, Role::Applicant];

    /// Returns the canonical database representation for the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Employer => "employer",
            Self::Applicant => "applicant",
        }
    }

    /// Human readable name shown in role pickers.
    pub fn label(self) -> &'static str {
        match self {
            Self::Employer => "Employer",
            Self::Applicant => "Applicant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "employer" => Ok(Self::Employer),
            "applicant" => Ok(Self::Applicant),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Registered account. The password hash never leaves the storage layer
/// inside this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_employer(&self) -> bool {
        self.role == Role::Employer
    }

    pub fn is_applicant(&self) -> bool {
        self.role == Role::Applicant
    }
}

/// Job listing owned by the employer that posted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub description: String,
    pub posted_by: i64,
    pub created_at: DateTime<Utc>,
}

/// One applicant's submission against one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub job_id: i64,
    pub applicant_id: i64,
    /// Path of the stored resume, relative to the media root.
    pub resume: String,
    pub cover_letter: String,
    pub applied_at: DateTime<Utc>,
}

/// Application row joined with the job it targets, for applicant dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationWithJob {
    #[serde(flatten)]
    pub application: Application,
    pub job_title: String,
    pub company_name: String,
}

/// Application row joined with its applicant, for employer views of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationWithApplicant {
    #[serde(flatten)]
    pub application: Application,
    pub applicant_username: String,
    pub applicant_email: String,
}
