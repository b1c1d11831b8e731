use thiserror::Error;

use crate::types::{Job, Role, User};

/// Policy for who may read the applicant list of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplicantVisibility {
    /// Any employer may see any job's applicants.
    #[default]
    AnyEmployer,
    /// Only the employer that posted the job.
    OwnerOnly,
}

impl ApplicantVisibility {
    pub fn allows(self, viewer: Option<&User>, job: &Job) -> bool {
        match viewer {
            Some(user) if user.is_employer() => match self {
                Self::AnyEmployer => true,
                Self::OwnerOnly => user.id == job.posted_by,
            },
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("role {required} is required, account has role {actual}")]
pub struct RoleMismatch {
    pub required: Role,
    pub actual: Role,
}

/// Ensures the user holds `required`.
pub fn require_role(user: &User, required: Role) -> Result<(), RoleMismatch> {
    if user.role == required {
        Ok(())
    } else {
        Err(RoleMismatch {
            required,
            actual: user.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: i64, role: Role) -> User {
        User {
            id,
            username: format!("user-{id}"),
            email: format!("user-{id}@example.com"),
            role,
            created_at: Utc::now(),
        }
    }

    fn job(posted_by: i64) -> Job {
        Job {
            id: 10,
            title: "Engineer".to_string(),
            company_name: "Acme".to_string(),
            location: "NYC".to_string(),
            description: "build things".to_string(),
            posted_by,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn any_employer_sees_every_applicant_list() {
        let other_employer = user(2, Role::Employer);
        assert!(ApplicantVisibility::AnyEmployer.allows(Some(&other_employer), &job(1)));
    }

    #[test]
    fn owner_only_restricts_to_poster() {
        let owner = user(1, Role::Employer);
        let other = user(2, Role::Employer);
        assert!(ApplicantVisibility::OwnerOnly.allows(Some(&owner), &job(1)));
        assert!(!ApplicantVisibility::OwnerOnly.allows(Some(&other), &job(1)));
    }

    #[test]
    fn applicants_and_anonymous_never_see_the_list() {
        let applicant = user(3, Role::Applicant);
        for policy in [ApplicantVisibility::AnyEmployer, ApplicantVisibility::OwnerOnly] {
            assert!(!policy.allows(Some(&applicant), &job(3)));
            assert!(!policy.allows(None, &job(3)));
        }
    }

    #[test]
    fn require_role_reports_mismatch() {
        let applicant = user(3, Role::Applicant);
        assert!(require_role(&applicant, Role::Applicant).is_ok());
        assert_eq!(
            require_role(&applicant, Role::Employer),
            Err(RoleMismatch {
                required: Role::Employer,
                actual: Role::Applicant,
            })
        );
    }
}
