pub mod access;
pub mod forms;
pub mod search;
pub mod types;

pub use access::{require_role, ApplicantVisibility, RoleMismatch};
pub use search::SearchQuery;
pub use types::{
    Application, ApplicationWithApplicant, ApplicationWithJob, Job, Role, UnknownRole, User,
};
