use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Role;

pub const NON_FIELD_ERRORS: &str = "__all__";

pub const REQUIRED: &str = "This field is required.";
pub const USERNAME_TAKEN: &str = "A user with that username already exists.";
pub const INVALID_LOGIN: &str = "Please enter a correct username and password.";

const USERNAME_MAX_CHARS: usize = 150;
const EMAIL_MAX_CHARS: usize = 254;
const PASSWORD_MIN_CHARS: usize = 8;
const JOB_FIELD_MAX_CHARS: usize = 200;
const RESUME_NAME_MAX_CHARS: usize = 100;

/// Validation messages keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an error set holding a single message.
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    #[cfg(test)]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn into_result<T>(self, value: impl FnOnce() -> T) -> Result<T, FieldErrors> {
        if self.is_empty() {
            Ok(value())
        } else {
            Err(self)
        }
    }
}

fn required<'a>(errors: &mut FieldErrors, field: &str, value: &'a str) -> Option<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.add(field, REQUIRED);
        None
    } else {
        Some(trimmed)
    }
}

fn max_chars(errors: &mut FieldErrors, field: &str, value: &str, limit: usize) -> bool {
    let count = value.chars().count();
    if count > limit {
        errors.add(
            field,
            format!("Ensure this value has at most {limit} characters (it has {count})."),
        );
        false
    } else {
        true
    }
}

/// Raw registration fields as submitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistrationInput {
    pub username: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
    pub role: String,
}

/// Registration that passed every field check. Username uniqueness is left
/// to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

impl RegistrationInput {
    pub fn validate(&self) -> Result<Registration, FieldErrors> {
        let mut errors = FieldErrors::new();

        let username = required(&mut errors, "username", &self.username).and_then(|value| {
            let within = max_chars(&mut errors, "username", value, USERNAME_MAX_CHARS);
            if !value.chars().all(is_username_char) {
                errors.add(
                    "username",
                    "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
                );
                return None;
            }
            within.then_some(value)
        });

        let email = required(&mut errors, "email", &self.email).and_then(|value| {
            if !max_chars(&mut errors, "email", value, EMAIL_MAX_CHARS) {
                return None;
            }
            if !is_valid_email(value) {
                errors.add("email", "Enter a valid email address.");
                return None;
            }
            Some(value)
        });

        let password = if self.password1.is_empty() {
            errors.add("password1", REQUIRED);
            None
        } else {
            Some(self.password1.as_str())
        };
        if self.password2.is_empty() {
            errors.add("password2", REQUIRED);
        } else if password.is_some_and(|first| first != self.password2) {
            errors.add("password2", "The two password fields didn't match.");
        } else if let Some(first) = password {
            check_password_strength(&mut errors, first, username);
        }

        let role = required(&mut errors, "role", &self.role).and_then(|value| {
            let parsed = value.parse::<Role>().ok();
            if parsed.is_none() {
                errors.add(
                    "role",
                    format!("Select a valid choice. {value} is not one of the available choices."),
                );
            }
            parsed
        });

        match (username, email, password, role) {
            (Some(username), Some(email), Some(password), Some(role)) => {
                errors.into_result(|| Registration {
                    username: username.to_string(),
                    email: email.to_string(),
                    password: password.to_string(),
                    role,
                })
            }
            _ => Err(errors),
        }
    }
}

fn is_username_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_')
}

fn check_password_strength(errors: &mut FieldErrors, password: &str, username: Option<&str>) {
    if password.chars().count() < PASSWORD_MIN_CHARS {
        errors.add(
            "password2",
            format!(
                "This password is too short. It must contain at least {PASSWORD_MIN_CHARS} characters."
            ),
        );
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        errors.add("password2", "This password is entirely numeric.");
    }
    if username.is_some_and(|name| name.eq_ignore_ascii_case(password)) {
        errors.add("password2", "The password is too similar to the username.");
    }
}

/// Structural email check: one `@`, a non-empty local part and a dotted
/// domain without empty labels.
pub fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty() && !label.starts_with('-') && !label.ends_with('-')
        })
}

/// Raw login fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
    pub next: Option<String>,
}

impl LoginInput {
    /// Returns the trimmed username and the password, both required.
    pub fn validate(&self) -> Result<(&str, &str), FieldErrors> {
        let mut errors = FieldErrors::new();
        let username = required(&mut errors, "username", &self.username);
        if self.password.is_empty() {
            errors.add("password", REQUIRED);
        }
        match username {
            Some(username) if errors.is_empty() => Ok((username, self.password.as_str())),
            _ => Err(errors),
        }
    }
}

/// Raw job posting fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobInput {
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub description: String,
}

/// Job fields that passed validation, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFields {
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub description: String,
}

impl JobInput {
    pub fn validate(&self) -> Result<JobFields, FieldErrors> {
        let mut errors = FieldErrors::new();
        let mut bounded = |field: &str, value: &str| {
            required(&mut errors, field, value)
                .filter(|trimmed| max_chars(&mut errors, field, trimmed, JOB_FIELD_MAX_CHARS))
                .map(str::to_string)
        };
        let title = bounded("title", &self.title);
        let company_name = bounded("company_name", &self.company_name);
        let location = bounded("location", &self.location);
        let description = required(&mut errors, "description", &self.description);

        match (title, company_name, location, description) {
            (Some(title), Some(company_name), Some(location), Some(description)) => {
                Ok(JobFields {
                    title,
                    company_name,
                    location,
                    description: description.to_string(),
                })
            }
            _ => Err(errors),
        }
    }
}

/// Uploaded resume as received from the multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeUpload {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Raw application fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationInput {
    pub cover_letter: String,
    pub resume: Option<ResumeUpload>,
}

/// Application fields that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSubmission {
    pub cover_letter: String,
    pub resume: ResumeUpload,
}

impl ApplicationInput {
    pub fn validate(self, max_resume_bytes: usize) -> Result<ApplicationSubmission, FieldErrors> {
        let mut errors = FieldErrors::new();

        let resume = match self.resume {
            None => {
                errors.add("resume", "No file was submitted.");
                None
            }
            Some(upload) if upload.file_name.trim().is_empty() => {
                errors.add("resume", "No file was submitted.");
                None
            }
            Some(upload) if upload.content.is_empty() => {
                errors.add("resume", "The submitted file is empty.");
                None
            }
            Some(upload) => {
                let name_chars = upload.file_name.chars().count();
                if name_chars > RESUME_NAME_MAX_CHARS {
                    errors.add(
                        "resume",
                        format!(
                            "Ensure this filename has at most {RESUME_NAME_MAX_CHARS} characters (it has {name_chars})."
                        ),
                    );
                    None
                } else if upload.content.len() > max_resume_bytes {
                    errors.add(
                        "resume",
                        format!("The submitted file exceeds the {max_resume_bytes} byte limit."),
                    );
                    None
                } else {
                    Some(upload)
                }
            }
        };

        let cover_letter = required(&mut errors, "cover_letter", &self.cover_letter)
            .map(str::to_string);

        match (resume, cover_letter) {
            (Some(resume), Some(cover_letter)) => Ok(ApplicationSubmission {
                cover_letter,
                resume,
            }),
            _ => Err(errors),
        }
    }
}
