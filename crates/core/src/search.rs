use crate::types::Job;

/// Free-text job search term. Matching is an ASCII case-insensitive
/// substring test against title, company name and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    raw: String,
    folded: String,
}

impl SearchQuery {
    /// Parses the `q` parameter. Blank input means "no filter".
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let trimmed = raw.map(str::trim).filter(|value| !value.is_empty())?;
        Some(Self {
            raw: trimmed.to_string(),
            folded: trimmed.to_ascii_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lowercased form used for comparisons.
    pub fn folded(&self) -> &str {
        &self.folded
    }

    pub fn matches(&self, job: &Job) -> bool {
        [&job.title, &job.company_name, &job.location]
            .iter()
            .any(|field| field.to_ascii_lowercase().contains(&self.folded))
    }
}
