use crate::domain::error::DomainError;

/// Upper bound on publication length, counted in characters.
pub const MAX_PUBLICATION_CHARS: usize = 4096;

/// Validated publication body.
///
/// Surrounding whitespace is preserved; only the trimmed form must be
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationText(String);

impl PublicationText {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        if raw.trim().is_empty() {
            return Err(DomainError::validation("publication text must not be empty"));
        }
        let chars = raw.chars().count();
        if chars > MAX_PUBLICATION_CHARS {
            return Err(DomainError::validation(format!(
                "publication text has {chars} characters; the limit is {MAX_PUBLICATION_CHARS}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}
