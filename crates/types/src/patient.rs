//! Patient identifiers and the on-disk naming convention built from them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted patient identifier, in bytes.
pub const MAX_PATIENT_ID_LEN: usize = 128;

/// Separator between the patient id and the original file name.
pub const NAME_SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatientIdError {
    #[error("patient id must not be empty")]
    Empty,
    #[error("patient id must be at most {} bytes", MAX_PATIENT_ID_LEN)]
    TooLong,
    #[error("patient id must not start with '.'")]
    LeadingDot,
    #[error("patient id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileNameError {
    #[error("file name must not be empty")]
    Empty,
    #[error("file name {0:?} is reserved")]
    Reserved(String),
}

/// Validated patient identifier.
///
/// Only ASCII alphanumerics, `-` and `.` are allowed. `_` is the separator of
/// the stored file name, so excluding it keeps prefix lookups unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatientId(String);

impl PatientId {
    /// Trim surrounding whitespace and validate.
    pub fn parse(raw: &str) -> Result<Self, PatientIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PatientIdError::Empty);
        }
        if trimmed.len() > MAX_PATIENT_ID_LEN {
            return Err(PatientIdError::TooLong);
        }
        if trimmed.starts_with('.') {
            return Err(PatientIdError::LeadingDot);
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
        {
            return Err(PatientIdError::InvalidCharacter(bad));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every stored file of this patient.
    pub fn file_prefix(&self) -> String {
        format!("{}{}", self.0, NAME_SEPARATOR)
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PatientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<PatientId> for String {
    fn from(value: PatientId) -> Self {
        value.0
    }
}

impl TryFrom<String> for PatientId {
    type Error = PatientIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PatientId::parse(&value)
    }
}

/// Reduce a client supplied file name to a safe basename.
///
/// Directory components (either separator style) are dropped and spaces
/// become underscores.
pub fn sanitize_file_name(original: &str) -> Result<String, FileNameError> {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() {
        return Err(FileNameError::Empty);
    }
    if base == "." || base == ".." {
        return Err(FileNameError::Reserved(base.to_string()));
    }

    Ok(base.replace(' ', "_"))
}

/// `{patientId}_{sanitizedOriginalName}`
pub fn stored_file_name(patient: &PatientId, original: &str) -> Result<String, FileNameError> {
    let name = sanitize_file_name(original)?;
    Ok(format!("{}{}", patient.file_prefix(), name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn patient_id_is_trimmed() {
        let id = PatientId::parse("  p1 ").unwrap();
        assert_eq!(id.as_str(), "p1");
        assert_eq!(id.file_prefix(), "p1_");
    }

    #[test]
    fn patient_id_rejects_separator_and_paths() {
        assert_eq!(PatientId::parse(""), Err(PatientIdError::Empty));
        assert_eq!(PatientId::parse("   "), Err(PatientIdError::Empty));
        assert_eq!(
            PatientId::parse("p_1"),
            Err(PatientIdError::InvalidCharacter('_'))
        );
        assert_eq!(
            PatientId::parse("a/b"),
            Err(PatientIdError::InvalidCharacter('/'))
        );
        assert_eq!(PatientId::parse(".."), Err(PatientIdError::LeadingDot));
        assert_eq!(
            PatientId::parse(&"x".repeat(MAX_PATIENT_ID_LEN + 1)),
            Err(PatientIdError::TooLong)
        );
        assert!(PatientId::parse("MRN-2024.001").is_ok());
    }

    #[test]
    fn file_names_lose_directories_and_spaces() {
        assert_eq!(sanitize_file_name("scan result.pdf").unwrap(), "scan_result.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\tmp\\x ray.png").unwrap(), "x_ray.png");
        assert_eq!(sanitize_file_name("dir/"), Err(FileNameError::Empty));
        assert_eq!(
            sanitize_file_name("a/.."),
            Err(FileNameError::Reserved("..".into()))
        );
    }

    #[test]
    fn stored_name_follows_convention() {
        let id = PatientId::parse("p1").unwrap();
        assert_eq!(stored_file_name(&id, "blood work.txt").unwrap(), "p1_blood_work.txt");
    }

    proptest! {
        #[test]
        fn prefix_lookup_never_matches_another_patient(
            a in "[A-Za-z0-9][A-Za-z0-9.-]{0,15}",
            b in "[A-Za-z0-9][A-Za-z0-9.-]{0,15}",
            name in "[A-Za-z0-9_ .-]{1,20}",
        ) {
            let a = PatientId::parse(&a).unwrap();
            let b = PatientId::parse(&b).unwrap();
            if let Ok(stored) = stored_file_name(&a, &name) {
                prop_assert_eq!(stored.starts_with(&b.file_prefix()), a == b);
            }
        }
    }
}
