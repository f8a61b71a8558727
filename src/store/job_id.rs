use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

const MAX_JOB_ID_LEN: usize = 64;

/// Job identifier, used both as the scheduler job id and the folder name.
///
/// Parsing restricts the character set so that every path derived from an
/// id stays directly under the jobs root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn parse(raw: &str) -> Result<Self, JobError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(JobError::InvalidRequest("job id is empty".to_string()));
        }
        if raw.len() > MAX_JOB_ID_LEN {
            return Err(JobError::InvalidRequest(format!(
                "job id longer than {} characters",
                MAX_JOB_ID_LEN
            )));
        }
        let first_ok = raw
            .chars()
            .next()
            .map(|c| c.is_ascii_alphanumeric())
            .unwrap_or(false);
        let chars_ok = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !first_ok || !chars_ok || raw.contains("..") {
            return Err(JobError::InvalidRequest(format!("invalid job id: {:?}", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for ids the scheduler hands out: `123` or an array task `123_4`.
    pub fn is_scheduler_shaped(&self) -> bool {
        let mut parts = self.0.splitn(2, '_');
        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        match (parts.next(), parts.next()) {
            (Some(head), None) => all_digits(head),
            (Some(head), Some(task)) => all_digits(head) && all_digits(task),
            _ => false,
        }
    }

    /// `<id>.zip`
    pub fn archive_file_name(&self) -> String {
        format!("{}.zip", self.0)
    }

    /// Parse `<id>.zip` back into an id.
    pub fn from_archive_file_name(name: &str) -> Result<Self, JobError> {
        match name.strip_suffix(".zip") {
            Some(stem) => Self::parse(stem),
            None => Err(JobError::InvalidRequest(format!(
                "not an archive name: {:?}",
                name
            ))),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_scheduler_ids() {
        let id = JobId::parse("42").unwrap();
        assert_eq!(id.as_str(), "42");
        assert!(id.is_scheduler_shaped());
        assert!(JobId::parse("1234_7").unwrap().is_scheduler_shaped());
    }

    #[test]
    fn accepts_opaque_ids_that_are_not_scheduler_shaped() {
        let id = JobId::parse("train-resnet.v2").unwrap();
        assert!(!id.is_scheduler_shaped());
        assert!(!JobId::parse("12_").is_ok_and(|id| id.is_scheduler_shaped()));
        assert!(!JobId::parse("tmp").unwrap().is_scheduler_shaped());
        assert!(!JobId::parse("12_ab").unwrap().is_scheduler_shaped());
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(JobId::parse("  7 \n").unwrap().as_str(), "7");
    }

    #[test]
    fn rejects_path_like_ids() {
        for bad in ["", "..", "../etc", "a/b", ".hidden", "a..b", "-rf", "a b", "x\\y"] {
            assert!(JobId::parse(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn rejects_overlong_ids() {
        let long = "1".repeat(MAX_JOB_ID_LEN + 1);
        assert!(JobId::parse(&long).is_err());
        assert!(JobId::parse(&long[..MAX_JOB_ID_LEN]).is_ok());
    }

    #[test]
    fn archive_file_names() {
        let id = JobId::parse("42").unwrap();
        assert_eq!(id.archive_file_name(), "42.zip");
        assert_eq!(JobId::from_archive_file_name("42.zip").unwrap(), id);
        assert!(JobId::from_archive_file_name("42.tar").is_err());
        assert!(JobId::from_archive_file_name("...zip").is_err());
    }

    #[test]
    fn deserializes_with_validation() {
        let id: JobId = serde_json::from_str("\"17\"").unwrap();
        assert_eq!(id.as_str(), "17");
        assert!(serde_json::from_str::<JobId>("\"../17\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"17\"");
    }
}
