//! Identifier newtypes
//!
//! Remote containers, files and de-identification jobs are all addressed by
//! opaque string ids. Wrapping them keeps a file id from being passed where a
//! parent container id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a container or file in the datastore
///
/// # Examples
///
/// ```
/// use deid_export::domain::ids::ContainerId;
/// use std::str::FromStr;
///
/// let id = ContainerId::from_str("5f3a9c0e1b2d").unwrap();
/// assert_eq!(id.as_str(), "5f3a9c0e1b2d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new ContainerId, rejecting blank strings
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Container ID cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Fresh random id, used by the in-memory datastore
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a remote de-identification job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a new JobId, rejecting blank strings
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Job ID cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_valid() {
        let id = ContainerId::new("abc123").unwrap();
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.to_string(), "abc123");
    }

    #[test]
    fn test_container_id_empty() {
        assert!(ContainerId::new("").is_err());
        assert!(ContainerId::new("   ").is_err());
    }

    #[test]
    fn test_job_id_from_str() {
        let id: JobId = "job-1".parse().unwrap();
        assert_eq!(id.as_str(), "job-1");
        assert!("".parse::<JobId>().is_err());
    }

    #[test]
    fn test_container_id_serde_transparent() {
        let id = ContainerId::new("xyz").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"xyz\"");
    }
}
