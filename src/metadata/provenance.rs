//! Provenance stamps
//!
//! Every exported container and file carries `info.export.origin_id`, a
//! salted SHA-256 of its origin id. The stamp lets later runs find what an
//! earlier run created without exposing origin ids in the destination.

use sha2::{Digest, Sha256};

/// Dotted key of the stamp in exported metadata
pub const ORIGIN_ID_KEY: &str = "info.export.origin_id";

/// Hex SHA-256 of `salt` followed by `origin_id`
///
/// The salt is the id of the origin project; a missing salt hashes the id
/// alone.
///
/// # Examples
///
/// ```
/// use deid_export::metadata::provenance::origin_stamp;
///
/// let stamp = origin_stamp("file-1", Some("project-1"));
/// assert_eq!(stamp.len(), 64);
/// assert_ne!(stamp, origin_stamp("file-1", Some("project-2")));
/// ```
pub fn origin_stamp(origin_id: &str, salt: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    if let Some(salt) = salt {
        hasher.update(salt.as_bytes());
    }
    hasher.update(origin_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_is_salt_then_id() {
        // sha256("ab")
        assert_eq!(
            origin_stamp("b", Some("a")),
            "fb8e20fc2e4c3f248c60c39bd652f3c1347298bb977b8b4d5903b85055620603"
        );
        assert_eq!(origin_stamp("ab", None), origin_stamp("b", Some("a")));
    }

    #[test]
    fn test_stamp_deterministic() {
        assert_eq!(origin_stamp("x", Some("p")), origin_stamp("x", Some("p")));
    }
}
