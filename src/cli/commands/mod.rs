//! CLI command implementations
//!
//! Every command returns its process exit code:
//! 0 success, 1 some files failed, 2 configuration or validation error,
//! 4 connection error, 5 fatal error.

pub mod cancel;
pub mod export;
pub mod init;
pub mod render;
pub mod validate;

use crate::domain::{DatastoreError, DeidError};

/// Exit code for an error that stopped a command
pub fn exit_code_for(error: &DeidError) -> i32 {
    match error {
        DeidError::Configuration(_)
        | DeidError::Validation(_)
        | DeidError::InvalidProfile(_)
        | DeidError::InvalidFieldRule(_)
        | DeidError::MissingColumn(_)
        | DeidError::DuplicateKey { .. }
        | DeidError::PathNotFound(_) => 2,
        DeidError::RemoteCallFailure(
            DatastoreError::ConnectionFailed(_)
            | DatastoreError::Timeout(_)
            | DatastoreError::AuthenticationFailed(_),
        ) => 4,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&DeidError::MissingColumn("x".to_string())), 2);
        assert_eq!(
            exit_code_for(&DatastoreError::Timeout("slow".to_string()).into()),
            4
        );
        assert_eq!(
            exit_code_for(&DatastoreError::NotFound("gone".to_string()).into()),
            5
        );
        assert_eq!(exit_code_for(&DeidError::Io("disk".to_string())), 5);
    }
}
