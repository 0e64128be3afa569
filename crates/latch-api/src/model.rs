//! Shared protocol constants

/// Default port the lock service listens on.
pub const DEFAULT_PORT: u16 = 3144;

/// Request header carrying the shared-secret password, when one is
/// configured.
pub const AUTHORIZATION_HEADER: &str = "authorization";

#[cfg(test)]
mod tests {
    use crate::grpc::latch::ErrorCode;

    #[test]
    fn test_error_code_wire_values() {
        // The wire codes form a closed set; clients match on them to
        // produce typed errors, so the numbering is load-bearing.
        assert_eq!(ErrorCode::Unknown as i32, 0);
        assert_eq!(ErrorCode::LockDoesNotExist as i32, 1);
        assert_eq!(ErrorCode::InvalidLockKey as i32, 2);
        assert_eq!(ErrorCode::LockWaitTimeout as i32, 3);
        assert_eq!(ErrorCode::NotLocked as i32, 4);
        assert_eq!(ErrorCode::LockDoesNotExistOrInvalidKey as i32, 5);
        assert_eq!(ErrorCode::LockSizeMismatch as i32, 6);
        assert_eq!(ErrorCode::InvalidLockSize as i32, 7);
    }

    #[test]
    fn test_error_code_round_trip() {
        assert_eq!(ErrorCode::try_from(3), Ok(ErrorCode::LockWaitTimeout));
        assert!(ErrorCode::try_from(42).is_err());
    }
}
