use super::*;

#[test]
fn error_codes_are_distinct() {
    let id = Uuid::new_v4();
    assert_eq!(StoreError::not_found("token", id).error_code(), "E_NOT_FOUND");
    assert_eq!(StoreError::ForeignKey("map".into()).error_code(), "E_FOREIGN_KEY");
    assert_eq!(StoreError::Constraint("token_type".into()).error_code(), "E_CONSTRAINT");
    assert_eq!(StoreError::Database(sqlx::Error::PoolTimedOut).error_code(), "E_DATABASE");
}

#[test]
fn only_io_failures_are_retryable() {
    assert!(StoreError::Database(sqlx::Error::PoolTimedOut).retryable());
    assert!(!StoreError::not_found("light source", Uuid::new_v4()).retryable());
    assert!(!StoreError::ForeignKey("map".into()).retryable());
}

#[test]
fn non_database_driver_errors_stay_database() {
    let err: StoreError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, StoreError::Database(_)));
}

#[test]
fn not_found_message_names_entity() {
    let id = Uuid::new_v4();
    let err = StoreError::not_found("revealed area", id);
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), format!("revealed area not found: {id}"));
}
