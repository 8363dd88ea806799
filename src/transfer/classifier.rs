use super::{TaskError, TransferError, ValidationError};
use crate::fs::FsError;

/// Typed failure shape consumed by the caller layer, with the
/// recoverability decision already made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorEvent {
    FileOperation { recoverable: bool },
    Permission { location: String, recoverable: bool },
    Database,
    Validation { field: String },
    Unknown,
}

impl ErrorEvent {
    /// Recoverable errors are eligible for the re-authorize-and-retry
    /// path; the rest are terminal for the task.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ErrorEvent::FileOperation { recoverable } => *recoverable,
            ErrorEvent::Permission { recoverable, .. } => *recoverable,
            ErrorEvent::Database | ErrorEvent::Unknown => false,
            ErrorEvent::Validation { .. } => false,
        }
    }
}

/// Pure mapping from the typed task-failure taxonomy into the event
/// shape the caller consumes. Works entirely off discriminants; no
/// message text is ever inspected.
pub fn classify(err: &TaskError) -> ErrorEvent {
    match err {
        TaskError::Validation(err) => classify_validation(err),
        TaskError::Transfer(err) => classify_transfer(err),
    }
}

pub fn classify_validation(err: &ValidationError) -> ErrorEvent {
    match err {
        ValidationError::NotFound(location) | ValidationError::NotADirectory(location) => {
            ErrorEvent::Validation {
                field: location.clone(),
            }
        }
        ValidationError::PermissionDenied(location) => ErrorEvent::Permission {
            location: location.clone(),
            recoverable: true,
        },
        ValidationError::InsufficientSpace { .. } => ErrorEvent::FileOperation { recoverable: true },
        ValidationError::InvalidRule(field) => ErrorEvent::Validation {
            field: field.clone(),
        },
    }
}

pub fn classify_transfer(err: &TransferError) -> ErrorEvent {
    match err {
        TransferError::ReadFailure(fs) | TransferError::WriteFailure(fs) => match fs {
            FsError::NotFound(_) => ErrorEvent::FileOperation { recoverable: false },
            FsError::PermissionDenied(location) => ErrorEvent::Permission {
                location: location.clone(),
                recoverable: true,
            },
            FsError::Io { .. } => ErrorEvent::Unknown,
        },
        // A failed delete leaves duplicates in both locations; nothing a
        // retry alone would fix.
        TransferError::DeleteFailure(_) => ErrorEvent::FileOperation { recoverable: false },
        TransferError::NoMatch => ErrorEvent::FileOperation { recoverable: false },
        // A cancelled run left the source intact; re-running the task
        // picks up where it stopped.
        TransferError::Cancelled => ErrorEvent::FileOperation { recoverable: true },
        TransferError::Storage(_) => ErrorEvent::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_non_recoverable_file_operation() {
        let err = TransferError::ReadFailure(FsError::NotFound("/gone".to_string()));
        assert_eq!(
            classify_transfer(&err),
            ErrorEvent::FileOperation { recoverable: false }
        );
    }

    #[test]
    fn permission_denial_is_recoverable_and_carries_the_location() {
        let err = TransferError::WriteFailure(FsError::PermissionDenied("/dest".to_string()));
        let event = classify_transfer(&err);
        assert_eq!(
            event,
            ErrorEvent::Permission {
                location: "/dest".to_string(),
                recoverable: true
            }
        );
        assert!(event.is_recoverable());
    }

    #[test]
    fn insufficient_space_is_recoverable() {
        let err = ValidationError::InsufficientSpace {
            required: 1000,
            available: 10,
        };
        let event = classify_validation(&err);
        assert_eq!(event, ErrorEvent::FileOperation { recoverable: true });
        assert!(event.is_recoverable());
    }

    #[test]
    fn cancellation_is_recoverable() {
        let event = classify_transfer(&TransferError::Cancelled);
        assert_eq!(event, ErrorEvent::FileOperation { recoverable: true });
        assert!(event.is_recoverable());
    }

    #[test]
    fn storage_failures_map_to_database() {
        let err = TransferError::Storage(sqlx::Error::PoolClosed);
        assert_eq!(classify_transfer(&err), ErrorEvent::Database);
    }

    #[test]
    fn unclassified_io_maps_to_unknown() {
        let err = TransferError::ReadFailure(FsError::Io {
            location: "/x".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"),
        });
        let event = classify_transfer(&err);
        assert_eq!(event, ErrorEvent::Unknown);
        assert!(!event.is_recoverable());
    }

    #[test]
    fn validation_failures_name_the_offending_field() {
        let err = ValidationError::NotFound("/missing".to_string());
        assert_eq!(
            classify_validation(&err),
            ErrorEvent::Validation {
                field: "/missing".to_string()
            }
        );
    }
}
