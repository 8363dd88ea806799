use super::ValidationError;
use crate::fs::DirectoryHandle;
use crate::rules::Rule;
use tracing::debug;

/// Pre-flight checks before any transfer starts. Short-circuits on the
/// first failure. The writability check may write and remove a scratch
/// entry; nothing else touches either directory.
pub async fn validate(
    source: &dyn DirectoryHandle,
    destination: &dyn DirectoryHandle,
) -> Result<(), ValidationError> {
    if !source.exists().await {
        return Err(ValidationError::NotFound(source.location().display()));
    }

    if !destination.exists().await {
        return Err(ValidationError::NotFound(destination.location().display()));
    }
    if !destination.is_directory().await {
        return Err(ValidationError::NotADirectory(
            destination.location().display(),
        ));
    }

    if !source.can_read().await {
        return Err(ValidationError::PermissionDenied(
            source.location().display(),
        ));
    }
    if !destination.can_write().await {
        return Err(ValidationError::PermissionDenied(
            destination.location().display(),
        ));
    }

    // Best effort: a size or free-space figure the platform cannot
    // compute passes the check rather than failing the task.
    let required = match source.recursive_size().await {
        Ok(size) => size,
        Err(e) => {
            debug!("Skipping space check, source size unavailable: {}", e);
            return Ok(());
        }
    };
    if let Some(available) = destination.available_space().await {
        if required > available {
            return Err(ValidationError::InsufficientSpace {
                required,
                available,
            });
        }
    }

    Ok(())
}

/// A rule is usable for matching only with a non-empty destination and
/// at least one condition.
pub fn validate_rule(rule: &Rule) -> Result<(), ValidationError> {
    if rule.destination.trim().is_empty() {
        return Err(ValidationError::InvalidRule(format!(
            "rule '{}' has no destination",
            rule.name
        )));
    }
    if rule.conditions.is_empty() {
        return Err(ValidationError::InvalidRule(format!(
            "rule '{}' has no conditions",
            rule.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryDirHandle;
    use crate::rules::{LogicalOperator, Rule};

    #[tokio::test]
    async fn missing_source_is_not_found() {
        MemoryDirHandle::reset("v-src-missing");
        MemoryDirHandle::reset("v-dst-1");
        let source = MemoryDirHandle::open("v-src-missing");
        source.set_missing(true);
        let destination = MemoryDirHandle::open("v-dst-1");

        let err = validate(&source, &destination).await.unwrap_err();
        assert!(matches!(err, ValidationError::NotFound(_)));
    }

    #[tokio::test]
    async fn unreadable_source_is_permission_denied() {
        MemoryDirHandle::reset("v-src-ro");
        MemoryDirHandle::reset("v-dst-2");
        let source = MemoryDirHandle::open("v-src-ro");
        source.set_deny_read(true);
        let destination = MemoryDirHandle::open("v-dst-2");

        let err = validate(&source, &destination).await.unwrap_err();
        assert!(matches!(err, ValidationError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn unwritable_destination_is_permission_denied() {
        MemoryDirHandle::reset("v-src-3");
        MemoryDirHandle::reset("v-dst-ro");
        let source = MemoryDirHandle::open("v-src-3");
        let destination = MemoryDirHandle::open("v-dst-ro");
        destination.set_deny_write(true);

        let err = validate(&source, &destination).await.unwrap_err();
        assert!(matches!(err, ValidationError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn too_small_destination_is_insufficient_space() {
        MemoryDirHandle::reset("v-src-big");
        MemoryDirHandle::reset("v-dst-small");
        let source = MemoryDirHandle::open("v-src-big");
        source.put_file("large.bin", &[0u8; 1000]);
        let destination = MemoryDirHandle::open("v-dst-small");
        destination.set_capacity(Some(10));

        let err = validate(&source, &destination).await.unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InsufficientSpace {
                required: 1000,
                available: 10
            }
        ));
    }

    #[tokio::test]
    async fn unknowable_free_space_passes() {
        MemoryDirHandle::reset("v-src-ok");
        MemoryDirHandle::reset("v-dst-ok");
        let source = MemoryDirHandle::open("v-src-ok");
        source.put_file("f.bin", &[0u8; 1000]);
        let destination = MemoryDirHandle::open("v-dst-ok");
        // capacity unset: available_space() is None

        assert!(validate(&source, &destination).await.is_ok());
    }

    #[test]
    fn rule_without_destination_or_conditions_is_invalid() {
        let no_dest = Rule::new("x", vec![], LogicalOperator::And, "  ");
        assert!(matches!(
            validate_rule(&no_dest),
            Err(ValidationError::InvalidRule(_))
        ));

        let no_conditions = Rule::new("y", vec![], LogicalOperator::And, "/dest");
        assert!(matches!(
            validate_rule(&no_conditions),
            Err(ValidationError::InvalidRule(_))
        ));
    }
}
