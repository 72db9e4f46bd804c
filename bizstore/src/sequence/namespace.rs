use crate::common::MAX_NAMESPACE_LEN;
use crate::errors::{BizError, BizResult, ErrorKind};

/// Checks that `namespace` can name a counter record.
///
/// A namespace is non-empty, at most 128 bytes long and free of control
/// characters (NUL included). Violations are `Configuration` errors and are
/// raised before the store is contacted.
pub fn validate_namespace(namespace: &str) -> BizResult<()> {
    if namespace.is_empty() {
        log::error!("Sequence namespace is empty");
        return Err(BizError::new(
            "Sequence namespace is empty",
            ErrorKind::Configuration,
        ));
    }

    if namespace.len() > MAX_NAMESPACE_LEN {
        log::error!(
            "Sequence namespace is {} bytes long, the limit is {}",
            namespace.len(),
            MAX_NAMESPACE_LEN
        );
        return Err(BizError::new(
            &format!(
                "Sequence namespace exceeds {} bytes",
                MAX_NAMESPACE_LEN
            ),
            ErrorKind::Configuration,
        ));
    }

    if namespace.chars().any(char::is_control) {
        log::error!("Sequence namespace {:?} contains control characters", namespace);
        return Err(BizError::new(
            "Sequence namespace contains control characters",
            ErrorKind::Configuration,
        ));
    }
    Ok(())
}
